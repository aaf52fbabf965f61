pub mod types;

use std::collections::HashMap;
use std::mem;
use std::path::PathBuf;

use crate::frontend::ast::*;
use crate::frontend::diagnostic::{Diagnostic, Diagnostics, Severity};
use crate::frontend::suggest;
use crate::sema::types::{
    FunctionInst, InstProgram, StructInstance, TypeKind, TypeRef, TypedBlock, TypedExpr,
    TypedExprKind, TypedStmt,
};

/// Chain of scope frames. `look_up` walks outwards, `insert` writes into the
/// innermost frame only, so shadowing across frames is permitted while
/// redefinition within a frame stays detectable via `look_up_local`.
struct ScopeMap {
    frames: Vec<HashMap<String, TypeRef>>,
}

impl ScopeMap {
    fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    fn enter_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    fn exit_frame(&mut self) {
        self.frames.pop();
    }

    fn insert(&mut self, name: &str, ty: TypeRef) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), ty);
        }
    }

    fn look_up(&self, name: &str) -> Option<TypeRef> {
        for frame in self.frames.iter().rev() {
            if let Some(ty) = frame.get(name) {
                return Some(*ty);
            }
        }
        None
    }

    fn look_up_local(&self, name: &str) -> Option<TypeRef> {
        self.frames.last().and_then(|frame| frame.get(name).copied())
    }

    fn names(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .frames
            .iter()
            .flat_map(|frame| frame.keys().cloned())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Cache handle for a function instance, installed before the instance body
/// is rewritten so that recursive calls resolve to the in-progress instance.
#[derive(Clone, Copy)]
struct FnHandle {
    id: u32,
    ret: TypeRef,
}

type InstKey = (usize, Vec<TypeRef>);

pub fn analyze(file: &SourceFile, path: PathBuf, diags: &mut Diagnostics) -> InstProgram {
    let mut functions = Vec::new();
    let mut structs = Vec::new();
    for item in &file.items {
        match item {
            Item::Function(func) => functions.push(func),
            Item::Struct(def) => structs.push(def),
        }
    }
    let mut analyzer = Analyzer {
        functions,
        structs,
        diags,
        program: InstProgram::new(path),
        void_type: None,
        int_type: None,
        struct_insts: HashMap::new(),
        fn_insts: HashMap::new(),
        variables: ScopeMap::new(),
        type_vars: ScopeMap::new(),
        ret_type: None,
    };
    analyzer.run();
    analyzer.program
}

struct Analyzer<'a> {
    functions: Vec<&'a Function>,
    structs: Vec<&'a StructDef>,
    diags: &'a mut Diagnostics,
    program: InstProgram,
    void_type: Option<TypeRef>,
    int_type: Option<TypeRef>,
    struct_insts: HashMap<InstKey, TypeRef>,
    fn_insts: HashMap<InstKey, FnHandle>,
    variables: ScopeMap,
    type_vars: ScopeMap,
    ret_type: Option<TypeRef>,
}

impl<'a> Analyzer<'a> {
    fn run(&mut self) {
        let void = self.get_void_type();
        if let Some(entry) = self.get_function("main", &[], Some(void), None) {
            self.program.entry_id = Some(entry.id);
        }
    }

    // Builtin singletons, allocated on first use so unused builtins never
    // appear in the program's type list.

    fn get_void_type(&mut self) -> TypeRef {
        match self.void_type {
            Some(ty) => ty,
            None => {
                let ty = self.program.alloc_type(TypeKind::Void);
                self.program.finish_type(ty);
                self.void_type = Some(ty);
                ty
            }
        }
    }

    fn get_int_type(&mut self) -> TypeRef {
        match self.int_type {
            Some(ty) => ty,
            None => {
                let ty = self.program.alloc_type(TypeKind::Int);
                self.program.finish_type(ty);
                self.int_type = Some(ty);
                ty
            }
        }
    }

    // ---- type resolution ----

    /// Resolves a type expression (a name, or a generic application) against
    /// the in-scope type variables and the struct definitions.
    fn handle_type(&mut self, expr: Option<&'a Expr>) -> Option<TypeRef> {
        let expr = expr?;
        match &expr.kind {
            ExprKind::Ident(name) => {
                if let Some(ty) = self.type_vars.look_up(name) {
                    return Some(ty);
                }
                self.get_type(name, Vec::new(), Some(&expr.span))
            }
            ExprKind::Call { callee, args } => {
                let name = match &callee.kind {
                    ExprKind::Ident(name) => name.clone(),
                    _ => {
                        self.diags
                            .error("invalid expression, expected a name", Some(callee.span.clone()));
                        return None;
                    }
                };
                let resolved: Vec<Option<TypeRef>> = args
                    .iter()
                    .map(|arg| self.handle_type(Some(arg)))
                    .collect();
                let arg_types: Option<Vec<TypeRef>> = resolved.into_iter().collect();
                self.get_type(&name, arg_types?, Some(&expr.span))
            }
            _ => None,
        }
    }

    fn get_type(&mut self, name: &str, args: Vec<TypeRef>, span: Option<&Span>) -> Option<TypeRef> {
        if name == "Void" && args.is_empty() {
            return Some(self.get_void_type());
        }
        if name == "Int" && args.is_empty() {
            return Some(self.get_int_type());
        }
        let candidates: Vec<usize> = (0..self.structs.len())
            .filter(|&si| self.structs[si].name == name)
            .collect();
        if candidates.is_empty() {
            let mut diag = Diagnostic::new(
                Severity::Error,
                format!("struct \"{}\" not found", name),
                span.cloned(),
            );
            if let Some(hint) = suggest::did_you_mean(name, self.type_candidates()) {
                diag = diag.help(hint);
            }
            self.diags.push_diag(diag);
            return None;
        }
        // Arity participates in selection so that e.g. `X` and `X<T>` can
        // coexist; only same-name same-arity definitions are ambiguous.
        let arity_matches: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&si| self.structs[si].type_params.len() == args.len())
            .collect();
        match arity_matches.len() {
            1 => self.instantiate_structure(arity_matches[0], args),
            0 => {
                let expected = self.structs[candidates[0]].type_params.len();
                self.diags.error(
                    format!(
                        "invalid number of template arguments for struct \"{}\", expected {}",
                        name,
                        plural(expected, "template argument")
                    ),
                    span.cloned(),
                );
                None
            }
            n => {
                self.diags.error(
                    format!("{} structs named \"{}\" found", n, name),
                    span.cloned(),
                );
                None
            }
        }
    }

    fn type_candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = self.structs.iter().map(|def| def.name.clone()).collect();
        out.push("Int".to_string());
        out.push("Void".to_string());
        out.extend(self.type_vars.names());
        out.sort();
        out.dedup();
        out
    }

    fn instantiate_structure(&mut self, si: usize, type_args: Vec<TypeRef>) -> Option<TypeRef> {
        let def = self.structs[si];
        if type_args.len() != def.type_params.len() {
            return None;
        }
        let key = (si, type_args.clone());
        if let Some(ty) = self.struct_insts.get(&key) {
            return Some(*ty);
        }
        log::debug!(
            "instantiating struct {} with {} type argument(s)",
            def.name,
            type_args.len()
        );
        let ty = self.program.alloc_type(TypeKind::Struct(StructInstance {
            origin: si,
            name: def.name.clone(),
            type_args: type_args.clone(),
            members: Vec::new(),
        }));
        // Installed before the members are resolved so self-referential
        // generics bottom out on the cache.
        self.struct_insts.insert(key, ty);
        let saved_type_vars = mem::replace(&mut self.type_vars, ScopeMap::new());
        for (param, arg) in def.type_params.iter().zip(&type_args) {
            self.type_vars.insert(param, *arg);
        }
        for member in &def.members {
            if let Some(member_ty) = self.handle_type(Some(&member.ty)) {
                if let TypeKind::Struct(inst) = &mut self.program.type_data_mut(ty).kind {
                    inst.members.push((member.name.clone(), member_ty));
                }
            }
        }
        self.type_vars = saved_type_vars;
        self.program.finish_type(ty);
        Some(ty)
    }

    // ---- unification and overload resolution ----

    /// Asymmetric first-order unification of a definition's formal argument
    /// patterns against actual types, inferring the template arguments.
    /// Returns the full assignment or nothing; never partial.
    fn unify(
        &mut self,
        func: &'a Function,
        arg_types: &[Option<TypeRef>],
        expected_ret: Option<TypeRef>,
    ) -> Option<Vec<TypeRef>> {
        if func.params.len() != arg_types.len() {
            return None;
        }
        let mut bindings: Vec<Option<TypeRef>> = vec![None; func.type_params.len()];
        for (param, actual) in func.params.iter().zip(arg_types) {
            let actual = (*actual)?;
            if !self.match_type(func, &mut bindings, &param.ty, actual) {
                return None;
            }
        }
        if let Some(expected) = expected_ret {
            match &func.ret_type {
                Some(ret) => {
                    if !self.match_type(func, &mut bindings, ret, expected) {
                        return None;
                    }
                }
                None => {
                    // An absent return type means Void.
                    if expected != self.get_void_type() {
                        return None;
                    }
                }
            }
        }
        bindings.into_iter().collect()
    }

    fn match_type(
        &mut self,
        func: &'a Function,
        bindings: &mut Vec<Option<TypeRef>>,
        formal: &'a Expr,
        actual: TypeRef,
    ) -> bool {
        match &formal.kind {
            ExprKind::Ident(name) => {
                if let Some(i) = func.type_params.iter().position(|p| p == name) {
                    match bindings[i] {
                        Some(bound) => bound == actual,
                        None => {
                            bindings[i] = Some(actual);
                            true
                        }
                    }
                } else {
                    match self.get_type(name, Vec::new(), Some(&formal.span)) {
                        Some(ty) => ty == actual,
                        None => false,
                    }
                }
            }
            ExprKind::Call { callee, args } => {
                let name = match &callee.kind {
                    ExprKind::Ident(name) => name,
                    _ => return false,
                };
                let (inst_name, inst_args) = match &self.program.type_data(actual).kind {
                    TypeKind::Struct(inst) => (inst.name.clone(), inst.type_args.clone()),
                    _ => return false,
                };
                if *name != inst_name || args.len() != inst_args.len() {
                    return false;
                }
                args.iter()
                    .zip(inst_args)
                    .all(|(formal_arg, actual_arg)| {
                        self.match_type(func, bindings, formal_arg, actual_arg)
                    })
            }
            _ => false,
        }
    }

    fn get_function(
        &mut self,
        name: &str,
        arg_types: &[Option<TypeRef>],
        expected_ret: Option<TypeRef>,
        span: Option<&Span>,
    ) -> Option<FnHandle> {
        let mut matches = Vec::new();
        for fi in 0..self.functions.len() {
            let func = self.functions[fi];
            if func.name != name {
                continue;
            }
            if let Some(type_args) = self.unify(func, arg_types, expected_ret) {
                matches.push((fi, type_args));
            }
        }
        match matches.len() {
            1 => {
                let (fi, type_args) = matches.pop()?;
                self.instantiate_function(fi, type_args)
            }
            0 => {
                let mut diag = Diagnostic::new(
                    Severity::Error,
                    format!("no matching function \"{}\" found", name),
                    span.cloned(),
                );
                if let Some(hint) = suggest::did_you_mean(name, self.function_candidates()) {
                    diag = diag.help(hint);
                }
                self.diags.push_diag(diag);
                None
            }
            n => {
                self.diags.error(
                    format!("{} matching functions \"{}\" found", n, name),
                    span.cloned(),
                );
                None
            }
        }
    }

    fn function_candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = self.functions.iter().map(|func| func.name.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    fn instantiate_function(&mut self, fi: usize, type_args: Vec<TypeRef>) -> Option<FnHandle> {
        let func = self.functions[fi];
        if type_args.len() != func.type_params.len() {
            return None;
        }
        let key = (fi, type_args.clone());
        if let Some(handle) = self.fn_insts.get(&key) {
            return Some(*handle);
        }
        log::debug!(
            "instantiating function {} with {} type argument(s)",
            func.name,
            type_args.len()
        );
        let id = self.program.take_id();
        let saved_type_vars = mem::replace(&mut self.type_vars, ScopeMap::new());
        for (param, arg) in func.type_params.iter().zip(&type_args) {
            self.type_vars.insert(param, *arg);
        }
        let saved_variables = mem::replace(&mut self.variables, ScopeMap::new());
        let mut params = Vec::new();
        for param in &func.params {
            match self.handle_type(Some(&param.ty)) {
                Some(ty) => {
                    self.variables.insert(&param.name, ty);
                    params.push((param.name.clone(), ty));
                }
                None => {
                    // The unresolved type is already reported; a placeholder
                    // keeps the instance shape intact while the remaining
                    // body is still analysed for independent errors.
                    let placeholder = self.get_void_type();
                    params.push((param.name.clone(), placeholder));
                }
            }
        }
        let ret_type = match &func.ret_type {
            Some(ret) => self.handle_type(Some(ret)),
            None => None,
        }
        .unwrap_or_else(|| self.get_void_type());
        let handle = FnHandle { id, ret: ret_type };
        // Installed before the body is rewritten so direct recursion
        // terminates on the cache.
        self.fn_insts.insert(key, handle);
        let saved_ret = mem::replace(&mut self.ret_type, Some(ret_type));
        let body = self.handle_block(&func.body);
        let void = self.get_void_type();
        if ret_type != void && !block_has_return(&func.body) {
            self.diags.warning(
                format!("non-Void function \"{}\" has no return statement", func.name),
                Some(func.span.clone()),
            );
        }
        self.ret_type = saved_ret;
        self.variables = saved_variables;
        self.type_vars = saved_type_vars;
        self.program.functions.push(FunctionInst {
            id,
            origin: fi,
            name: func.name.clone(),
            type_args,
            params,
            ret_type,
            body,
        });
        Some(handle)
    }

    // ---- expression and statement rewriting ----

    fn check_type(&mut self, expr: &Option<TypedExpr>, expected: Option<TypeRef>, error: &mut bool) {
        if let (Some(expr), Some(expected)) = (expr, expected) {
            if expr.ty != expected {
                self.diags.error(
                    format!(
                        "invalid type {}, expected type {}",
                        self.program.type_name(expr.ty),
                        self.program.type_name(expected)
                    ),
                    Some(expr.span.clone()),
                );
                *error = true;
            }
        }
    }

    fn handle_expr(&mut self, expr: &'a Expr, expected: Option<TypeRef>) -> Option<TypedExpr> {
        match &expr.kind {
            ExprKind::Int(value) => {
                let ty = self.get_int_type();
                Some(TypedExpr {
                    kind: TypedExprKind::Int(*value),
                    ty,
                    span: expr.span.clone(),
                })
            }
            ExprKind::Ident(name) => match self.variables.look_up(name) {
                Some(ty) => Some(TypedExpr {
                    kind: TypedExprKind::Ident(name.clone()),
                    ty,
                    span: expr.span.clone(),
                }),
                None => {
                    let mut diag = Diagnostic::new(
                        Severity::Error,
                        format!("undefined variable \"{}\"", name),
                        Some(expr.span.clone()),
                    );
                    if let Some(hint) = suggest::did_you_mean(name, self.variables.names()) {
                        diag = diag.help(hint);
                    }
                    self.diags.push_diag(diag);
                    None
                }
            },
            ExprKind::Binary { op, left, right } => {
                let left = self.handle_expr(left, None);
                let right = self.handle_expr(right, None);
                let mut error = left.is_none() || right.is_none();
                let int = self.get_int_type();
                if let (Some(left), Some(right)) = (&left, &right) {
                    if !(left.ty == int && right.ty == int) {
                        self.diags
                            .error("invalid binary expression", Some(expr.span.clone()));
                        error = true;
                    }
                }
                if error {
                    return None;
                }
                Some(TypedExpr {
                    kind: TypedExprKind::Binary {
                        op: *op,
                        left: Box::new(left?),
                        right: Box::new(right?),
                    },
                    ty: int,
                    span: expr.span.clone(),
                })
            }
            ExprKind::Assign { left, right } => {
                let left = self.handle_expr(left, None);
                let right = self.handle_expr(right, None);
                let ty = left.as_ref().map(|l| l.ty);
                let mut error = left.is_none() || right.is_none();
                if let Some(left) = &left {
                    if !matches!(left.kind, TypedExprKind::Ident(_)) {
                        self.diags
                            .error("invalid expression, expected a name", Some(left.span.clone()));
                        error = true;
                    }
                }
                self.check_type(&right, ty, &mut error);
                if error {
                    return None;
                }
                Some(TypedExpr {
                    kind: TypedExprKind::Assign {
                        left: Box::new(left?),
                        right: Box::new(right?),
                    },
                    ty: ty?,
                    span: expr.span.clone(),
                })
            }
            ExprKind::Call { callee, args } => {
                let mut rewritten: Vec<Option<TypedExpr>> = Vec::new();
                // Uniform function call syntax: a call through a member
                // access becomes a free call with the receiver prepended.
                let name = match &callee.kind {
                    ExprKind::Field { base, name } => {
                        rewritten.push(self.handle_expr(base, None));
                        name.clone()
                    }
                    ExprKind::Ident(name) => name.clone(),
                    _ => {
                        self.diags
                            .error("invalid expression, expected a name", Some(callee.span.clone()));
                        return None;
                    }
                };
                for arg in args {
                    rewritten.push(self.handle_expr(arg, None));
                }
                let arg_types: Vec<Option<TypeRef>> =
                    rewritten.iter().map(|arg| arg.as_ref().map(|a| a.ty)).collect();
                let target = self.get_function(&name, &arg_types, expected, Some(&expr.span))?;
                let args: Option<Vec<TypedExpr>> = rewritten.into_iter().collect();
                Some(TypedExpr {
                    kind: TypedExprKind::Call {
                        target: target.id,
                        args: args?,
                    },
                    ty: target.ret,
                    span: expr.span.clone(),
                })
            }
            ExprKind::Field { base, name } => {
                let base = self.handle_expr(base, None)?;
                let ty = self.get_member_type(base.ty, name, &expr.span)?;
                Some(TypedExpr {
                    kind: TypedExprKind::Field {
                        base: Box::new(base),
                        name: name.clone(),
                    },
                    ty,
                    span: expr.span.clone(),
                })
            }
        }
    }

    fn get_member_type(&mut self, ty: TypeRef, member: &str, span: &Span) -> Option<TypeRef> {
        match &self.program.type_data(ty).kind {
            TypeKind::Struct(inst) => match inst.member_type(member) {
                Some(member_ty) => Some(member_ty),
                None => {
                    let name = self.program.type_name(ty);
                    self.diags.error(
                        format!("struct {} does not have a field named \"{}\"", name, member),
                        Some(span.clone()),
                    );
                    None
                }
            },
            _ => {
                let name = self.program.type_name(ty);
                self.diags.error(
                    format!("invalid type {}, expected a struct type", name),
                    Some(span.clone()),
                );
                None
            }
        }
    }

    fn handle_block(&mut self, block: &'a Block) -> TypedBlock {
        self.variables.enter_frame();
        let mut stmts = Vec::new();
        for stmt in &block.stmts {
            // Failed statements are dropped; their siblings still get
            // analysed so independent errors all surface in one run.
            if let Some(stmt) = self.handle_stmt(stmt) {
                stmts.push(stmt);
            }
        }
        self.variables.exit_frame();
        TypedBlock { stmts }
    }

    fn handle_stmt(&mut self, stmt: &'a Stmt) -> Option<TypedStmt> {
        match stmt {
            Stmt::Block { block, .. } => Some(TypedStmt::Block(self.handle_block(block))),
            Stmt::Empty { .. } => Some(TypedStmt::Empty),
            Stmt::Let {
                name,
                ty,
                init,
                span,
            } => {
                let declared = self.handle_type(ty.as_ref());
                let init = self.handle_expr(init, declared);
                let final_ty = declared.or_else(|| init.as_ref().map(|e| e.ty));
                let mut error = final_ty.is_none() || init.is_none();
                self.check_type(&init, final_ty, &mut error);
                if self.variables.look_up_local(name).is_some() {
                    self.diags.error(
                        format!("redeclaration of variable \"{}\"", name),
                        Some(span.clone()),
                    );
                    error = true;
                } else if let Some(final_ty) = final_ty {
                    // Inserted before the error verdict so later statements
                    // in the same block still see the binding.
                    self.variables.insert(name, final_ty);
                }
                if error {
                    return None;
                }
                Some(TypedStmt::Let {
                    name: name.clone(),
                    ty: final_ty?,
                    init: init?,
                })
            }
            Stmt::If {
                cond,
                then_stmt,
                else_stmt,
                ..
            } => {
                let int = self.get_int_type();
                let cond = self.handle_expr(cond, Some(int));
                let then_stmt = self.handle_stmt(then_stmt);
                let else_stmt = match else_stmt {
                    Some(else_stmt) => self.handle_stmt(else_stmt),
                    None => Some(TypedStmt::Empty),
                };
                let mut error = cond.is_none() || then_stmt.is_none() || else_stmt.is_none();
                self.check_type(&cond, Some(int), &mut error);
                if error {
                    return None;
                }
                Some(TypedStmt::If {
                    cond: cond?,
                    then_stmt: Box::new(then_stmt?),
                    else_stmt: Box::new(else_stmt?),
                })
            }
            Stmt::While { cond, body, .. } => {
                let int = self.get_int_type();
                let cond = self.handle_expr(cond, Some(int));
                let body = self.handle_stmt(body);
                let mut error = cond.is_none() || body.is_none();
                self.check_type(&cond, Some(int), &mut error);
                if error {
                    return None;
                }
                Some(TypedStmt::While {
                    cond: cond?,
                    body: Box::new(body?),
                })
            }
            Stmt::Return { expr, span } => match expr {
                Some(expr) => {
                    let rewritten = self.handle_expr(expr, None);
                    let mut error = rewritten.is_none();
                    self.check_type(&rewritten, self.ret_type, &mut error);
                    if error {
                        return None;
                    }
                    Some(TypedStmt::Return {
                        expr: Some(rewritten?),
                    })
                }
                None => {
                    let void = self.get_void_type();
                    if let Some(ret) = self.ret_type {
                        if ret != void {
                            self.diags.error(
                                format!(
                                    "missing return value, expected type {}",
                                    self.program.type_name(ret)
                                ),
                                Some(span.clone()),
                            );
                            return None;
                        }
                    }
                    Some(TypedStmt::Return { expr: None })
                }
            },
            Stmt::Expr { expr, .. } => {
                let expr = self.handle_expr(expr, None)?;
                Some(TypedStmt::Expr(expr))
            }
        }
    }
}

fn block_has_return(block: &Block) -> bool {
    block.stmts.iter().any(stmt_has_return)
}

fn stmt_has_return(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return { .. } => true,
        Stmt::Block { block, .. } => block_has_return(block),
        Stmt::If {
            then_stmt,
            else_stmt,
            ..
        } => {
            stmt_has_return(then_stmt)
                || else_stmt.as_deref().map(stmt_has_return).unwrap_or(false)
        }
        Stmt::While { body, .. } => stmt_has_return(body),
        Stmt::Empty { .. } | Stmt::Let { .. } | Stmt::Expr { .. } => false,
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

#[cfg(test)]
mod tests {
    use super::analyze;
    use crate::frontend::diagnostic::Diagnostics;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;
    use crate::sema::types::{
        FunctionInst, InstProgram, StructInstance, TypeKind, TypedBlock, TypedExpr, TypedExprKind,
        TypedStmt,
    };
    use std::path::PathBuf;

    fn run(source: &str) -> (InstProgram, Diagnostics) {
        let tokens = Lexer::new(source).lex_all();
        let mut parser = Parser::new(tokens);
        let file = parser.parse_file();
        assert!(
            !parser.diags.has_errors(),
            "unexpected parser diagnostics in test"
        );
        let mut diags = parser.diags;
        let program = analyze(&file, PathBuf::from("test.joy"), &mut diags);
        (program, diags)
    }

    fn run_ok(source: &str) -> InstProgram {
        let (program, diags) = run(source);
        assert!(
            !diags.has_errors(),
            "unexpected semantic errors: {:?}",
            diags.errors
        );
        program
    }

    fn error_messages(diags: &Diagnostics) -> Vec<String> {
        diags.errors.iter().map(|d| d.message.clone()).collect()
    }

    fn instance<'p>(program: &'p InstProgram, name: &str) -> &'p FunctionInst {
        let mut found: Vec<&FunctionInst> = program
            .functions
            .iter()
            .filter(|func| func.name == name)
            .collect();
        assert_eq!(found.len(), 1, "expected exactly one instance of {}", name);
        found.pop().expect("instance")
    }

    fn struct_instances(program: &InstProgram) -> Vec<&StructInstance> {
        program
            .types_in_order()
            .filter_map(|data| match &data.kind {
                TypeKind::Struct(inst) => Some(inst),
                _ => None,
            })
            .collect()
    }

    fn collect_exprs<'p>(block: &'p TypedBlock, out: &mut Vec<&'p TypedExpr>) {
        for stmt in &block.stmts {
            collect_stmt_exprs(stmt, out);
        }
    }

    fn collect_stmt_exprs<'p>(stmt: &'p TypedStmt, out: &mut Vec<&'p TypedExpr>) {
        match stmt {
            TypedStmt::Block(block) => collect_exprs(block, out),
            TypedStmt::Empty => {}
            TypedStmt::Let { init, .. } => collect_expr(init, out),
            TypedStmt::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                collect_expr(cond, out);
                collect_stmt_exprs(then_stmt, out);
                collect_stmt_exprs(else_stmt, out);
            }
            TypedStmt::While { cond, body } => {
                collect_expr(cond, out);
                collect_stmt_exprs(body, out);
            }
            TypedStmt::Return { expr } => {
                if let Some(expr) = expr {
                    collect_expr(expr, out);
                }
            }
            TypedStmt::Expr(expr) => collect_expr(expr, out),
        }
    }

    fn collect_expr<'p>(expr: &'p TypedExpr, out: &mut Vec<&'p TypedExpr>) {
        out.push(expr);
        match &expr.kind {
            TypedExprKind::Binary { left, right, .. }
            | TypedExprKind::Assign { left, right } => {
                collect_expr(left, out);
                collect_expr(right, out);
            }
            TypedExprKind::Call { args, .. } => {
                for arg in args {
                    collect_expr(arg, out);
                }
            }
            TypedExprKind::Field { base, .. } => collect_expr(base, out),
            TypedExprKind::Int(_) | TypedExprKind::Ident(_) => {}
        }
    }

    // ---- end-to-end pass behaviour ----

    #[test]
    fn empty_main_instantiates_entry() {
        let program = run_ok("func main() { }");
        assert_eq!(program.functions.len(), 1);
        let main = instance(&program, "main");
        assert!(matches!(
            program.type_data(main.ret_type).kind,
            TypeKind::Void
        ));
        assert_eq!(program.entry_id, Some(main.id));
        assert!(main.id != 0);
    }

    #[test]
    fn let_infers_int_from_binary_expression() {
        let program = run_ok("func main() { let x = 1 + 2; x; }");
        let main = instance(&program, "main");
        match &main.body.stmts[0] {
            TypedStmt::Let { name, ty, init } => {
                assert_eq!(name, "x");
                assert!(matches!(program.type_data(*ty).kind, TypeKind::Int));
                assert!(matches!(init.kind, TypedExprKind::Binary { .. }));
                assert!(matches!(program.type_data(init.ty).kind, TypeKind::Int));
            }
            other => panic!("expected let, got {:?}", other),
        }
        match &main.body.stmts[1] {
            TypedStmt::Expr(expr) => {
                assert!(matches!(program.type_data(expr.ty).kind, TypeKind::Int));
            }
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn generic_identity_instantiates_once_at_int() {
        let program = run_ok(
            "func id<T>(x: T): T { return x; }\n\
             func main() { let a: Int = id(7); }",
        );
        let id = instance(&program, "id");
        assert_eq!(id.type_args.len(), 1);
        assert_eq!(program.type_name(id.type_args[0]), "Int");
        assert_eq!(program.type_name(id.ret_type), "Int");
    }

    #[test]
    fn unknown_call_reports_no_matching_function() {
        let (program, diags) = run("func main() { f(1); }");
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "no matching function \"f\" found"));
        assert!(program.functions.iter().all(|func| func.name != "f"));
        // The failing statement is dropped but main itself still exists.
        let main = instance(&program, "main");
        assert!(main.body.stmts.is_empty());
        assert_eq!(program.entry_id, Some(main.id));
    }

    #[test]
    fn member_access_types_from_struct_instantiation() {
        let program = run_ok(
            "struct Pair<A, B> { x: A, y: B }\n\
             func mk(): Pair<Int, Int> { }\n\
             func main() { let p: Pair<Int, Int> = mk(); p.x; }",
        );
        let structs = struct_instances(&program);
        assert_eq!(structs.len(), 1);
        assert_eq!(structs[0].name, "Pair");
        assert_eq!(structs[0].type_args.len(), 2);
        assert_eq!(program.type_name(structs[0].type_args[0]), "Int");
        assert_eq!(program.type_name(structs[0].type_args[1]), "Int");
        let main = instance(&program, "main");
        match &main.body.stmts[1] {
            TypedStmt::Expr(expr) => {
                assert!(matches!(expr.kind, TypedExprKind::Field { .. }));
                assert!(matches!(program.type_data(expr.ty).kind, TypeKind::Int));
            }
            other => panic!("expected member access statement, got {:?}", other),
        }
    }

    #[test]
    fn ufcs_call_selects_receiver_overload() {
        let program = run_ok(
            "struct A { }\n\
             func f(this: A): Int { return 1; }\n\
             struct B { }\n\
             func f(this: B): Int { return 2; }\n\
             func mk(): A { }\n\
             func main() { let a: A = mk(); let r: Int = a.f(); }",
        );
        let f = instance(&program, "f");
        assert_eq!(program.type_name(f.params[0].1), "A");
        let main = instance(&program, "main");
        match &main.body.stmts[1] {
            TypedStmt::Let { init, .. } => match &init.kind {
                TypedExprKind::Call { target, args } => {
                    assert_eq!(*target, f.id);
                    assert_eq!(args.len(), 1);
                    assert!(matches!(args[0].kind, TypedExprKind::Ident(_)));
                    assert!(program.function_by_id(*target).is_some());
                }
                other => panic!("expected lowered call, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
        // Trying the B overload during resolution instantiates B as a side
        // effect even though the overload loses.
        assert!(struct_instances(&program).iter().any(|s| s.name == "B"));
    }

    #[test]
    fn if_condition_is_int_typed() {
        let program = run_ok("func main() { if (1) { } else { } }");
        let main = instance(&program, "main");
        match &main.body.stmts[0] {
            TypedStmt::If { cond, .. } => {
                assert!(matches!(program.type_data(cond.ty).kind, TypeKind::Int));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn true_condition_is_integer_one() {
        let program = run_ok("func main() { if (true) { } }");
        let main = instance(&program, "main");
        match &main.body.stmts[0] {
            TypedStmt::If { cond, else_stmt, .. } => {
                assert!(matches!(cond.kind, TypedExprKind::Int(1)));
                assert!(matches!(**else_stmt, TypedStmt::Empty));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn template_arity_disambiguates_same_name_structs() {
        let program = run_ok(
            "struct X { }\n\
             struct X<T> { v: T }\n\
             func mk(): X { }\n\
             func mk2(): X<Int> { }\n\
             func main() { let a: X = mk(); let b: X<Int> = mk2(); }",
        );
        let structs = struct_instances(&program);
        assert_eq!(structs.iter().filter(|s| s.name == "X").count(), 2);
    }

    #[test]
    fn duplicate_structs_with_same_arity_are_ambiguous() {
        let (_, diags) = run(
            "struct X { }\n\
             struct X { }\n\
             func mk(): X { }\n\
             func main() { let a: X = mk(); }",
        );
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "2 structs named \"X\" found"));
    }

    // ---- scoping and error tolerance ----

    #[test]
    fn redeclaration_in_same_frame_is_an_error() {
        let (_, diags) = run("func main() { let x = 1; let x = 2; }");
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "redeclaration of variable \"x\""));
    }

    #[test]
    fn shadowing_across_frames_is_permitted() {
        run_ok("func main() { let x = 1; { let x = 2; x; } x; }");
    }

    #[test]
    fn undefined_variable_reports_and_continues_with_siblings() {
        let (_, diags) = run("func main() { y; z; let x = 1; x; }");
        let messages = error_messages(&diags);
        assert!(messages.iter().any(|m| m == "undefined variable \"y\""));
        assert!(messages.iter().any(|m| m == "undefined variable \"z\""));
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn assignment_left_side_must_be_a_name() {
        let (_, diags) = run("func main() { 1 = 2; }");
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "invalid expression, expected a name"));
    }

    #[test]
    fn binary_operands_must_be_int() {
        let (_, diags) = run(
            "struct A { }\n\
             func mk(): A { }\n\
             func main() { let a: A = mk(); a + 1; }",
        );
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "invalid binary expression"));
    }

    #[test]
    fn condition_type_mismatch_is_reported() {
        let (_, diags) = run(
            "struct A { }\n\
             func mk(): A { }\n\
             func main() { let a: A = mk(); while (a) { } }",
        );
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "invalid type A, expected type Int"));
    }

    #[test]
    fn member_access_on_non_struct_is_reported() {
        let (_, diags) = run("func main() { let x = 1; x.y; }");
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "invalid type Int, expected a struct type"));
    }

    #[test]
    fn missing_member_is_reported_with_struct_name() {
        let (_, diags) = run(
            "struct Pair<A, B> { x: A, y: B }\n\
             func mk(): Pair<Int, Int> { }\n\
             func main() { let p: Pair<Int, Int> = mk(); p.z; }",
        );
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "struct Pair<Int, Int> does not have a field named \"z\""));
    }

    #[test]
    fn unknown_type_reports_struct_not_found() {
        let (_, diags) = run("func main() { let x: Missing = 1; }");
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "struct \"Missing\" not found"));
    }

    #[test]
    fn wrong_template_arity_is_reported() {
        let (_, diags) = run(
            "struct Pair<A, B> { x: A, y: B }\n\
             func main() { let p: Pair<Int> = 1; }",
        );
        assert!(error_messages(&diags).iter().any(
            |m| m == "invalid number of template arguments for struct \"Pair\", expected 2 template arguments"
        ));
    }

    #[test]
    fn ambiguous_overloads_are_reported() {
        let (_, diags) = run(
            "func f(x: Int) { }\n\
             func f(y: Int) { }\n\
             func main() { f(1); }",
        );
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "2 matching functions \"f\" found"));
    }

    // ---- generics ----

    #[test]
    fn direct_recursion_terminates_via_cache() {
        let program = run_ok(
            "func r<T>(x: T) { r(x); }\n\
             func main() { r(1); }",
        );
        let r = instance(&program, "r");
        assert_eq!(program.type_name(r.type_args[0]), "Int");
    }

    #[test]
    fn return_type_expectation_drives_inference() {
        let program = run_ok(
            "struct Box<T> { v: T }\n\
             func make<T>(): Box<T> { }\n\
             func main() { let b: Box<Int> = make(); }",
        );
        let make = instance(&program, "make");
        assert_eq!(program.type_name(make.type_args[0]), "Int");
        assert_eq!(program.type_name(make.ret_type), "Box<Int>");
    }

    #[test]
    fn undetermined_template_parameter_rejects_candidate() {
        let (_, diags) = run(
            "func make<T>(): Int { return 0; }\n\
             func main() { let x: Int = make(); }",
        );
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "no matching function \"make\" found"));
    }

    #[test]
    fn repeated_calls_share_one_instantiation() {
        let program = run_ok(
            "func id<T>(x: T): T { return x; }\n\
             func main() { let a: Int = id(7); let b: Int = id(8); }",
        );
        assert_eq!(
            program
                .functions
                .iter()
                .filter(|func| func.name == "id")
                .count(),
            1
        );
    }

    #[test]
    fn structurally_equal_types_share_one_object() {
        let program = run_ok(
            "struct Pair<A, B> { x: A, y: B }\n\
             func mk(): Pair<Int, Int> { }\n\
             func f(p: Pair<Int, Int>): Int { return p.x; }\n\
             func main() { let p: Pair<Int, Int> = mk(); let r: Int = f(p); }",
        );
        assert_eq!(
            struct_instances(&program)
                .iter()
                .filter(|s| s.name == "Pair")
                .count(),
            1
        );
        let mk = instance(&program, "mk");
        let f = instance(&program, "f");
        assert_eq!(mk.ret_type, f.params[0].1);
    }

    // ---- return checking (added on top of the original pass) ----

    #[test]
    fn return_value_type_is_checked() {
        let (_, diags) = run(
            "func g() { return 1; }\n\
             func main() { g(); }",
        );
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "invalid type Int, expected type Void"));
    }

    #[test]
    fn bare_return_in_non_void_function_is_an_error() {
        let (_, diags) = run(
            "func g(): Int { return; }\n\
             func main() { let x: Int = g(); }",
        );
        assert!(error_messages(&diags)
            .iter()
            .any(|m| m == "missing return value, expected type Int"));
    }

    #[test]
    fn missing_return_in_non_void_function_warns() {
        let (program, diags) = run(
            "struct A { }\n\
             func mk(): A { }\n\
             func main() { let a: A = mk(); }",
        );
        assert!(!diags.has_errors());
        assert!(diags
            .warnings
            .iter()
            .any(|d| d.message == "non-Void function \"mk\" has no return statement"));
        assert!(program.entry_id.is_some());
    }

    // ---- universal invariants ----

    fn invariant_corpus() -> Vec<String> {
        let mut corpus = vec![
            "func main() { }".to_string(),
            "func main() { let x = 1 + 2 * 3; while (x > 0) { x = x - 1; } }".to_string(),
            "func id<T>(x: T): T { return x; }\n\
             func main() { let a: Int = id(1); let b: Int = id(a); }"
                .to_string(),
            "struct Pair<A, B> { x: A, y: B }\n\
             struct Box<T> { v: T }\n\
             func mk(): Pair<Int, Box<Int>> { }\n\
             func main() { let p: Pair<Int, Box<Int>> = mk(); p.y; }"
                .to_string(),
        ];
        // A family of programs with a growing chain of generic calls.
        for depth in 1..5 {
            let mut source = String::from("func id<T>(x: T): T { return x; }\n");
            source.push_str("func main() { let a: Int = ");
            for _ in 0..depth {
                source.push_str("id(");
            }
            source.push('1');
            for _ in 0..depth {
                source.push(')');
            }
            source.push_str("; }");
            corpus.push(source);
        }
        corpus
    }

    #[test]
    fn typed_closure_every_expression_has_a_program_type() {
        for source in invariant_corpus() {
            let program = run_ok(&source);
            for func in &program.functions {
                let mut exprs = Vec::new();
                collect_exprs(&func.body, &mut exprs);
                for expr in exprs {
                    assert!(program.contains_type(expr.ty));
                }
            }
        }
    }

    #[test]
    fn instantiation_uniqueness_holds() {
        for source in invariant_corpus() {
            let program = run_ok(&source);
            let mut seen = Vec::new();
            for func in &program.functions {
                let key = (func.origin, func.type_args.clone());
                assert!(
                    !seen.contains(&key),
                    "duplicate instantiation in {:?}",
                    source
                );
                seen.push(key);
            }
        }
    }

    #[test]
    fn ids_are_distinct_and_non_zero() {
        for source in invariant_corpus() {
            let program = run_ok(&source);
            let mut ids: Vec<u32> = program.types_in_order().map(|data| data.id).collect();
            ids.extend(program.functions.iter().map(|func| func.id));
            assert!(ids.iter().all(|id| *id != 0));
            let mut deduped = ids.clone();
            deduped.sort_unstable();
            deduped.dedup();
            assert_eq!(deduped.len(), ids.len());
        }
    }

    #[test]
    fn monomorphic_programs_are_fixed_points() {
        let program = run_ok(
            "struct P { a: Int }\n\
             func mk(): P { }\n\
             func read(p: P): Int { return p.a; }\n\
             func main() { let p: P = mk(); let r: Int = read(p); }",
        );
        // Every instance is the trivial instantiation of its definition, so
        // feeding the output back through monomorphisation would change
        // nothing.
        assert!(program.functions.iter().all(|f| f.type_args.is_empty()));
        assert!(struct_instances(&program)
            .iter()
            .all(|s| s.type_args.is_empty()));
    }

    #[test]
    fn pipeline_is_deterministic() {
        for source in invariant_corpus() {
            let first = run_ok(&source);
            let second = run_ok(&source);
            let shape = |program: &InstProgram| {
                let types: Vec<(u32, String)> = program
                    .types_in_order()
                    .map(|data| {
                        (
                            data.id,
                            match &data.kind {
                                TypeKind::Void => "Void".to_string(),
                                TypeKind::Int => "Int".to_string(),
                                TypeKind::Struct(inst) => format!("{:?}", inst),
                            },
                        )
                    })
                    .collect();
                (types, format!("{:?}", program.functions), program.entry_id)
            };
            assert_eq!(shape(&first), shape(&second));
        }
    }
}
