use crate::sema::types::{FunctionInst, InstProgram, TypeKind, TypeRef};

mod emitter;

use self::emitter::FnEmitter;

pub struct CModule {
    pub text: String,
}

pub fn emit_c(program: &InstProgram) -> Result<CModule, String> {
    let mut codegen = Codegen::new(program);
    codegen.emit_module()?;
    Ok(CModule {
        text: codegen.output,
    })
}

struct Codegen<'a> {
    program: &'a InstProgram,
    output: String,
}

impl<'a> Codegen<'a> {
    fn new(program: &'a InstProgram) -> Self {
        Self {
            program,
            output: String::new(),
        }
    }

    fn emit_module(&mut self) -> Result<(), String> {
        let entry = self
            .program
            .entry_id
            .ok_or_else(|| "entry function not set".to_string())?;
        if self
            .program
            .functions
            .iter()
            .any(|func| is_print_int_builtin(self.program, func))
        {
            self.output.push_str("#include <stdio.h>\n\n");
        }
        self.emit_types();
        for func in &self.program.functions {
            self.output.push_str(&self.function_decl(func));
            self.output.push_str(";\n");
        }
        if !self.program.functions.is_empty() {
            self.output.push('\n');
        }
        for func in &self.program.functions {
            self.emit_function(func)?;
        }
        self.output
            .push_str(&format!("int main(void) {{\n    f{}();\n    return 0;\n}}\n", entry));
        Ok(())
    }

    // The ordered type list has dependencies before dependents, so a single
    // forward pass produces complete member types for every typedef.
    fn emit_types(&mut self) {
        let mut text = String::new();
        for data in self.program.types_in_order() {
            let inst = match &data.kind {
                TypeKind::Struct(inst) => inst,
                _ => continue,
            };
            text.push_str("typedef struct {\n");
            if inst.members.is_empty() {
                text.push_str("    char _empty;\n");
            }
            for (i, (_, member_ty)) in inst.members.iter().enumerate() {
                text.push_str(&format!("    {} m{};\n", self.c_type(*member_ty), i));
            }
            text.push_str(&format!("}} t{};\n\n", data.id));
        }
        self.output.push_str(&text);
    }

    fn function_decl(&self, func: &FunctionInst) -> String {
        let params = if func.params.is_empty() {
            "void".to_string()
        } else {
            func.params
                .iter()
                .map(|(name, ty)| format!("{} v_{}", self.c_type(*ty), name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "static {} f{}({})",
            self.c_type(func.ret_type),
            func.id,
            params
        )
    }

    fn emit_function(&mut self, func: &FunctionInst) -> Result<(), String> {
        let decl = self.function_decl(func);
        if is_print_int_builtin(self.program, func) {
            let (name, _) = &func.params[0];
            self.output.push_str(&format!(
                "{} {{\n    printf(\"%d\\n\", v_{});\n}}\n\n",
                decl, name
            ));
            return Ok(());
        }
        let body = FnEmitter::new(self.program).block_text(&func.body, 0)?;
        self.output.push_str(&format!("{} {}\n\n", decl, body));
        Ok(())
    }

    fn c_type(&self, ty: TypeRef) -> String {
        c_type(self.program, ty)
    }
}

pub(crate) fn c_type(program: &InstProgram, ty: TypeRef) -> String {
    let data = program.type_data(ty);
    match &data.kind {
        TypeKind::Void => "void".to_string(),
        TypeKind::Int => "int".to_string(),
        TypeKind::Struct(_) => format!("t{}", data.id),
    }
}

/// The `print_int` builtin is recognised structurally at emission time: an
/// instance named `print_int` taking one `Int`, returning `Void`, with an
/// empty body. The semantic pass treats it as an ordinary function.
fn is_print_int_builtin(program: &InstProgram, func: &FunctionInst) -> bool {
    func.name == "print_int"
        && func.params.len() == 1
        && matches!(program.type_data(func.params[0].1).kind, TypeKind::Int)
        && matches!(program.type_data(func.ret_type).kind, TypeKind::Void)
        && func.body.stmts.is_empty()
}
