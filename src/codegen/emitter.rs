// Purpose: Render typed function bodies as C statement and expression text.
// Inputs/Outputs: Consumes the lowered AST and produces indented C fragments.
// Invariants: Runs only on error-free programs; type lookups must succeed.
// Gotchas: Field accesses are positional; the member index comes from the
// receiver's struct instance, not from the source name.

use crate::sema::types::{InstProgram, TypeKind, TypedBlock, TypedExpr, TypedExprKind, TypedStmt};

use super::c_type;

pub(crate) struct FnEmitter<'a> {
    program: &'a InstProgram,
}

impl<'a> FnEmitter<'a> {
    pub(crate) fn new(program: &'a InstProgram) -> Self {
        Self { program }
    }

    pub(crate) fn block_text(&self, block: &TypedBlock, indent: usize) -> Result<String, String> {
        let mut out = String::from("{\n");
        for stmt in &block.stmts {
            out.push_str(&pad(indent + 1));
            out.push_str(&self.stmt_text(stmt, indent + 1)?);
            out.push('\n');
        }
        out.push_str(&pad(indent));
        out.push('}');
        Ok(out)
    }

    fn stmt_text(&self, stmt: &TypedStmt, indent: usize) -> Result<String, String> {
        match stmt {
            TypedStmt::Block(block) => self.block_text(block, indent),
            TypedStmt::Empty => Ok(";".to_string()),
            TypedStmt::Let { name, ty, init } => Ok(format!(
                "{} v_{} = {};",
                c_type(self.program, *ty),
                name,
                self.expr_text(init)?
            )),
            TypedStmt::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                let mut out = format!(
                    "if ({}) {}",
                    self.expr_text(cond)?,
                    self.stmt_text(then_stmt, indent)?
                );
                if !matches!(**else_stmt, TypedStmt::Empty) {
                    out.push_str(&format!(" else {}", self.stmt_text(else_stmt, indent)?));
                }
                Ok(out)
            }
            TypedStmt::While { cond, body } => Ok(format!(
                "while ({}) {}",
                self.expr_text(cond)?,
                self.stmt_text(body, indent)?
            )),
            TypedStmt::Return { expr } => match expr {
                Some(expr) => Ok(format!("return {};", self.expr_text(expr)?)),
                None => Ok("return;".to_string()),
            },
            TypedStmt::Expr(expr) => Ok(format!("{};", self.expr_text(expr)?)),
        }
    }

    fn expr_text(&self, expr: &TypedExpr) -> Result<String, String> {
        match &expr.kind {
            TypedExprKind::Int(value) => Ok(format!("{}", value)),
            TypedExprKind::Ident(name) => Ok(format!("v_{}", name)),
            TypedExprKind::Binary { op, left, right } => Ok(format!(
                "({} {} {})",
                self.expr_text(left)?,
                op.symbol(),
                self.expr_text(right)?
            )),
            TypedExprKind::Assign { left, right } => Ok(format!(
                "({} = {})",
                self.expr_text(left)?,
                self.expr_text(right)?
            )),
            TypedExprKind::Call { target, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.expr_text(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("f{}({})", target, args.join(", ")))
            }
            TypedExprKind::Field { base, name } => {
                let index = match &self.program.type_data(base.ty).kind {
                    TypeKind::Struct(inst) => inst.member_index(name).ok_or_else(|| {
                        format!("struct field \"{}\" not found during emission", name)
                    })?,
                    _ => return Err("field access on a non-struct type during emission".to_string()),
                };
                Ok(format!("{}.m{}", self.expr_text(base)?, index))
            }
        }
    }
}

fn pad(indent: usize) -> String {
    "    ".repeat(indent)
}
