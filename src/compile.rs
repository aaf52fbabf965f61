use std::fs;
use std::path::Path;

use crate::codegen::emit_c;
use crate::frontend::diagnostic::{format_diagnostic, Diagnostics};
use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;
use crate::sema::analyze;

pub fn compile_to_c(path: &Path) -> Result<String, String> {
    let source = fs::read_to_string(path).map_err(|e| e.to_string())?;
    compile_source(&source, path)
}

pub fn compile_source(source: &str, path: &Path) -> Result<String, String> {
    let tokens = Lexer::new(source).lex_all();
    let mut parser = Parser::new(tokens);
    let file = parser.parse_file();
    let mut diags = parser.diags;
    // The semantic pass runs only on a clean parse.
    if diags.has_errors() {
        return Err(render_diags(&diags, source, Some(path)));
    }
    let program = analyze(&file, path.to_path_buf(), &mut diags);
    if diags.has_errors() {
        return Err(render_diags(&diags, source, Some(path)));
    }
    if !diags.is_empty() {
        eprint!("{}", render_diags(&diags, source, Some(path)));
    }
    let module = emit_c(&program)?;
    Ok(module.text)
}

fn render_diags(diags: &Diagnostics, source: &str, path: Option<&Path>) -> String {
    let name = path.map(|p| p.display().to_string());
    let mut out = String::new();
    for diag in diags.errors.iter().chain(diags.warnings.iter()) {
        out.push_str(&format_diagnostic(diag, source, name.as_deref()));
        out.push('\n');
    }
    out
}
