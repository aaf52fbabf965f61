use super::ast::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            severity,
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

#[derive(Default)]
pub struct Diagnostics {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn error(&mut self, message: impl Into<String>, span: Option<Span>) {
        self.errors
            .push(Diagnostic::new(Severity::Error, message, span));
    }

    pub fn warning(&mut self, message: impl Into<String>, span: Option<Span>) {
        self.warnings
            .push(Diagnostic::new(Severity::Warning, message, span));
    }

    pub fn push_diag(&mut self, diag: Diagnostic) {
        match diag.severity {
            Severity::Error => self.errors.push(diag),
            Severity::Warning => self.warnings.push(diag),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

pub fn format_diagnostic(diag: &Diagnostic, source: &str, path: Option<&str>) -> String {
    let mut out = String::new();
    let severity = diag.severity.label();
    match &diag.span {
        Some(span) => {
            let line_text = source.lines().nth(span.line.saturating_sub(1)).unwrap_or("");
            match path {
                Some(path) => out.push_str(&format!(
                    "{}:{}:{}:{}: {}",
                    severity, path, span.line, span.column, diag.message
                )),
                None => out.push_str(&format!(
                    "{}:{}:{}: {}",
                    severity, span.line, span.column, diag.message
                )),
            }
            out.push_str(&format!(
                "\n  {}\n  {}^",
                line_text,
                " ".repeat(span.column.saturating_sub(1))
            ));
        }
        None => match path {
            Some(path) => out.push_str(&format!("{}:{}: {}", severity, path, diag.message)),
            None => out.push_str(&format!("{}: {}", severity, diag.message)),
        },
    }
    if let Some(help) = &diag.help {
        out.push_str(&format!("\n  help: {}", help));
    }
    out
}
