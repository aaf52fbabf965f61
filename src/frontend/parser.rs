use super::ast::*;
use super::diagnostic::Diagnostics;
use super::lexer::{Keyword, Symbol, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    pub diags: Diagnostics,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            idx: 0,
            diags: Diagnostics::default(),
        }
    }

    pub fn parse_file(&mut self) -> SourceFile {
        let mut items = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::Eof => break,
                TokenKind::Keyword(Keyword::Func) => {
                    if let Some(func) = self.parse_function() {
                        items.push(Item::Function(func));
                    } else {
                        self.sync_to_item();
                    }
                }
                TokenKind::Keyword(Keyword::Struct) => {
                    if let Some(def) = self.parse_struct() {
                        items.push(Item::Struct(def));
                    } else {
                        self.sync_to_item();
                    }
                }
                _ => {
                    let span = self.peek_span();
                    self.diags
                        .error("expected `func` or `struct`", Some(span));
                    self.sync_to_item();
                }
            }
        }
        SourceFile { items }
    }

    fn parse_function(&mut self) -> Option<Function> {
        let start = self.peek_span();
        self.bump(); // func
        let name = self.expect_ident("function name")?;
        let type_params = self.parse_type_params()?;
        self.expect_symbol(Symbol::LParen)?;
        let mut params = Vec::new();
        if !self.at_symbol(Symbol::RParen) {
            loop {
                let param_start = self.peek_span();
                let name = self.expect_ident("parameter name")?;
                self.expect_symbol(Symbol::Colon)?;
                let ty = self.parse_type()?;
                let span = join(&param_start, &ty.span);
                params.push(Param { name, ty, span });
                if self.at_symbol(Symbol::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect_symbol(Symbol::RParen)?;
        let ret_type = if self.at_symbol(Symbol::Colon) {
            self.bump();
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        let span = join(&start, &body.span);
        Some(Function {
            name,
            type_params,
            params,
            ret_type,
            body,
            span,
        })
    }

    fn parse_struct(&mut self) -> Option<StructDef> {
        let start = self.peek_span();
        self.bump(); // struct
        let name = self.expect_ident("struct name")?;
        let type_params = self.parse_type_params()?;
        self.expect_symbol(Symbol::LBrace)?;
        let mut members = Vec::new();
        while !self.at_symbol(Symbol::RBrace) && !self.at_eof() {
            let member_start = self.peek_span();
            let name = self.expect_ident("member name")?;
            self.expect_symbol(Symbol::Colon)?;
            let ty = self.parse_type()?;
            let span = join(&member_start, &ty.span);
            members.push(Member { name, ty, span });
            if self.at_symbol(Symbol::Comma) {
                self.bump();
                if self.at_symbol(Symbol::RBrace) {
                    break;
                }
            } else {
                break;
            }
        }
        let end = self.peek_span();
        self.expect_symbol(Symbol::RBrace)?;
        Some(StructDef {
            name,
            type_params,
            members,
            span: join(&start, &end),
        })
    }

    fn parse_type_params(&mut self) -> Option<Vec<String>> {
        let mut type_params = Vec::new();
        if self.at_symbol(Symbol::Lt) {
            self.bump();
            loop {
                type_params.push(self.expect_ident("type parameter")?);
                if self.at_symbol(Symbol::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
            self.expect_symbol(Symbol::Gt)?;
        }
        Some(type_params)
    }

    // A type is a name or a generic application `Name<T1, ...>`; both reuse
    // the expression tree.
    fn parse_type(&mut self) -> Option<Expr> {
        let start = self.peek_span();
        let name = self.expect_ident("type name")?;
        let callee = Expr {
            kind: ExprKind::Ident(name),
            span: start.clone(),
        };
        if !self.at_symbol(Symbol::Lt) {
            return Some(callee);
        }
        self.bump();
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            if self.at_symbol(Symbol::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.peek_span();
        self.expect_symbol(Symbol::Gt)?;
        Some(Expr {
            kind: ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            span: join(&start, &end),
        })
    }

    fn parse_block(&mut self) -> Option<Block> {
        let start = self.peek_span();
        self.expect_symbol(Symbol::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at_symbol(Symbol::RBrace) && !self.at_eof() {
            match self.parse_stmt() {
                Some(stmt) => stmts.push(stmt),
                None => self.sync_to_stmt(),
            }
        }
        let end = self.peek_span();
        self.expect_symbol(Symbol::RBrace)?;
        Some(Block {
            stmts,
            span: join(&start, &end),
        })
    }

    fn parse_stmt(&mut self) -> Option<Stmt> {
        let start = self.peek_span();
        match self.peek_kind().clone() {
            TokenKind::Symbol(Symbol::LBrace) => {
                let block = self.parse_block()?;
                let span = block.span.clone();
                Some(Stmt::Block { block, span })
            }
            TokenKind::Symbol(Symbol::Semi) => {
                self.bump();
                Some(Stmt::Empty { span: start })
            }
            TokenKind::Keyword(Keyword::Let) => {
                self.bump();
                let name = self.expect_ident("variable name")?;
                let ty = if self.at_symbol(Symbol::Colon) {
                    self.bump();
                    Some(self.parse_type()?)
                } else {
                    None
                };
                self.expect_symbol(Symbol::Eq)?;
                let init = self.parse_expr()?;
                let end = self.peek_span();
                self.expect_symbol(Symbol::Semi)?;
                Some(Stmt::Let {
                    name,
                    ty,
                    init,
                    span: join(&start, &end),
                })
            }
            TokenKind::Keyword(Keyword::If) => {
                self.bump();
                self.expect_symbol(Symbol::LParen)?;
                let cond = self.parse_expr()?;
                self.expect_symbol(Symbol::RParen)?;
                let then_stmt = Box::new(self.parse_stmt()?);
                let else_stmt = if self.at_keyword(Keyword::Else) {
                    self.bump();
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                Some(Stmt::If {
                    cond,
                    then_stmt,
                    else_stmt,
                    span: start,
                })
            }
            TokenKind::Keyword(Keyword::While) => {
                self.bump();
                self.expect_symbol(Symbol::LParen)?;
                let cond = self.parse_expr()?;
                self.expect_symbol(Symbol::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                Some(Stmt::While {
                    cond,
                    body,
                    span: start,
                })
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.bump();
                let expr = if self.at_symbol(Symbol::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                let end = self.peek_span();
                self.expect_symbol(Symbol::Semi)?;
                Some(Stmt::Return {
                    expr,
                    span: join(&start, &end),
                })
            }
            _ => {
                let expr = self.parse_expr()?;
                let end = self.peek_span();
                self.expect_symbol(Symbol::Semi)?;
                Some(Stmt::Expr {
                    expr,
                    span: join(&start, &end),
                })
            }
        }
    }

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Option<Expr> {
        let left = self.parse_compare()?;
        if self.at_symbol(Symbol::Eq) {
            self.bump();
            let right = self.parse_assign()?;
            let span = join(&left.span, &right.span);
            return Some(Expr {
                kind: ExprKind::Assign {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            });
        }
        Some(left)
    }

    fn parse_compare(&mut self) -> Option<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Symbol(Symbol::EqEq) => BinaryOp::Eq,
                TokenKind::Symbol(Symbol::NotEq) => BinaryOp::NotEq,
                TokenKind::Symbol(Symbol::Lt) => BinaryOp::Lt,
                TokenKind::Symbol(Symbol::Lte) => BinaryOp::Lte,
                TokenKind::Symbol(Symbol::Gt) => BinaryOp::Gt,
                TokenKind::Symbol(Symbol::Gte) => BinaryOp::Gte,
                _ => break,
            };
            self.bump();
            let right = self.parse_additive()?;
            let span = join(&left.span, &right.span);
            left = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }
        Some(left)
    }

    fn parse_additive(&mut self) -> Option<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Symbol(Symbol::Plus) => BinaryOp::Add,
                TokenKind::Symbol(Symbol::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            let span = join(&left.span, &right.span);
            left = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }
        Some(left)
    }

    fn parse_multiplicative(&mut self) -> Option<Expr> {
        let mut left = self.parse_postfix()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Symbol(Symbol::Star) => BinaryOp::Mul,
                TokenKind::Symbol(Symbol::Slash) => BinaryOp::Div,
                TokenKind::Symbol(Symbol::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.bump();
            let right = self.parse_postfix()?;
            let span = join(&left.span, &right.span);
            left = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }
        Some(left)
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Symbol(Symbol::LParen) => {
                    self.bump();
                    let mut args = Vec::new();
                    if !self.at_symbol(Symbol::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.at_symbol(Symbol::Comma) {
                                self.bump();
                            } else {
                                break;
                            }
                        }
                    }
                    let end = self.peek_span();
                    self.expect_symbol(Symbol::RParen)?;
                    let span = join(&expr.span, &end);
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                TokenKind::Symbol(Symbol::Dot) => {
                    self.bump();
                    let end = self.peek_span();
                    let name = self.expect_ident("member name")?;
                    let span = join(&expr.span, &end);
                    expr = Expr {
                        kind: ExprKind::Field {
                            base: Box::new(expr),
                            name,
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let span = self.peek_span();
        match self.peek_kind().clone() {
            TokenKind::IntLit(text) => {
                self.bump();
                let value = match text.parse::<i32>() {
                    Ok(value) => value,
                    Err(_) => {
                        self.diags
                            .error(format!("integer literal `{}` out of range", text), Some(span.clone()));
                        0
                    }
                };
                Some(Expr {
                    kind: ExprKind::Int(value),
                    span,
                })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump();
                Some(Expr {
                    kind: ExprKind::Int(1),
                    span,
                })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump();
                Some(Expr {
                    kind: ExprKind::Int(0),
                    span,
                })
            }
            TokenKind::Ident(name) => {
                self.bump();
                Some(Expr {
                    kind: ExprKind::Ident(name),
                    span,
                })
            }
            TokenKind::Symbol(Symbol::LParen) => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect_symbol(Symbol::RParen)?;
                Some(expr)
            }
            _ => {
                self.diags.error("expected an expression", Some(span));
                None
            }
        }
    }

    fn sync_to_item(&mut self) {
        while !self.at_eof() {
            if matches!(
                self.peek_kind(),
                TokenKind::Keyword(Keyword::Func) | TokenKind::Keyword(Keyword::Struct)
            ) {
                return;
            }
            self.bump();
        }
    }

    fn sync_to_stmt(&mut self) {
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::Symbol(Symbol::Semi) => {
                    self.bump();
                    return;
                }
                TokenKind::Symbol(Symbol::RBrace) => return,
                _ => self.bump(),
            }
        }
    }

    fn expect_ident(&mut self, what: &str) -> Option<String> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Some(name)
            }
            _ => {
                let span = self.peek_span();
                self.diags.error(format!("expected {}", what), Some(span));
                None
            }
        }
    }

    fn expect_symbol(&mut self, symbol: Symbol) -> Option<()> {
        if self.at_symbol(symbol) {
            self.bump();
            Some(())
        } else {
            let span = self.peek_span();
            self.diags
                .error(format!("expected `{}`", symbol_text(symbol)), Some(span));
            None
        }
    }

    fn at_symbol(&self, symbol: Symbol) -> bool {
        matches!(self.peek_kind(), TokenKind::Symbol(s) if *s == symbol)
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == keyword)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.idx)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.idx)
            .map(|t| t.span.clone())
            .unwrap_or(Span {
                start: 0,
                end: 0,
                line: 1,
                column: 1,
            })
    }

    fn bump(&mut self) {
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
    }
}

fn join(a: &Span, b: &Span) -> Span {
    Span {
        start: a.start,
        end: b.end,
        line: a.line,
        column: a.column,
    }
}

fn symbol_text(symbol: Symbol) -> &'static str {
    match symbol {
        Symbol::LParen => "(",
        Symbol::RParen => ")",
        Symbol::LBrace => "{",
        Symbol::RBrace => "}",
        Symbol::Comma => ",",
        Symbol::Semi => ";",
        Symbol::Colon => ":",
        Symbol::Dot => ".",
        Symbol::Plus => "+",
        Symbol::Minus => "-",
        Symbol::Star => "*",
        Symbol::Slash => "/",
        Symbol::Percent => "%",
        Symbol::Eq => "=",
        Symbol::EqEq => "==",
        Symbol::NotEq => "!=",
        Symbol::Lt => "<",
        Symbol::Lte => "<=",
        Symbol::Gt => ">",
        Symbol::Gte => ">=",
    }
}
