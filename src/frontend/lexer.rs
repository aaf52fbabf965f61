use super::ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Ident(String),
    IntLit(String),
    Unknown(char),
    Keyword(Keyword),
    Symbol(Symbol),
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Keyword {
    Func,
    Struct,
    Let,
    If,
    Else,
    While,
    Return,
    True,
    False,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Symbol {
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    EqEq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub struct Lexer<'a> {
    bytes: &'a [u8],
    idx: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            bytes: src.as_bytes(),
            idx: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn lex_all(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = matches!(tok.kind, TokenKind::Eof);
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        tokens
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        let start = self.idx;
        let (line, column) = (self.line, self.col);
        if self.idx >= self.bytes.len() {
            return Token {
                kind: TokenKind::Eof,
                span: Span {
                    start,
                    end: start,
                    line,
                    column,
                },
            };
        }
        let ch = self.peek_char();
        if is_ident_start(ch) {
            let ident = self.read_while(is_ident_continue);
            let kind = match ident.as_str() {
                "func" => TokenKind::Keyword(Keyword::Func),
                "struct" => TokenKind::Keyword(Keyword::Struct),
                "let" => TokenKind::Keyword(Keyword::Let),
                "if" => TokenKind::Keyword(Keyword::If),
                "else" => TokenKind::Keyword(Keyword::Else),
                "while" => TokenKind::Keyword(Keyword::While),
                "return" => TokenKind::Keyword(Keyword::Return),
                "true" => TokenKind::Keyword(Keyword::True),
                "false" => TokenKind::Keyword(Keyword::False),
                _ => TokenKind::Ident(ident),
            };
            let end = self.idx;
            return Token {
                kind,
                span: Span {
                    start,
                    end,
                    line,
                    column,
                },
            };
        }
        if ch.is_ascii_digit() {
            let number = self.read_while(|c| c.is_ascii_digit());
            let end = self.idx;
            return Token {
                kind: TokenKind::IntLit(number),
                span: Span {
                    start,
                    end,
                    line,
                    column,
                },
            };
        }
        let kind = match ch {
            '(' => {
                self.advance();
                TokenKind::Symbol(Symbol::LParen)
            }
            ')' => {
                self.advance();
                TokenKind::Symbol(Symbol::RParen)
            }
            '{' => {
                self.advance();
                TokenKind::Symbol(Symbol::LBrace)
            }
            '}' => {
                self.advance();
                TokenKind::Symbol(Symbol::RBrace)
            }
            ',' => {
                self.advance();
                TokenKind::Symbol(Symbol::Comma)
            }
            ';' => {
                self.advance();
                TokenKind::Symbol(Symbol::Semi)
            }
            ':' => {
                self.advance();
                TokenKind::Symbol(Symbol::Colon)
            }
            '.' => {
                self.advance();
                TokenKind::Symbol(Symbol::Dot)
            }
            '+' => {
                self.advance();
                TokenKind::Symbol(Symbol::Plus)
            }
            '-' => {
                self.advance();
                TokenKind::Symbol(Symbol::Minus)
            }
            '*' => {
                self.advance();
                TokenKind::Symbol(Symbol::Star)
            }
            '/' => {
                self.advance();
                TokenKind::Symbol(Symbol::Slash)
            }
            '%' => {
                self.advance();
                TokenKind::Symbol(Symbol::Percent)
            }
            '!' => {
                self.advance();
                if self.peek_char() == '=' {
                    self.advance();
                    TokenKind::Symbol(Symbol::NotEq)
                } else {
                    TokenKind::Unknown('!')
                }
            }
            '=' => {
                self.advance();
                if self.peek_char() == '=' {
                    self.advance();
                    TokenKind::Symbol(Symbol::EqEq)
                } else {
                    TokenKind::Symbol(Symbol::Eq)
                }
            }
            '<' => {
                self.advance();
                if self.peek_char() == '=' {
                    self.advance();
                    TokenKind::Symbol(Symbol::Lte)
                } else {
                    TokenKind::Symbol(Symbol::Lt)
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == '=' {
                    self.advance();
                    TokenKind::Symbol(Symbol::Gte)
                } else {
                    TokenKind::Symbol(Symbol::Gt)
                }
            }
            _ => {
                self.advance();
                TokenKind::Unknown(ch)
            }
        };
        let end = self.idx;
        Token {
            kind,
            span: Span {
                start,
                end,
                line,
                column,
            },
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            if self.idx >= self.bytes.len() {
                return;
            }
            let ch = self.peek_char();
            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_next_char() == '/' => {
                    self.advance();
                    self.advance();
                    while self.idx < self.bytes.len() && self.peek_char() != '\n' {
                        self.advance();
                    }
                }
                '/' if self.peek_next_char() == '*' => {
                    self.advance();
                    self.advance();
                    while self.idx < self.bytes.len() {
                        if self.peek_char() == '*' && self.peek_next_char() == '/' {
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn read_while<F>(&mut self, f: F) -> String
    where
        F: Fn(char) -> bool,
    {
        let mut s = String::new();
        while self.idx < self.bytes.len() {
            let ch = self.peek_char();
            if !f(ch) {
                break;
            }
            s.push(ch);
            self.advance();
        }
        s
    }

    fn advance(&mut self) {
        if self.idx >= self.bytes.len() {
            return;
        }
        let ch = self.peek_char();
        self.idx += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
    }

    fn peek_char(&self) -> char {
        self.bytes.get(self.idx).copied().unwrap_or(b'\0') as char
    }

    fn peek_next_char(&self) -> char {
        self.bytes.get(self.idx + 1).copied().unwrap_or(b'\0') as char
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::{Keyword, Lexer, Symbol, TokenKind};

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).lex_all().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_function_header() {
        let toks = kinds("func id<T>(x: T): T {}");
        assert_eq!(
            toks,
            vec![
                TokenKind::Keyword(Keyword::Func),
                TokenKind::Ident("id".to_string()),
                TokenKind::Symbol(Symbol::Lt),
                TokenKind::Ident("T".to_string()),
                TokenKind::Symbol(Symbol::Gt),
                TokenKind::Symbol(Symbol::LParen),
                TokenKind::Ident("x".to_string()),
                TokenKind::Symbol(Symbol::Colon),
                TokenKind::Ident("T".to_string()),
                TokenKind::Symbol(Symbol::RParen),
                TokenKind::Symbol(Symbol::Colon),
                TokenKind::Ident("T".to_string()),
                TokenKind::Symbol(Symbol::LBrace),
                TokenKind::Symbol(Symbol::RBrace),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_whitespace() {
        let toks = kinds("1 // line\n/* block\nstill block */ 2");
        assert_eq!(
            toks,
            vec![
                TokenKind::IntLit("1".to_string()),
                TokenKind::IntLit("2".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        let toks = kinds("== != <= >= < > =");
        assert_eq!(
            toks,
            vec![
                TokenKind::Symbol(Symbol::EqEq),
                TokenKind::Symbol(Symbol::NotEq),
                TokenKind::Symbol(Symbol::Lte),
                TokenKind::Symbol(Symbol::Gte),
                TokenKind::Symbol(Symbol::Lt),
                TokenKind::Symbol(Symbol::Gt),
                TokenKind::Symbol(Symbol::Eq),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn spans_carry_byte_offsets() {
        let toks = Lexer::new("let x").lex_all();
        assert_eq!(toks[0].span.start, 0);
        assert_eq!(toks[0].span.end, 3);
        assert_eq!(toks[1].span.start, 4);
        assert_eq!(toks[1].span.line, 1);
        assert_eq!(toks[1].span.column, 5);
    }

    #[test]
    fn stray_character_is_unknown() {
        let toks = kinds("@");
        assert_eq!(toks[0], TokenKind::Unknown('@'));
    }
}
