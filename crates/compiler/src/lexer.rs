//! Lexer (spec §4.2).
//!
//! Continues the teacher's `parser::tokenize` free function and `Token`
//! struct (text + 0-indexed line/column) — generalized from Seq's
//! word-soup tokens to Aria's keyword/operator/literal token set and the
//! 22 operator precedence levels (spec §6.1).

use aria_core::{FileId, SourcePosition};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Keyword(String),
    Int(i128),
    Float(f64),
    Str(String),
    TemplateStr(String),
    Char(char),
    Op(String),
    Punct(char),
    Error(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePosition,
}

const KEYWORDS: &[&str] = &[
    "const", "stack", "gc", "wild", "wildx", "func", "struct", "trait", "impl", "pub", "async",
    "await", "spawn", "return", "break", "continue", "defer", "if", "else", "while", "for", "in",
    "loop", "till", "when", "then", "end", "pick", "fall", "use", "as", "true", "false", "null",
    "is",
];

const OPERATORS: &[&str] = &[
    "<=>", "??", "|>", "<|", "?.", "<<=", ">>=", "&&", "||", "==", "!=", "<=", ">=", "<<", ">>",
    "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "->", "..", "...", "+", "-", "*",
    "/", "%", "&", "|", "^", "~", "<", ">", "=", "!", "@", "#", "$", "?", ":",
];

pub struct Lexer<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    file: FileId,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str, file: FileId) -> Self {
        Lexer {
            text,
            chars: text.chars().collect(),
            pos: 0,
            line: 0,
            column: 0,
            file,
        }
    }

    fn here(&self) -> SourcePosition {
        SourcePosition::new(self.file, self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    while self.peek().is_some()
                        && !(self.peek() == Some('*') && self.peek_at(1) == Some('/'))
                    {
                        self.advance();
                    }
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    /// Resume position for the "bad input" recovery rule: scan to the next
    /// whitespace boundary (spec §4.2).
    fn resync_to_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            self.advance();
        }
    }

    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let pos = self.here();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos,
                });
                break;
            };

            if c.is_ascii_digit() {
                tokens.push(self.lex_number(pos));
                continue;
            }
            if c == '"' {
                tokens.push(self.lex_string(pos));
                continue;
            }
            if c == '\'' {
                tokens.push(self.lex_char(pos));
                continue;
            }
            if c.is_alphabetic() || c == '_' {
                tokens.push(self.lex_ident(pos));
                continue;
            }
            if let Some(op) = self.lex_operator(pos) {
                tokens.push(op);
                continue;
            }
            if "(){}[];,.".contains(c) {
                self.advance();
                tokens.push(Token {
                    kind: TokenKind::Punct(c),
                    pos,
                });
                continue;
            }

            self.advance();
            self.resync_to_whitespace();
            tokens.push(Token {
                kind: TokenKind::Error(format!("unexpected character '{c}'")),
                pos,
            });
        }
        tokens
    }

    fn lex_number(&mut self, pos: SourcePosition) -> Token {
        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('b')) {
            let radix_char = self.peek_at(1).unwrap();
            self.advance();
            self.advance();
            let digit_start = self.pos;
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_hexdigit() || c == '_')
            {
                self.advance();
            }
            let digits: String = self.chars[digit_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            let radix = if radix_char == 'x' { 16 } else { 2 };
            return match i128::from_str_radix(&digits, radix) {
                Ok(n) => Token {
                    kind: TokenKind::Int(n),
                    pos,
                },
                Err(_) => Token {
                    kind: TokenKind::Error("invalid numeric literal".to_string()),
                    pos,
                },
            };
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        if is_float {
            match text.parse::<f64>() {
                Ok(f) => Token {
                    kind: TokenKind::Float(f),
                    pos,
                },
                Err(_) => Token {
                    kind: TokenKind::Error("invalid float literal".to_string()),
                    pos,
                },
            }
        } else {
            match text.parse::<i128>() {
                Ok(n) => Token {
                    kind: TokenKind::Int(n),
                    pos,
                },
                Err(_) => Token {
                    kind: TokenKind::Error("invalid integer literal".to_string()),
                    pos,
                },
            }
        }
    }

    fn lex_string(&mut self, pos: SourcePosition) -> Token {
        self.advance();
        let mut value = String::new();
        let mut has_interp = false;
        loop {
            match self.peek() {
                None => {
                    return Token {
                        kind: TokenKind::Error("unterminated string literal".to_string()),
                        pos,
                    };
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(other) => value.push(other),
                        None => break,
                    }
                }
                Some('$') | Some('&') if self.peek_at(1) == Some('{') => {
                    has_interp = true;
                    value.push(self.advance().unwrap());
                    value.push(self.advance().unwrap());
                    let mut depth = 1;
                    while depth > 0 {
                        match self.advance() {
                            Some('{') => {
                                depth += 1;
                                value.push('{');
                            }
                            Some('}') => {
                                depth -= 1;
                                value.push('}');
                            }
                            Some(c) => value.push(c),
                            None => break,
                        }
                    }
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }
        Token {
            kind: if has_interp {
                TokenKind::TemplateStr(value)
            } else {
                TokenKind::Str(value)
            },
            pos,
        }
    }

    fn lex_char(&mut self, pos: SourcePosition) -> Token {
        self.advance();
        let c = match self.advance() {
            Some('\\') => match self.advance() {
                Some('n') => '\n',
                Some('t') => '\t',
                Some(other) => other,
                None => {
                    return Token {
                        kind: TokenKind::Error("unterminated char literal".to_string()),
                        pos,
                    };
                }
            },
            Some(c) => c,
            None => {
                return Token {
                    kind: TokenKind::Error("unterminated char literal".to_string()),
                    pos,
                };
            }
        };
        if self.peek() == Some('\'') {
            self.advance();
        }
        Token {
            kind: TokenKind::Char(c),
            pos,
        }
    }

    fn lex_ident(&mut self, pos: SourcePosition) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.advance();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let kind = if KEYWORDS.contains(&text.as_str()) {
            TokenKind::Keyword(text)
        } else {
            TokenKind::Ident(text)
        };
        Token { kind, pos }
    }

    fn lex_operator(&mut self, pos: SourcePosition) -> Option<Token> {
        let remaining: String = self.chars[self.pos..].iter().take(3).collect();
        for op in OPERATORS {
            if remaining.starts_with(op) {
                for _ in 0..op.chars().count() {
                    self.advance();
                }
                return Some(Token {
                    kind: TokenKind::Op((*op).to_string()),
                    pos,
                });
            }
        }
        None
    }
}

pub fn tokenize(text: &str, file: FileId) -> Vec<Token> {
    Lexer::new(text, file).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aria_core::FileId as Fid;

    #[test]
    fn tokenizes_hello_world_skeleton() {
        let toks = tokenize("func:main = int32() { return 0; }", Fid(0));
        let kinds: Vec<_> = toks.iter().map(|t| &t.kind).collect();
        assert!(kinds.contains(&&TokenKind::Keyword("func".to_string())));
        assert!(kinds.contains(&&TokenKind::Int(0)));
    }

    #[test]
    fn hex_and_binary_literals() {
        let toks = tokenize("0x1F 0b101", Fid(0));
        assert_eq!(toks[0].kind, TokenKind::Int(31));
        assert_eq!(toks[1].kind, TokenKind::Int(5));
    }

    #[test]
    fn pipeline_and_spaceship_operators_are_recognized() {
        let toks = tokenize("a |> b <=> c", Fid(0));
        let ops: Vec<_> = toks
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Op(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert!(ops.contains(&"|>"));
        assert!(ops.contains(&"<=>"));
    }

    #[test]
    fn template_string_with_interpolation_preserved() {
        let toks = tokenize(r#""hi ${name}""#, Fid(0));
        match &toks[0].kind {
            TokenKind::TemplateStr(s) => assert!(s.contains("${name}")),
            other => panic!("expected template string, got {other:?}"),
        }
    }

    #[test]
    fn bad_input_emits_error_token_and_resumes() {
        let toks = tokenize("x = `bad y = 1", Fid(0));
        assert!(toks.iter().any(|t| matches!(t.kind, TokenKind::Error(_))));
        assert!(toks.iter().any(|t| t.kind == TokenKind::Ident("y".to_string())));
    }
}
