//! Lexer for Adelie source text.
//!
//! The scanner walks the pre-split source lines with a (line, column)
//! cursor and hands out tokens one at a time. It never fails hard:
//! unrecognized characters are skipped with a warning and an unterminated
//! string is truncated at the end of its line, so the parser always sees
//! a well-formed token stream ending in `Eof`.

use crate::diagnostic::Reporter;

/// Kind of a token produced by the scanner.
///
/// Keywords are a fixed closed set; everything else that looks like a
/// word becomes `Identifier`. Multi-character operators are matched
/// longest-first (`:=`, `<=`, `>=`, `==`, `!=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Special
    Eof,

    // Identifiers and literals
    Identifier,
    IntLiteral,
    FloatLiteral,
    StringLiteral,

    // Keywords
    Program,
    Is,
    Begin,
    End,
    Procedure,
    Global,
    In,
    Out,
    IntegerType,
    FloatType,
    BoolType,
    StringType,
    If,
    Then,
    Else,
    For,
    Return,
    Not,
    True,
    False,

    // Operators and punctuation
    Assign,     // :=
    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Less,       // <
    LessEq,     // <=
    Greater,    // >
    GreaterEq,  // >=
    EqEq,       // ==
    NotEq,      // !=
    Amp,        // &
    Pipe,       // |
    LParen,     // (
    RParen,     // )
    LBracket,   // [
    RBracket,   // ]
    Comma,      // ,
    Semicolon,  // ;
}

/// A single classified token.
///
/// `text` is the normalized lexeme: string literals lose their quotes and
/// numeric literals lose their underscore separators. `line` is 1-based
/// and is what every diagnostic about this token reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
}

impl Token {
    /// Human-readable rendering for "found X" style messages.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eof => "end of file".to_string(),
            TokenKind::StringLiteral => format!("\"{}\"", self.text),
            _ => format!("'{}'", self.text),
        }
    }
}

/// Lazy scanner over the pre-split source lines.
///
/// The token sequence is finite and non-restartable; once the cursor
/// passes the last line, every further request yields an `Eof` token.
#[derive(Debug)]
pub struct Scanner {
    lines: Vec<String>,
    /// 0-based index of the line the cursor is on.
    line: usize,
    /// Byte offset into the current line.
    col: usize,
}

impl Scanner {
    pub fn new(lines: Vec<String>) -> Self {
        Scanner {
            lines,
            line: 0,
            col: 0,
        }
    }

    /// 1-based line number of the cursor, for diagnostics.
    fn line_number(&self) -> u32 {
        (self.line + 1) as u32
    }

    fn current_line(&self) -> Option<&[u8]> {
        self.lines.get(self.line).map(|l| l.as_bytes())
    }

    fn peek(&self) -> Option<u8> {
        self.current_line().and_then(|l| l.get(self.col)).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.current_line().and_then(|l| l.get(self.col + 1)).copied()
    }

    fn bump(&mut self) {
        self.col += 1;
    }

    fn next_line(&mut self) {
        self.line += 1;
        self.col = 0;
    }

    /// Produce the next token, recording any lexical warnings.
    pub fn next_token(&mut self, reporter: &mut Reporter) -> Token {
        loop {
            let Some(line) = self.current_line() else {
                // Past end of file: every request returns Eof.
                return Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    line: self.lines.len().max(1) as u32,
                };
            };

            if self.col >= line.len() {
                self.next_line();
                continue;
            }

            let ch = line[self.col];
            if ch == b' ' || ch == b'\t' || ch == b'\r' {
                self.bump();
                continue;
            }

            // Line comment: discard the rest of the line.
            if ch == b'/' && self.peek_next() == Some(b'/') {
                self.next_line();
                continue;
            }

            if ch == b'"' {
                return self.scan_string(reporter);
            }
            if ch.is_ascii_digit() {
                return self.scan_number();
            }
            if ch == b'_' || ch.is_ascii_alphabetic() {
                return self.scan_word();
            }
            if let Some(token) = self.scan_operator(reporter) {
                return token;
            }
            // scan_operator skipped an unrecognized character; resume.
        }
    }

    fn simple(&self, kind: TokenKind, text: &str) -> Token {
        Token {
            kind,
            text: text.to_string(),
            line: self.line_number(),
        }
    }

    fn scan_operator(&mut self, reporter: &mut Reporter) -> Option<Token> {
        let ch = self.peek()?;
        let next = self.peek_next();

        // Two-character operators first.
        let two = match (ch, next) {
            (b':', Some(b'=')) => Some((TokenKind::Assign, ":=")),
            (b'<', Some(b'=')) => Some((TokenKind::LessEq, "<=")),
            (b'>', Some(b'=')) => Some((TokenKind::GreaterEq, ">=")),
            (b'=', Some(b'=')) => Some((TokenKind::EqEq, "==")),
            (b'!', Some(b'=')) => Some((TokenKind::NotEq, "!=")),
            _ => None,
        };
        if let Some((kind, text)) = two {
            let token = self.simple(kind, text);
            self.bump();
            self.bump();
            return Some(token);
        }

        let one = match ch {
            b'+' => Some((TokenKind::Plus, "+")),
            b'-' => Some((TokenKind::Minus, "-")),
            b'*' => Some((TokenKind::Star, "*")),
            b'/' => Some((TokenKind::Slash, "/")),
            b'<' => Some((TokenKind::Less, "<")),
            b'>' => Some((TokenKind::Greater, ">")),
            b'&' => Some((TokenKind::Amp, "&")),
            b'|' => Some((TokenKind::Pipe, "|")),
            b'(' => Some((TokenKind::LParen, "(")),
            b')' => Some((TokenKind::RParen, ")")),
            b'[' => Some((TokenKind::LBracket, "[")),
            b']' => Some((TokenKind::RBracket, "]")),
            b',' => Some((TokenKind::Comma, ",")),
            b';' => Some((TokenKind::Semicolon, ";")),
            _ => None,
        };
        if let Some((kind, text)) = one {
            let token = self.simple(kind, text);
            self.bump();
            return Some(token);
        }

        // Recovery: skip the character with a warning and keep scanning.
        reporter.warning(
            self.line_number(),
            format!("unrecognized character '{}'", ch as char),
        );
        self.bump();
        None
    }

    fn scan_string(&mut self, reporter: &mut Reporter) -> Token {
        let line_number = self.line_number();
        self.bump(); // opening quote

        let mut text = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(ch) => {
                    text.push(ch as char);
                    self.bump();
                }
                None => {
                    // Recovery: truncate the literal at end of line.
                    reporter.warning(line_number, "unterminated string literal");
                    break;
                }
            }
        }

        Token {
            kind: TokenKind::StringLiteral,
            text,
            line: line_number,
        }
    }

    fn scan_number(&mut self) -> Token {
        let line_number = self.line_number();
        let mut text = String::new();
        let mut is_float = false;

        while let Some(ch) = self.peek() {
            match ch {
                b'0'..=b'9' => text.push(ch as char),
                b'_' => {} // separators are stripped
                b'.' if !is_float => {
                    is_float = true;
                    text.push('.');
                }
                _ => break,
            }
            self.bump();
        }

        // A trailing bare '.' means a zero fractional part.
        if text.ends_with('.') {
            text.push('0');
        }

        Token {
            kind: if is_float {
                TokenKind::FloatLiteral
            } else {
                TokenKind::IntLiteral
            },
            text,
            line: line_number,
        }
    }

    fn scan_word(&mut self) -> Token {
        let line_number = self.line_number();
        let mut text = String::new();

        while let Some(ch) = self.peek() {
            if ch == b'_' || ch.is_ascii_alphanumeric() {
                text.push(ch as char);
                self.bump();
            } else {
                break;
            }
        }

        let kind = match text.as_str() {
            "program" => TokenKind::Program,
            "is" => TokenKind::Is,
            "begin" => TokenKind::Begin,
            "end" => TokenKind::End,
            "procedure" => TokenKind::Procedure,
            "global" => TokenKind::Global,
            "in" => TokenKind::In,
            "out" => TokenKind::Out,
            "integer" => TokenKind::IntegerType,
            "float" => TokenKind::FloatType,
            "bool" => TokenKind::BoolType,
            "string" => TokenKind::StringType,
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "return" => TokenKind::Return,
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Identifier,
        };

        Token {
            kind,
            text,
            line: line_number,
        }
    }
}
