//! Lexer: tokenizes condition text
//!
//! Keywords (`AND`, `OR`, `NOT`, `IN`, `TRUE`, `FALSE`, `NULL`) are
//! case-insensitive. `&&`, `||` and `!` are accepted as symbolic forms.
//! Identifiers may contain dots to address nested fields.

use crate::errors::{ConditionError, ConditionResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The raw text (unescaped for strings)
    pub text: String,
    pub line: usize,
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

/// Token types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    And,
    Or,
    Not,
    In,
    True,
    False,
    Null,

    // Identifiers and literals
    Identifier,
    StringLiteral,
    NumberLiteral,

    // Comparison operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Structural
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,

    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
            Self::In => write!(f, "IN"),
            Self::True => write!(f, "TRUE"),
            Self::False => write!(f, "FALSE"),
            Self::Null => write!(f, "NULL"),
            Self::Identifier => write!(f, "field name"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::NumberLiteral => write!(f, "number"),
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::OpenBracket => write!(f, "["),
            Self::CloseBracket => write!(f, "]"),
            Self::Comma => write!(f, ","),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for condition expressions
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> ConditionResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                break;
            }

            tokens.push(self.next_token()?);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> ConditionResult<Token> {
        let ch = self.input[self.pos];
        let line = self.line;
        let col = self.col;

        let single = |kind: TokenKind| Token::new(kind, ch.to_string(), line, col);

        match ch {
            '(' => {
                self.advance();
                Ok(single(TokenKind::OpenParen))
            }
            ')' => {
                self.advance();
                Ok(single(TokenKind::CloseParen))
            }
            '[' => {
                self.advance();
                Ok(single(TokenKind::OpenBracket))
            }
            ']' => {
                self.advance();
                Ok(single(TokenKind::CloseBracket))
            }
            ',' => {
                self.advance();
                Ok(single(TokenKind::Comma))
            }
            '=' => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                }
                Ok(Token::new(TokenKind::Eq, "=", line, col))
            }
            '!' if self.peek_at(1) == Some('=') => self.two_char(TokenKind::Ne, "!=", line, col),
            '!' => {
                self.advance();
                Ok(Token::new(TokenKind::Not, "!", line, col))
            }
            '<' if self.peek_at(1) == Some('=') => self.two_char(TokenKind::Le, "<=", line, col),
            '<' if self.peek_at(1) == Some('>') => self.two_char(TokenKind::Ne, "<>", line, col),
            '<' => {
                self.advance();
                Ok(Token::new(TokenKind::Lt, "<", line, col))
            }
            '>' if self.peek_at(1) == Some('=') => self.two_char(TokenKind::Ge, ">=", line, col),
            '>' => {
                self.advance();
                Ok(Token::new(TokenKind::Gt, ">", line, col))
            }
            '&' if self.peek_at(1) == Some('&') => self.two_char(TokenKind::And, "&&", line, col),
            '|' if self.peek_at(1) == Some('|') => self.two_char(TokenKind::Or, "||", line, col),
            '"' | '\'' => self.read_string_literal(ch),
            '-' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number(),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_alphabetic() || c == '_' => self.read_identifier_or_keyword(),
            _ => Err(ConditionError::ParseError {
                line,
                col,
                message: format!("Unexpected character: '{}'", ch),
            }),
        }
    }

    fn two_char(
        &mut self,
        kind: TokenKind,
        text: &str,
        line: usize,
        col: usize,
    ) -> ConditionResult<Token> {
        self.advance();
        self.advance();
        Ok(Token::new(kind, text, line, col))
    }

    fn read_string_literal(&mut self, quote: char) -> ConditionResult<Token> {
        let line = self.line;
        let col = self.col;
        self.advance(); // opening quote

        let mut text = String::new();
        while let Some(c) = self.current() {
            if c == quote {
                break;
            }
            if c == '\\' && self.peek_at(1).is_some() {
                self.advance();
                if let Some(escaped) = self.current() {
                    text.push(escaped);
                }
            } else {
                text.push(c);
            }
            self.advance();
        }

        if self.current().is_none() {
            return Err(ConditionError::ParseError {
                line,
                col,
                message: "Unterminated string literal".into(),
            });
        }

        self.advance(); // closing quote
        Ok(Token::new(TokenKind::StringLiteral, text, line, col))
    }

    fn read_number(&mut self) -> ConditionResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        if self.current() == Some('-') {
            text.push('-');
            self.advance();
        }

        while let Some(c) = self.current() {
            if c.is_ascii_digit() || c == '.' || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.advance();
            } else {
                break;
            }
        }

        if text.parse::<f64>().is_err() {
            return Err(ConditionError::InvalidNumber(text));
        }

        Ok(Token::new(TokenKind::NumberLiteral, text, line, col))
    }

    fn read_identifier_or_keyword(&mut self) -> ConditionResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let kind = match text.to_ascii_uppercase().as_str() {
            "AND" => TokenKind::And,
            "OR" => TokenKind::Or,
            "NOT" => TokenKind::Not,
            "IN" => TokenKind::In,
            "TRUE" => TokenKind::True,
            "FALSE" => TokenKind::False,
            "NULL" => TokenKind::Null,
            _ => TokenKind::Identifier,
        };

        Ok(Token::new(kind, text, line, col))
    }

    fn skip_whitespace(&mut self) {
        while self.current().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            if self.input[self.pos] == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}
