//! Parser: recursive descent over condition tokens
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and (OR and)*
//! and     := unary (AND unary)*
//! unary   := NOT unary | primary
//! primary := '(' or ')' | TRUE | FALSE | operand [compare]
//! compare := op operand | [NOT] IN '[' literal (',' literal)* ']'
//! operand := field | literal
//! ```

use crate::ast::{CompareOp, Expr, Operand};
use crate::errors::{ConditionError, ConditionResult};
use crate::lexer::{Lexer, Token, TokenKind};
use serde_json::Value;

/// Deepest expression tree the parser will build. Parentheses, `NOT` and
/// each `AND`/`OR` link add one level; evaluation recurses to this depth.
pub const MAX_DEPTH: usize = 128;

/// Parser for condition expressions
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Parse condition text into an expression tree.
    ///
    /// Blank input parses to `Const(true)`.
    pub fn parse(input: &str) -> ConditionResult<Expr> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Self {
            tokens,
            pos: 0,
            depth: 0,
        };

        if parser.check(TokenKind::Eof) {
            return Ok(Expr::Const(true));
        }

        let expr = parser.parse_or()?;
        parser.expect(TokenKind::Eof)?;
        Ok(expr)
    }

    fn parse_or(&mut self) -> ConditionResult<Expr> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.check(TokenKind::Or) {
            self.descend()?;
            links += 1;
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_and(&mut self) -> ConditionResult<Expr> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        while self.check(TokenKind::And) {
            self.descend()?;
            links += 1;
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_unary(&mut self) -> ConditionResult<Expr> {
        if self.check(TokenKind::Not) {
            self.descend()?;
            self.advance();
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ConditionResult<Expr> {
        match self.peek_kind() {
            TokenKind::OpenParen => {
                self.descend()?;
                self.advance();
                let inner = self.parse_or()?;
                self.expect(TokenKind::CloseParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::True | TokenKind::False if !self.next_is_operator() => {
                let value = self.check(TokenKind::True);
                self.advance();
                Ok(Expr::Const(value))
            }
            _ => {
                let left = self.parse_operand()?;
                self.parse_comparison(left)
            }
        }
    }

    fn parse_comparison(&mut self, left: Operand) -> ConditionResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Eq => Some(CompareOp::Eq),
            TokenKind::Ne => Some(CompareOp::Ne),
            TokenKind::Lt => Some(CompareOp::Lt),
            TokenKind::Le => Some(CompareOp::Le),
            TokenKind::Gt => Some(CompareOp::Gt),
            TokenKind::Ge => Some(CompareOp::Ge),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let right = self.parse_operand()?;
            return Ok(Expr::Compare { left, op, right });
        }

        if self.check(TokenKind::In) {
            self.advance();
            let list = self.parse_list()?;
            return Ok(Expr::In {
                left,
                list,
                negated: false,
            });
        }

        if self.check(TokenKind::Not) && self.peek_kind_at(1) == TokenKind::In {
            self.advance();
            self.advance();
            let list = self.parse_list()?;
            return Ok(Expr::In {
                left,
                list,
                negated: true,
            });
        }

        match left {
            Operand::Field(name) => Ok(Expr::Truthy(name)),
            Operand::Literal(value) => {
                let tok = self.peek();
                Err(ConditionError::UnexpectedToken {
                    col: tok.col,
                    expected: "comparison operator".into(),
                    found: if tok.kind == TokenKind::Eof {
                        value.to_string()
                    } else {
                        tok.text.clone()
                    },
                })
            }
        }
    }

    fn parse_list(&mut self) -> ConditionResult<Vec<Value>> {
        self.expect(TokenKind::OpenBracket)?;
        let mut items = Vec::new();

        if self.check(TokenKind::CloseBracket) {
            self.advance();
            return Ok(items);
        }

        loop {
            items.push(self.parse_literal()?);
            if self.check(TokenKind::Comma) {
                self.advance();
                continue;
            }
            self.expect(TokenKind::CloseBracket)?;
            break;
        }

        Ok(items)
    }

    fn parse_operand(&mut self) -> ConditionResult<Operand> {
        if self.check(TokenKind::Identifier) {
            let name = self.advance().text.clone();
            return Ok(Operand::Field(name));
        }
        self.parse_literal().map(Operand::Literal)
    }

    fn parse_literal(&mut self) -> ConditionResult<Value> {
        let tok = self.peek().clone();
        let value = match tok.kind {
            TokenKind::NumberLiteral => parse_number(&tok.text)?,
            TokenKind::StringLiteral => Value::String(tok.text.clone()),
            TokenKind::True => Value::Bool(true),
            TokenKind::False => Value::Bool(false),
            TokenKind::Null => Value::Null,
            TokenKind::Eof => return Err(ConditionError::UnexpectedEof("value".into())),
            _ => {
                return Err(ConditionError::UnexpectedToken {
                    col: tok.col,
                    expected: "value".into(),
                    found: tok.text,
                })
            }
        };
        self.advance();
        Ok(value)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn descend(&mut self) -> ConditionResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(ConditionError::TooDeep {
                col: self.peek().col,
                max: MAX_DEPTH,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn next_is_operator(&self) -> bool {
        matches!(
            self.peek_kind_at(1),
            TokenKind::Eq
                | TokenKind::Ne
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Gt
                | TokenKind::Ge
                | TokenKind::In
        ) || (self.peek_kind_at(1) == TokenKind::Not && self.peek_kind_at(2) == TokenKind::In)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        self.tokens[index].kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let index = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[index]
    }

    fn expect(&mut self, kind: TokenKind) -> ConditionResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else if self.check(TokenKind::Eof) {
            Err(ConditionError::UnexpectedEof(kind.to_string()))
        } else {
            let tok = self.peek();
            Err(ConditionError::UnexpectedToken {
                col: tok.col,
                expected: kind.to_string(),
                found: tok.text.clone(),
            })
        }
    }
}

fn parse_number(text: &str) -> ConditionResult<Value> {
    if let Ok(int) = text.parse::<i64>() {
        return Ok(Value::from(int));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ConditionError::InvalidNumber(text.to_string()))
}
