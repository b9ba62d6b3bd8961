//! Condition language for approval workflows
//!
//! Conditions select which workflow definition applies to a submitted
//! entity (trigger conditions) and guard outcome rules. The language has
//! field references with dotted paths, comparisons (`=`, `!=`, `<`, `<=`,
//! `>`, `>=`), boolean `AND`/`OR`/`NOT`, literals, and list membership
//! (`IN [...]`, `NOT IN [...]`). There are no function calls or loops, so
//! evaluation is linear in the size of the expression.
//!
//! Conditions are parsed once into a [`Condition`] and then evaluated any
//! number of times without re-parsing.
//!
//! ```
//! use approval_condition::Condition;
//! use serde_json::json;
//! use std::collections::BTreeMap;
//!
//! let condition = Condition::parse("amount > 1000000 AND currency IN ['EUR', 'USD']").unwrap();
//! let mut fields = BTreeMap::new();
//! fields.insert("amount".to_string(), json!(2_000_000));
//! fields.insert("currency".to_string(), json!("EUR"));
//! assert!(condition.evaluate(&fields));
//! ```

#![deny(unsafe_code)]

pub mod ast;
pub mod errors;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{CompareOp, Expr, Operand};
pub use errors::{ConditionError, ConditionResult};
pub use eval::{evaluate, lookup, FieldSource};
pub use parser::Parser;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A parsed condition together with its source text
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Parse and validate condition text
    pub fn parse(source: &str) -> ConditionResult<Self> {
        let expr = Parser::parse(source)?;
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// A condition that always holds
    pub fn always() -> Self {
        Self {
            source: String::new(),
            expr: Expr::Const(true),
        }
    }

    pub fn evaluate<S: FieldSource + ?Sized>(&self, fields: &S) -> bool {
        evaluate(&self.expr, fields)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Whether the condition is the constant `true`
    pub fn is_always(&self) -> bool {
        self.expr == Expr::Const(true)
    }

    /// Field paths this condition reads
    pub fn fields(&self) -> Vec<&str> {
        self.expr.fields()
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::always()
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.source.is_empty() {
            write!(f, "true")
        } else {
            write!(f, "{}", self.source)
        }
    }
}

impl std::str::FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::parse(&source).map_err(serde::de::Error::custom)
    }
}
