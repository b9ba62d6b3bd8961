//! Pure interpreter for parsed conditions
//!
//! Evaluation never fails. A comparison that references a missing field
//! is false, so a condition written against fields an entity does not
//! carry simply does not match instead of blocking the submission.

use crate::ast::{CompareOp, Expr, Operand};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// A source of named field values
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<&Value>;
}

impl FieldSource for BTreeMap<String, Value> {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl FieldSource for HashMap<String, Value> {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl FieldSource for Map<String, Value> {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Resolve a dotted path. An exact top-level key wins over nesting.
pub fn lookup<'a, S: FieldSource + ?Sized>(source: &'a S, path: &str) -> Option<&'a Value> {
    if let Some(value) = source.field(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = source.field(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluate an expression against a field source
pub fn evaluate<S: FieldSource + ?Sized>(expr: &Expr, source: &S) -> bool {
    match expr {
        Expr::Const(value) => *value,
        Expr::Truthy(name) => lookup(source, name).map(truthy).unwrap_or(false),
        Expr::Compare { left, op, right } => {
            match (resolve(left, source), resolve(right, source)) {
                (Some(l), Some(r)) => compare(l, *op, r),
                _ => false,
            }
        }
        Expr::In {
            left,
            list,
            negated,
        } => match resolve(left, source) {
            Some(value) => list.iter().any(|item| equals(value, item)) != *negated,
            None => false,
        },
        Expr::Not(inner) => !evaluate(inner, source),
        Expr::And(a, b) => evaluate(a, source) && evaluate(b, source),
        Expr::Or(a, b) => evaluate(a, source) || evaluate(b, source),
    }
}

fn resolve<'a, S: FieldSource + ?Sized>(operand: &'a Operand, source: &'a S) -> Option<&'a Value> {
    match operand {
        Operand::Field(name) => lookup(source, name),
        Operand::Literal(value) => Some(value),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => equals(left, right),
        CompareOp::Ne => !equals(left, right),
        _ => match order(left, right) {
            Some(ordering) => match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Eq | CompareOp::Ne => false,
            },
            None => false,
        },
    }
}

/// A numeric operand; integers stay exact so amounts beyond 2^53 still
/// compare correctly
#[derive(Clone, Copy)]
enum Number {
    Int(i128),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(l), Number::Int(r)) => Some(l.cmp(&r)),
            (l, r) => l.as_f64().partial_cmp(&r.as_f64()),
        }
    }
}

/// Numbers compare numerically, including numeric strings from form posts
fn as_number(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(|i| Number::Int(i.into()))
            .or_else(|| n.as_u64().map(|u| Number::Int(u.into())))
            .or_else(|| n.as_f64().map(Number::Float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i128>()
                .map(Number::Int)
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(Number::Float))
        }
        _ => None,
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (as_number(left), as_number(right)) {
                (Some(l), Some(r)) => l.compare(r) == Some(Ordering::Equal),
                _ => false,
            }
        }
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => as_number(left)?.compare(as_number(right)?),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Parser;
    use serde_json::json;

    fn make_fields() -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("amount".into(), json!(2_000_000));
        fields.insert("currency".into(), json!("EUR"));
        fields.insert("days".into(), json!("3"));
        fields.insert("urgent".into(), json!(true));
        fields.insert("customer".into(), json!({ "tier": "gold", "score": 87.5 }));
        fields
    }

    fn eval(condition: &str) -> bool {
        evaluate(&Parser::parse(condition).unwrap(), &make_fields())
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(eval("amount > 1000000"));
        assert!(!eval("amount < 500"));
        assert!(eval("amount >= 2000000"));
        assert!(eval("amount = 2000000.0"));
        assert!(eval("days <= 5"));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), json!(9_007_199_254_740_993_i64));
        fields.insert("ledger".to_string(), json!(u64::MAX));
        fields.insert("posted".to_string(), json!("9007199254740993"));

        let holds = |condition: &str| evaluate(&Parser::parse(condition).unwrap(), &fields);
        assert!(holds("amount > 9007199254740992"));
        assert!(!holds("amount = 9007199254740992"));
        assert!(holds("amount = 9007199254740993"));
        assert!(holds("posted = amount"));
        assert!(holds("ledger > 9223372036854775807"));
    }

    #[test]
    fn test_string_comparisons() {
        assert!(eval("currency = 'EUR'"));
        assert!(eval("currency != \"USD\""));
        assert!(eval("currency < 'USD'"));
    }

    #[test]
    fn test_nested_fields() {
        assert!(eval("customer.tier = 'gold'"));
        assert!(eval("customer.score > 80"));
        assert!(!eval("customer.missing = 1"));
    }

    #[test]
    fn test_membership() {
        assert!(eval("currency IN ['EUR', 'GBP']"));
        assert!(!eval("currency IN ['USD']"));
        assert!(eval("currency NOT IN ['USD']"));
        assert!(eval("days IN [1, 2, 3]"));
    }

    #[test]
    fn test_missing_field_makes_comparison_false() {
        assert!(!eval("region = 'EU'"));
        assert!(!eval("region != 'EU'"));
        assert!(!eval("region IN ['EU']"));
        assert!(!eval("region NOT IN ['EU']"));
        assert!(!eval("region"));
        assert!(eval("NOT region = 'EU'"));
        assert!(eval("region = 'EU' OR amount > 1"));
    }

    #[test]
    fn test_boolean_logic() {
        assert!(eval("urgent AND amount > 1"));
        assert!(!eval("!urgent"));
        assert!(eval("true"));
        assert!(!eval("false OR false"));
        assert!(eval("urgent = true"));
    }

    #[test]
    fn test_type_mismatch_is_not_equal() {
        assert!(!eval("currency = 5"));
        assert!(eval("currency != 5"));
        assert!(!eval("urgent > 1"));
    }
}
