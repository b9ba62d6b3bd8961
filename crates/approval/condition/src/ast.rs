//! Typed expression tree produced by the parser

use serde_json::Value;

/// Comparison operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// A comparison operand
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// Dotted path into the field map
    Field(String),
    Literal(Value),
}

/// Boolean expression
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Constant truth value
    Const(bool),
    /// A bare field used as a boolean (truthiness)
    Truthy(String),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    /// `left IN [..]`, or `left NOT IN [..]` when `negated`
    In {
        left: Operand,
        list: Vec<Value>,
        negated: bool,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Every field path referenced by the expression, in order of appearance
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        let operand = |o: &'a Operand, out: &mut Vec<&'a str>| {
            if let Operand::Field(name) = o {
                out.push(name.as_str());
            }
        };
        match self {
            Self::Const(_) => {}
            Self::Truthy(name) => out.push(name.as_str()),
            Self::Compare { left, right, .. } => {
                operand(left, out);
                operand(right, out);
            }
            Self::In { left, .. } => operand(left, out),
            Self::Not(inner) => inner.collect_fields(out),
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
        }
    }

    /// Number of nodes in the tree
    pub fn size(&self) -> usize {
        match self {
            Self::Const(_) | Self::Truthy(_) | Self::Compare { .. } | Self::In { .. } => 1,
            Self::Not(inner) => 1 + inner.size(),
            Self::And(a, b) | Self::Or(a, b) => 1 + a.size() + b.size(),
        }
    }
}
