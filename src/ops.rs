//! Operators module: the operator vocabulary of the bytecode and its numeric semantics.
//!
//! Both the constant folder and the evaluator go through [`Operator::apply`], so a
//! folded immediate is always bit-identical to what the unfolded program computes.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Neq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// Any operator accepted by [`crate::Bytecode::add_op`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CompareOp),
    Logical(LogicalOp),
}

#[inline]
fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

#[inline]
fn is_true(x: f64) -> bool {
    x != 0.0
}

impl UnaryOp {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Plus => x,
            UnaryOp::Not => truth(!is_true(x)),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            UnaryOp::Neg => "NEG",
            UnaryOp::Plus => "PLUS",
            UnaryOp::Not => "NOT",
        }
    }
}

impl BinaryOp {
    pub fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Pow => x.powf(y),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "ADD",
            BinaryOp::Sub => "SUB",
            BinaryOp::Mul => "MUL",
            BinaryOp::Div => "DIV",
            BinaryOp::Pow => "POW",
        }
    }
}

impl CompareOp {
    pub fn apply(self, x: f64, y: f64) -> f64 {
        truth(match self {
            CompareOp::Lt => x < y,
            CompareOp::Gt => x > y,
            CompareOp::Le => x <= y,
            CompareOp::Ge => x >= y,
            CompareOp::Eq => x == y,
            CompareOp::Neq => x != y,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            CompareOp::Lt => "LT",
            CompareOp::Gt => "GT",
            CompareOp::Le => "LE",
            CompareOp::Ge => "GE",
            CompareOp::Eq => "EQ",
            CompareOp::Neq => "NEQ",
        }
    }
}

impl LogicalOp {
    /// Any non-zero operand counts as true; the result is `1.0` or `0.0`.
    pub fn apply(self, x: f64, y: f64) -> f64 {
        truth(match self {
            LogicalOp::And => is_true(x) && is_true(y),
            LogicalOp::Or => is_true(x) || is_true(y),
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            LogicalOp::And => "LAND",
            LogicalOp::Or => "LOR",
        }
    }
}

impl Operator {
    /// Number of operands popped from the stack.
    pub fn arity(self) -> usize {
        match self {
            Operator::Unary(_) => 1,
            Operator::Binary(_) | Operator::Compare(_) | Operator::Logical(_) => 2,
        }
    }

    /// Applies the operator to `args`, which must hold exactly [`Operator::arity`] values
    /// in stack order (deepest first).
    pub fn apply(self, args: &[f64]) -> f64 {
        match (self, args) {
            (Operator::Unary(op), [x]) => op.apply(*x),
            (Operator::Binary(op), [x, y]) => op.apply(*x, *y),
            (Operator::Compare(op), [x, y]) => op.apply(*x, *y),
            (Operator::Logical(op), [x, y]) => op.apply(*x, *y),
            _ => f64::NAN,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Operator::Unary(op) => op.mnemonic(),
            Operator::Binary(op) => op.mnemonic(),
            Operator::Compare(op) => op.mnemonic(),
            Operator::Logical(op) => op.mnemonic(),
        }
    }
}

impl From<UnaryOp> for Operator {
    fn from(op: UnaryOp) -> Self {
        Operator::Unary(op)
    }
}

impl From<BinaryOp> for Operator {
    fn from(op: BinaryOp) -> Self {
        Operator::Binary(op)
    }
}

impl From<CompareOp> for Operator {
    fn from(op: CompareOp) -> Self {
        Operator::Compare(op)
    }
}

impl From<LogicalOp> for Operator {
    fn from(op: LogicalOp) -> Self {
        Operator::Logical(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        assert_eq!(BinaryOp::Add.apply(2.0, 3.0), 5.0);
        assert_eq!(BinaryOp::Sub.apply(2.0, 3.0), -1.0);
        assert_eq!(BinaryOp::Mul.apply(2.0, 3.0), 6.0);
        assert_eq!(BinaryOp::Div.apply(3.0, 2.0), 1.5);
        assert_eq!(BinaryOp::Pow.apply(2.0, 10.0), 1024.0);
        assert!(BinaryOp::Div.apply(1.0, 0.0).is_infinite());
    }

    #[test]
    fn test_comparison_yields_zero_or_one() {
        assert_eq!(CompareOp::Lt.apply(1.0, 2.0), 1.0);
        assert_eq!(CompareOp::Ge.apply(1.0, 2.0), 0.0);
        assert_eq!(CompareOp::Eq.apply(2.0, 2.0), 1.0);
        assert_eq!(CompareOp::Neq.apply(f64::NAN, f64::NAN), 1.0);
    }

    #[test]
    fn test_logical_treats_nonzero_as_true() {
        assert_eq!(LogicalOp::And.apply(0.5, 2.0), 1.0);
        assert_eq!(LogicalOp::And.apply(0.5, 0.0), 0.0);
        assert_eq!(LogicalOp::Or.apply(0.0, -3.0), 1.0);
        assert_eq!(UnaryOp::Not.apply(0.25), 0.0);
        assert_eq!(UnaryOp::Not.apply(0.0), 1.0);
    }

    #[test]
    fn test_operator_arity_and_apply() {
        let neg = Operator::from(UnaryOp::Neg);
        assert_eq!(neg.arity(), 1);
        assert_eq!(neg.apply(&[4.0]), -4.0);
        let mul = Operator::from(BinaryOp::Mul);
        assert_eq!(mul.arity(), 2);
        assert_eq!(mul.apply(&[4.0, 2.5]), 10.0);
        assert!(mul.apply(&[4.0]).is_nan());
        assert_eq!(mul.to_string(), "MUL");
    }
}
