//! Intermediate Representation (IR) for the expression engine.
//!
//! This module defines the RPN instruction record produced by the assembler and the
//! handle types it uses to refer to cells and callables owned by a [`crate::SymbolTable`].

use crate::ops::Operator;
use serde::{Deserialize, Serialize};

/// Index of a variable cell in a symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub usize);

/// Index of a callable in a symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunId(pub usize);

/// Index of a string argument in a symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrId(pub usize);

/// Number of numeric operands a call consumes.
///
/// `Variadic(n)` marks a call to a variable-arity callable that received `n`
/// operands at this call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arity {
    Fixed(usize),
    Variadic(usize),
}

impl Arity {
    /// Decodes the signed convention where `-n` means "variadic, called with `n` operands".
    pub fn from_signed(argc: i32) -> Self {
        if argc < 0 {
            Arity::Variadic(argc.unsigned_abs() as usize)
        } else {
            Arity::Fixed(argc as usize)
        }
    }

    /// Operands actually taken from the stack.
    pub fn count(self) -> usize {
        match self {
            Arity::Fixed(n) | Arity::Variadic(n) => n,
        }
    }

    pub fn is_variadic(self) -> bool {
        matches!(self, Arity::Variadic(_))
    }

    /// Inverse of [`Arity::from_signed`].
    pub fn to_signed(self) -> i64 {
        match self {
            Arity::Fixed(n) => n as i64,
            Arity::Variadic(n) => -(n as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunCall {
    pub fun: FunId,
    pub arity: Arity,
}

/// Payload of one instruction; the variant is the command tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Push an immediate.
    Val(f64),
    /// Push the current value of a variable cell.
    Var(VarId),
    /// Pop one or two operands, push the result.
    Oprt(Operator),
    /// Pop the condition; when it is zero continue at `position + offset`.
    If { offset: usize },
    /// End of the taken branch; continue at `position + offset`.
    Else { offset: usize },
    EndIf,
    /// Store the top of the stack into a cell, leaving it on the stack.
    Assign(VarId),
    Call(FunCall),
    BulkCall(FunCall),
    StrCall { call: FunCall, string: StrId },
    End,
}

/// Plain command tag, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Val,
    Var,
    Unary,
    Binary,
    Compare,
    Logical,
    If,
    Else,
    EndIf,
    Assign,
    Func,
    FuncBulk,
    FuncStr,
    End,
}

impl Op {
    pub fn command(&self) -> Command {
        match self {
            Op::Val(_) => Command::Val,
            Op::Var(_) => Command::Var,
            Op::Oprt(Operator::Unary(_)) => Command::Unary,
            Op::Oprt(Operator::Binary(_)) => Command::Binary,
            Op::Oprt(Operator::Compare(_)) => Command::Compare,
            Op::Oprt(Operator::Logical(_)) => Command::Logical,
            Op::If { .. } => Command::If,
            Op::Else { .. } => Command::Else,
            Op::EndIf => Command::EndIf,
            Op::Assign(_) => Command::Assign,
            Op::Call(_) => Command::Func,
            Op::BulkCall(_) => Command::FuncBulk,
            Op::StrCall { .. } => Command::FuncStr,
            Op::End => Command::End,
        }
    }

    /// Net effect on the operand stack when executed in straight-line order.
    ///
    /// Covers the usual ternary shape: `If` pops its condition and `Else` drops the one
    /// value of the true branch. A bare marker or a branch that leaves nothing is recorded
    /// at its actual depth by the emitter.
    pub fn stack_effect(&self) -> isize {
        match self {
            Op::Val(_) | Op::Var(_) => 1,
            Op::Oprt(op) => 1 - op.arity() as isize,
            Op::If { .. } | Op::Else { .. } => -1,
            Op::EndIf | Op::Assign(_) | Op::End => 0,
            Op::Call(call) | Op::BulkCall(call) | Op::StrCall { call, .. } => {
                1 - call.arity.count() as isize
            }
        }
    }
}

/// A single RPN step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Op,
    /// Operand-stack depth after this instruction.
    pub stack_depth: usize,
}

impl Instruction {
    pub fn new(op: Op, stack_depth: usize) -> Self {
        Self { op, stack_depth }
    }

    pub fn command(&self) -> Command {
        self.op.command()
    }

    /// Immediate carried by a `Val` instruction.
    pub fn immediate(&self) -> Option<f64> {
        match self.op {
            Op::Val(v) => Some(v),
            _ => None,
        }
    }
}
