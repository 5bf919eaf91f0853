//! Bytecode module: the RPN instruction stream and the emission API used by a front-end parser.
//!
//! Every emission call appends in RPN order, keeps the running operand-stack depth and its
//! high-water mark up to date, and rejects calls that would underflow the stack or break the
//! nesting of conditional branches. A rejected call leaves the stream untouched.
//!
//! # Lifecycle
//!
//! A [`Bytecode`] starts empty, is filled through the `add_*` methods, and is sealed with
//! [`Bytecode::finalize`], which appends the end-of-program marker. After that the stream is
//! read-only: further emission fails with [`AsmError::AlreadyFinalized`] until
//! [`Bytecode::clear`] resets it. Cloning copies all instructions, so two clones never share
//! state.

use crate::config::AssemblerConfig;
use crate::fold::fold_tail;
use crate::ir::{Arity, FunCall, FunId, Instruction, Op, StrId, VarId};
use crate::ops::Operator;
use crate::AsmError;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Conditional marker passed to [`Bytecode::add_if_else`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    If,
    Else,
    EndIf,
}

/// A conditional whose closing marker has not been emitted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenBranch {
    /// Index of the `If` (or, once seen, the `Else`) waiting for its jump offset.
    marker: usize,
    /// Stack depth at which each branch starts.
    base: usize,
    /// Values left by the true branch, known once `Else` is emitted.
    then_values: Option<usize>,
}

impl OpenBranch {
    fn in_else(&self) -> bool {
        self.then_values.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Bytecode {
    rpn: Vec<Instruction>,
    stack_pos: usize,
    max_stack: usize,
    optimize: bool,
    open: Vec<OpenBranch>,
    finalized: bool,
}

impl Default for Bytecode {
    fn default() -> Self {
        Self::with_config(AssemblerConfig::default())
    }
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AssemblerConfig) -> Self {
        Self {
            rpn: Vec::new(),
            stack_pos: 0,
            max_stack: 0,
            optimize: config.optimize,
            open: Vec::new(),
            finalized: false,
        }
    }

    pub fn enable_optimizer(&mut self, enabled: bool) {
        self.optimize = enabled;
    }

    pub fn optimizer_enabled(&self) -> bool {
        self.optimize
    }

    /// Pushes an immediate.
    pub fn add_val(&mut self, value: f64) -> Result<(), AsmError> {
        self.ensure_writable()?;
        self.push(Op::Val(value));
        Ok(())
    }

    /// Pushes a variable load. Never folded, the cell may change between evaluations.
    pub fn add_var(&mut self, var: VarId) -> Result<(), AsmError> {
        self.ensure_writable()?;
        self.push(Op::Var(var));
        Ok(())
    }

    /// Emits an operator, folding it away when its operands are all immediates and the
    /// optimizer is on.
    pub fn add_op(&mut self, op: Operator) -> Result<(), AsmError> {
        self.ensure_writable()?;
        self.require(op.mnemonic(), op.arity())?;
        if self.optimize && fold_tail(&mut self.rpn, op) {
            self.stack_pos = self.stack_pos + 1 - op.arity();
            return Ok(());
        }
        self.push(Op::Oprt(op));
        Ok(())
    }

    /// Emits a conditional marker.
    ///
    /// `If` consumes the condition when one is on the stack; with nothing reachable it is
    /// emitted as a bare marker and the missing condition surfaces at evaluation. Each
    /// branch leaves at most one value and both branches must leave the same number. The
    /// `If` jump is patched when `Else` arrives and the `Else` jump when `EndIf` arrives,
    /// so both land on the instruction right after the marker they skip to.
    pub fn add_if_else(&mut self, branch: Branch) -> Result<(), AsmError> {
        self.ensure_writable()?;
        match branch {
            Branch::If => {
                let depth = self.stack_pos - self.available().min(1);
                let marker = self.push_at(Op::If { offset: 0 }, depth);
                self.open.push(OpenBranch { marker, base: depth, then_values: None });
            }
            Branch::Else => {
                let open = match self.open.last() {
                    Some(open) if !open.in_else() => *open,
                    _ => return Err(AsmError::UnbalancedBranch { marker: "ELSE", expected: "IF" }),
                };
                let values = self.branch_values("IF", open.base)?;
                let at = self.push_at(Op::Else { offset: 0 }, open.base);
                self.patch(open.marker, at + 1);
                if let Some(top) = self.open.last_mut() {
                    top.marker = at;
                    top.then_values = Some(values);
                }
            }
            Branch::EndIf => {
                let (open, expected) = match self.open.last() {
                    Some(open) => match open.then_values {
                        Some(n) => (*open, n),
                        None => return Err(AsmError::UnbalancedBranch { marker: "ENDIF", expected: "ELSE" }),
                    },
                    None => return Err(AsmError::UnbalancedBranch { marker: "ENDIF", expected: "ELSE" }),
                };
                let found = self.branch_values("ELSE", open.base)?;
                if found != expected {
                    return Err(AsmError::BranchMismatch { expected, found });
                }
                let at = self.push(Op::EndIf);
                self.patch(open.marker, at + 1);
                self.open.pop();
            }
        }
        Ok(())
    }

    /// Emits an assignment of the top of the stack into `var`. The value stays on the stack.
    pub fn add_assign_op(&mut self, var: VarId) -> Result<(), AsmError> {
        self.ensure_writable()?;
        self.require("ASSIGN", 1)?;
        self.push(Op::Assign(var));
        Ok(())
    }

    pub fn add_fun(&mut self, fun: FunId, arity: Arity) -> Result<(), AsmError> {
        self.add_call("CALL", Op::Call(FunCall { fun, arity }))
    }

    /// Emits a call the evaluator may dispatch once per element of a bulk evaluation.
    pub fn add_bulk_fun(&mut self, fun: FunId, arity: Arity) -> Result<(), AsmError> {
        self.add_call("CALL BULK", Op::BulkCall(FunCall { fun, arity }))
    }

    /// Emits a string-function call. `arity` counts numeric operands only; the string
    /// argument is looked up through `string`.
    pub fn add_str_fun(&mut self, fun: FunId, arity: Arity, string: StrId) -> Result<(), AsmError> {
        self.add_call("CALL STRFUNC", Op::StrCall { call: FunCall { fun, arity }, string })
    }

    /// Seals the program with the end marker. Any balanced stream can be sealed, including
    /// an empty one.
    pub fn finalize(&mut self) -> Result<(), AsmError> {
        self.ensure_writable()?;
        if !self.open.is_empty() {
            return Err(AsmError::UnclosedBranch { open: self.open.len() });
        }
        self.push(Op::End);
        self.rpn.shrink_to_fit();
        self.finalized = true;
        debug!(
            instructions = self.rpn.len(),
            max_stack = self.max_stack_size(),
            "bytecode finalized"
        );
        Ok(())
    }

    /// Drops every instruction and resets the stack bookkeeping. The optimizer setting is kept.
    pub fn clear(&mut self) {
        self.rpn.clear();
        self.stack_pos = 0;
        self.max_stack = 0;
        self.open.clear();
        self.finalized = false;
    }

    /// Operand-stack slots an evaluator must provide: the high-water mark plus one scratch slot.
    pub fn max_stack_size(&self) -> usize {
        self.max_stack + 1
    }

    /// Current operand-stack depth.
    pub fn stack_depth(&self) -> usize {
        self.stack_pos
    }

    pub fn len(&self) -> usize {
        self.rpn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rpn.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// The sealed program, terminated by [`Op::End`].
    pub fn base(&self) -> Result<&[Instruction], AsmError> {
        if !self.finalized {
            return Err(AsmError::NotFinalized);
        }
        Ok(&self.rpn)
    }

    /// Instructions emitted so far, finalized or not.
    pub fn instructions(&self) -> &[Instruction] {
        &self.rpn
    }

    fn add_call(&mut self, name: &'static str, op: Op) -> Result<(), AsmError> {
        self.ensure_writable()?;
        let needed = match op {
            Op::Call(call) | Op::BulkCall(call) | Op::StrCall { call, .. } => call.arity.count(),
            _ => 0,
        };
        self.require(name, needed)?;
        self.push(op);
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), AsmError> {
        if self.finalized {
            return Err(AsmError::AlreadyFinalized);
        }
        Ok(())
    }

    /// Operands reachable from the current position. Values below the innermost open
    /// branch belong to the enclosing expression.
    fn available(&self) -> usize {
        let floor = self.open.last().map_or(0, |open| open.base);
        self.stack_pos - floor
    }

    fn require(&self, op: &'static str, needed: usize) -> Result<(), AsmError> {
        let available = self.available();
        if available < needed {
            return Err(AsmError::StackUnderflow { op, needed, available });
        }
        Ok(())
    }

    fn branch_values(&self, branch: &'static str, base: usize) -> Result<usize, AsmError> {
        let found = self.stack_pos - base;
        if found > 1 {
            return Err(AsmError::BranchValueCount { branch, found });
        }
        Ok(found)
    }

    /// Appends `op` with its resulting depth and returns its index. Callers have already
    /// checked that the stack holds enough operands.
    fn push(&mut self, op: Op) -> usize {
        let depth = self.stack_pos as isize + op.stack_effect();
        self.push_at(op, depth.max(0) as usize)
    }

    fn push_at(&mut self, op: Op, depth: usize) -> usize {
        self.stack_pos = depth;
        self.max_stack = self.max_stack.max(self.stack_pos);
        let at = self.rpn.len();
        trace!(at, ?op, depth = self.stack_pos, "emit");
        self.rpn.push(Instruction::new(op, self.stack_pos));
        at
    }

    fn patch(&mut self, marker: usize, target: usize) {
        let offset = target - marker;
        if let Some(instr) = self.rpn.get_mut(marker) {
            match &mut instr.op {
                Op::If { offset: slot } | Op::Else { offset: slot } => *slot = offset,
                _ => return,
            }
            debug!(marker, target, "patched branch jump");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Command;
    use crate::ops::{BinaryOp, CompareOp, UnaryOp};

    fn unoptimized() -> Bytecode {
        Bytecode::with_config(AssemblerConfig::new().optimize(false))
    }

    fn depths(bc: &Bytecode) -> Vec<usize> {
        bc.instructions().iter().map(|i| i.stack_depth).collect()
    }

    #[test]
    fn test_new_stream_is_empty() {
        let bc = Bytecode::new();
        assert!(bc.is_empty());
        assert_eq!(bc.max_stack_size(), 1);
        assert!(bc.optimizer_enabled());
        assert_eq!(bc.base(), Err(AsmError::NotFinalized));
    }

    #[test]
    fn test_stack_depth_tracks_each_instruction() {
        let mut bc = unoptimized();
        bc.add_var(VarId(0)).unwrap();
        bc.add_val(2.0).unwrap();
        bc.add_val(3.0).unwrap();
        bc.add_op(BinaryOp::Mul.into()).unwrap();
        bc.add_op(BinaryOp::Add.into()).unwrap();
        bc.add_op(UnaryOp::Neg.into()).unwrap();
        assert_eq!(depths(&bc), vec![1, 2, 3, 2, 1, 1]);
        assert_eq!(bc.max_stack_size(), 4);
    }

    #[test]
    fn test_constant_operands_fold() {
        let mut bc = Bytecode::new();
        bc.add_val(2.0).unwrap();
        bc.add_val(3.0).unwrap();
        bc.add_op(BinaryOp::Add.into()).unwrap();
        assert_eq!(bc.len(), 1);
        assert_eq!(bc.instructions()[0].op, Op::Val(5.0));
        assert_eq!(bc.stack_depth(), 1);
        assert_eq!(bc.max_stack_size(), 3);
    }

    #[test]
    fn test_variable_operand_does_not_fold() {
        let mut bc = Bytecode::new();
        bc.add_val(2.0).unwrap();
        bc.add_var(VarId(0)).unwrap();
        bc.add_op(BinaryOp::Add.into()).unwrap();
        let commands: Vec<_> = bc.instructions().iter().map(|i| i.command()).collect();
        assert_eq!(commands, vec![Command::Val, Command::Var, Command::Binary]);
    }

    #[test]
    fn test_folding_chains() {
        let mut bc = Bytecode::new();
        bc.add_val(1.0).unwrap();
        bc.add_val(2.0).unwrap();
        bc.add_op(BinaryOp::Add.into()).unwrap();
        bc.add_val(3.0).unwrap();
        bc.add_op(BinaryOp::Mul.into()).unwrap();
        bc.add_op(UnaryOp::Neg.into()).unwrap();
        assert_eq!(bc.instructions(), &[Instruction::new(Op::Val(-9.0), 1)]);
    }

    #[test]
    fn test_optimizer_toggle_at_runtime() {
        let mut bc = Bytecode::new();
        bc.enable_optimizer(false);
        bc.add_val(2.0).unwrap();
        bc.add_val(3.0).unwrap();
        bc.add_op(CompareOp::Lt.into()).unwrap();
        assert_eq!(bc.len(), 3);
    }

    #[test]
    fn test_underflow_is_rejected_without_mutation() {
        let mut bc = Bytecode::new();
        let err = bc.add_op(BinaryOp::Add.into()).unwrap_err();
        assert_eq!(err, AsmError::StackUnderflow { op: "ADD", needed: 2, available: 0 });
        bc.add_val(1.0).unwrap();
        assert!(bc.add_op(BinaryOp::Add.into()).unwrap_err().is_malformed());
        assert_eq!(bc.len(), 1);
        assert_eq!(bc.stack_depth(), 1);
        assert!(bc.add_assign_op(VarId(0)).is_ok());
    }

    #[test]
    fn test_assign_needs_a_value() {
        let mut bc = Bytecode::new();
        assert_eq!(
            bc.add_assign_op(VarId(0)),
            Err(AsmError::StackUnderflow { op: "ASSIGN", needed: 1, available: 0 })
        );
        assert_eq!(bc.len(), 0);

        bc.add_var(VarId(1)).unwrap();
        bc.add_if_else(Branch::If).unwrap();
        let len = bc.len();
        let err = bc.add_assign_op(VarId(0)).unwrap_err();
        assert_eq!(err, AsmError::StackUnderflow { op: "ASSIGN", needed: 1, available: 0 });
        assert!(err.is_malformed());
        assert_eq!(bc.len(), len);
    }

    #[test]
    fn test_bulk_call_underflow() {
        let mut bc = Bytecode::new();
        bc.add_val(1.0).unwrap();
        assert_eq!(
            bc.add_bulk_fun(FunId(0), Arity::Fixed(2)),
            Err(AsmError::StackUnderflow { op: "CALL BULK", needed: 2, available: 1 })
        );
        assert_eq!(bc.len(), 1);
        assert_eq!(bc.stack_depth(), 1);
    }

    #[test]
    fn test_function_arity_bookkeeping() {
        let mut bc = Bytecode::new();
        bc.add_val(1.0).unwrap();
        bc.add_val(2.0).unwrap();
        let err = bc.add_fun(FunId(0), Arity::Fixed(3)).unwrap_err();
        assert!(matches!(err, AsmError::StackUnderflow { needed: 3, available: 2, .. }));
        bc.add_val(3.0).unwrap();
        bc.add_fun(FunId(0), Arity::from_signed(-3)).unwrap();
        assert_eq!(bc.stack_depth(), 1);
        bc.add_str_fun(FunId(1), Arity::Fixed(0), StrId(0)).unwrap();
        assert_eq!(bc.stack_depth(), 2);
        bc.add_bulk_fun(FunId(2), Arity::Fixed(2)).unwrap();
        assert_eq!(bc.stack_depth(), 1);
        assert_eq!(bc.max_stack_size(), 4);
    }

    #[test]
    fn test_ternary_offsets_land_after_markers() {
        let mut bc = Bytecode::new();
        bc.add_var(VarId(0)).unwrap();
        bc.add_if_else(Branch::If).unwrap();
        bc.add_val(1.0).unwrap();
        bc.add_if_else(Branch::Else).unwrap();
        bc.add_val(2.0).unwrap();
        bc.add_if_else(Branch::EndIf).unwrap();
        bc.finalize().unwrap();

        let rpn = bc.base().unwrap();
        assert_eq!(rpn[1].op, Op::If { offset: 3 });
        assert_eq!(rpn[3].op, Op::Else { offset: 3 });
        assert_eq!(rpn[1 + 3].op, Op::Val(2.0));
        assert_eq!(rpn[3 + 3].op, Op::End);
        assert_eq!(depths(&bc), vec![1, 0, 1, 0, 1, 1, 1]);
    }

    #[test]
    fn test_nested_ternary() {
        let mut bc = unoptimized();
        bc.add_var(VarId(0)).unwrap();
        bc.add_if_else(Branch::If).unwrap();
        bc.add_var(VarId(1)).unwrap();
        bc.add_if_else(Branch::If).unwrap();
        bc.add_val(1.0).unwrap();
        bc.add_if_else(Branch::Else).unwrap();
        bc.add_val(2.0).unwrap();
        bc.add_if_else(Branch::EndIf).unwrap();
        bc.add_if_else(Branch::Else).unwrap();
        bc.add_val(3.0).unwrap();
        bc.add_if_else(Branch::EndIf).unwrap();
        bc.finalize().unwrap();
        let rpn = bc.base().unwrap();
        assert_eq!(rpn[1].op, Op::If { offset: 8 });
        assert_eq!(rpn[3].op, Op::If { offset: 3 });
        assert_eq!(rpn[5].op, Op::Else { offset: 3 });
        assert_eq!(rpn[8].op, Op::Else { offset: 3 });
    }

    #[test]
    fn test_unbalanced_markers() {
        let mut bc = Bytecode::new();
        bc.add_val(1.0).unwrap();
        assert_eq!(
            bc.add_if_else(Branch::Else),
            Err(AsmError::UnbalancedBranch { marker: "ELSE", expected: "IF" })
        );
        bc.add_if_else(Branch::If).unwrap();
        bc.add_val(2.0).unwrap();
        assert_eq!(
            bc.add_if_else(Branch::EndIf),
            Err(AsmError::UnbalancedBranch { marker: "ENDIF", expected: "ELSE" })
        );
        assert_eq!(bc.finalize(), Err(AsmError::UnclosedBranch { open: 1 }));
    }

    #[test]
    fn test_bare_ternary_finalizes() {
        let mut bc = Bytecode::new();
        bc.add_if_else(Branch::If).unwrap();
        bc.add_if_else(Branch::Else).unwrap();
        bc.add_if_else(Branch::EndIf).unwrap();
        bc.finalize().unwrap();
        let rpn = bc.base().unwrap();
        assert_eq!(rpn[0].op, Op::If { offset: 2 });
        assert_eq!(rpn[1].op, Op::Else { offset: 2 });
        assert_eq!(rpn[2].op, Op::EndIf);
        assert_eq!(rpn[1 + 2].op, Op::End);
        assert_eq!(depths(&bc), vec![0, 0, 0, 0]);
        assert_eq!(bc.max_stack_size(), 1);
    }

    #[test]
    fn test_branch_value_counts() {
        let mut bc = Bytecode::new();
        bc.add_val(1.0).unwrap();
        bc.add_if_else(Branch::If).unwrap();
        bc.add_val(1.0).unwrap();
        bc.add_val(2.0).unwrap();
        assert_eq!(
            bc.add_if_else(Branch::Else),
            Err(AsmError::BranchValueCount { branch: "IF", found: 2 })
        );
        bc.add_op(BinaryOp::Add.into()).unwrap();
        bc.add_if_else(Branch::Else).unwrap();
        let len = bc.len();
        assert_eq!(bc.add_if_else(Branch::EndIf), Err(AsmError::BranchMismatch { expected: 1, found: 0 }));
        assert_eq!(bc.len(), len);
        bc.add_val(3.0).unwrap();
        bc.add_if_else(Branch::EndIf).unwrap();
        assert_eq!(bc.stack_depth(), 1);
    }

    #[test]
    fn test_branch_cannot_consume_enclosing_operands() {
        let mut bc = Bytecode::new();
        bc.add_var(VarId(0)).unwrap();
        bc.add_var(VarId(1)).unwrap();
        bc.add_if_else(Branch::If).unwrap();
        bc.add_val(1.0).unwrap();
        let err = bc.add_op(BinaryOp::Add.into()).unwrap_err();
        assert_eq!(err, AsmError::StackUnderflow { op: "ADD", needed: 2, available: 1 });
    }

    #[test]
    fn test_finalize_seals_the_stream() {
        let mut bc = Bytecode::new();
        bc.add_val(1.0).unwrap();
        bc.finalize().unwrap();
        assert_eq!(bc.base().unwrap().last().map(|i| i.op), Some(Op::End));
        assert_eq!(bc.finalize(), Err(AsmError::AlreadyFinalized));
        assert_eq!(bc.add_val(2.0), Err(AsmError::AlreadyFinalized));
        assert!(!AsmError::AlreadyFinalized.is_malformed());
    }

    #[test]
    fn test_clear_resets_to_fresh_state() {
        let mut bc = unoptimized();
        bc.add_val(1.0).unwrap();
        bc.add_val(2.0).unwrap();
        bc.add_if_else(Branch::If).unwrap();
        bc.clear();
        assert_eq!(bc.len(), 0);
        assert_eq!(bc.max_stack_size(), 1);
        assert_eq!(bc.stack_depth(), 0);
        assert!(!bc.optimizer_enabled());
        assert!(bc.add_if_else(Branch::Else).is_err());
        bc.add_val(1.0).unwrap();
        bc.finalize().unwrap();
        assert_eq!(bc.len(), 2);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut bc = Bytecode::new();
        bc.add_var(VarId(0)).unwrap();
        bc.finalize().unwrap();
        let copy = bc.clone();
        bc.clear();
        assert_eq!(copy.len(), 2);
        assert_eq!(copy.max_stack_size(), 2);
        assert!(copy.is_finalized());
    }

    #[test]
    fn test_empty_stream_finalizes() {
        let mut bc = Bytecode::new();
        bc.finalize().unwrap();
        assert_eq!(bc.base().unwrap(), &[Instruction::new(Op::End, 0)]);
        assert_eq!(bc.max_stack_size(), 1);
    }
}
