//! Constant folder: peephole pass run by [`crate::Bytecode::add_op`].
//!
//! Looks only at the operand window of the operator being emitted. When every
//! operand in that window is an immediate, the window collapses into one immediate
//! holding the result. Variable loads, call results and branch markers are never
//! part of a foldable window.

use crate::ir::{Instruction, Op};
use crate::ops::Operator;
use tracing::debug;

/// Folds `op` into the tail of `rpn` if its operands are all immediates.
///
/// Returns `true` when the operator was absorbed; the caller must then not emit it.
/// The surviving immediate keeps the stack depth of the first operand, which is the
/// depth the operator's result would have had.
pub(crate) fn fold_tail(rpn: &mut Vec<Instruction>, op: Operator) -> bool {
    let arity = op.arity();
    if rpn.len() < arity {
        return false;
    }
    let start = rpn.len() - arity;
    let mut args = [0.0; 2];
    for (slot, instr) in args.iter_mut().zip(&rpn[start..]) {
        match instr.immediate() {
            Some(v) => *slot = v,
            None => return false,
        }
    }

    let value = op.apply(&args[..arity]);
    let depth = rpn[start].stack_depth;
    debug!(%op, ?value, at = start, "folded constant operands");
    rpn.truncate(start);
    rpn.push(Instruction::new(Op::Val(value), depth));
    true
}
