//! Eval module: reference stack machine for finalized bytecode.
//!
//! The operand stack is sized once from [`Bytecode::max_stack_size`] and never grows while
//! a program runs. Numeric failures such as division by zero follow IEEE-754 and produce
//! `inf` or `NaN` rather than errors.

use crate::bytecode::Bytecode;
use crate::ir::{FunCall, Op};
use crate::symbols::{Callable, FunctionEntry, SymbolTable};
use crate::EvalError;
use tracing::debug;

/// Reusable evaluator; keeps its stack buffer between runs.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    stack: Vec<f64>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the program and returns the value on top of the stack. A program that leaves
    /// nothing, such as an empty one, fails with [`EvalError::StackExhausted`].
    pub fn eval(&mut self, bytecode: &Bytecode, symbols: &mut SymbolTable) -> Result<f64, EvalError> {
        let depth = self.run(bytecode, symbols, 0)?;
        Ok(self.stack[depth - 1])
    }

    /// Runs the program and returns every value it leaves on the stack, deepest first.
    /// A top-level comma list such as `a, b, c` leaves one value per item.
    pub fn eval_multi(&mut self, bytecode: &Bytecode, symbols: &mut SymbolTable) -> Result<Vec<f64>, EvalError> {
        let depth = self.run(bytecode, symbols, 0)?;
        Ok(self.stack[..depth].to_vec())
    }

    /// Runs the program `count` times. Bulk functions see the element index of each run.
    pub fn eval_bulk(
        &mut self,
        bytecode: &Bytecode,
        symbols: &mut SymbolTable,
        count: usize,
    ) -> Result<Vec<f64>, EvalError> {
        debug!(count, "bulk evaluation");
        let mut out = Vec::with_capacity(count);
        for index in 0..count {
            let depth = self.run(bytecode, symbols, index)?;
            out.push(self.stack[depth - 1]);
        }
        Ok(out)
    }

    /// Executes the program and returns the final stack depth (always at least 1).
    fn run(&mut self, bytecode: &Bytecode, symbols: &mut SymbolTable, index: usize) -> Result<usize, EvalError> {
        let program = bytecode.base()?;
        self.stack.clear();
        self.stack.resize(bytecode.max_stack_size(), 0.0);

        let mut sp = 0usize;
        let mut pc = 0usize;
        while let Some(instr) = program.get(pc) {
            match instr.op {
                Op::Val(v) => self.push(&mut sp, v)?,
                Op::Var(var) => {
                    let v = symbols.var(var).ok_or(EvalError::UnknownVariable(var.0))?;
                    self.push(&mut sp, v)?;
                }
                Op::Oprt(op) => {
                    let base = operands(sp, op.arity())?;
                    let result = op.apply(&self.stack[base..sp]);
                    sp = self.store(base, result)?;
                }
                Op::If { offset } => {
                    // A bare marker was emitted without a condition to consume.
                    sp = operands(sp, 1)?;
                    if sp != instr.stack_depth {
                        return Err(EvalError::StackExhausted);
                    }
                    if self.stack[sp] == 0.0 {
                        pc += offset;
                        continue;
                    }
                }
                Op::Else { offset } => {
                    pc += offset;
                    continue;
                }
                Op::EndIf => {}
                Op::Assign(var) => {
                    let top = operands(sp, 1)?;
                    symbols.set_var(var, self.stack[top])?;
                }
                Op::Call(call) => {
                    let entry = lookup(symbols, call)?;
                    let base = operands(sp, call.arity.count())?;
                    let result = match &entry.callable {
                        Callable::Scalar(f) => f.call(&self.stack[base..sp]),
                        _ => return Err(wrong_kind(entry, "scalar")),
                    };
                    sp = self.store(base, result)?;
                }
                Op::BulkCall(call) => {
                    let entry = lookup(symbols, call)?;
                    let base = operands(sp, call.arity.count())?;
                    let result = match &entry.callable {
                        Callable::Bulk(f) => f.call(index, &self.stack[base..sp]),
                        _ => return Err(wrong_kind(entry, "bulk")),
                    };
                    sp = self.store(base, result)?;
                }
                Op::StrCall { call, string } => {
                    let entry = lookup(symbols, call)?;
                    let text = symbols.string(string).ok_or(EvalError::UnknownString(string.0))?;
                    let base = operands(sp, call.arity.count())?;
                    let result = match &entry.callable {
                        Callable::Str(f) => f.call(text, &self.stack[base..sp]),
                        _ => return Err(wrong_kind(entry, "string")),
                    };
                    sp = self.store(base, result)?;
                }
                Op::End => break,
            }
            debug_assert_eq!(sp, instr.stack_depth, "stack depth diverged at {pc}");
            pc += 1;
        }

        if sp == 0 {
            return Err(EvalError::StackExhausted);
        }
        Ok(sp)
    }

    fn push(&mut self, sp: &mut usize, value: f64) -> Result<(), EvalError> {
        let slot = self.stack.get_mut(*sp).ok_or(EvalError::StackExhausted)?;
        *slot = value;
        *sp += 1;
        Ok(())
    }

    /// Writes a call result at `base` (the slot of its first operand) and returns the new depth.
    fn store(&mut self, base: usize, value: f64) -> Result<usize, EvalError> {
        let slot = self.stack.get_mut(base).ok_or(EvalError::StackExhausted)?;
        *slot = value;
        Ok(base + 1)
    }
}

fn operands(sp: usize, count: usize) -> Result<usize, EvalError> {
    sp.checked_sub(count).ok_or(EvalError::StackExhausted)
}

fn lookup(symbols: &SymbolTable, call: FunCall) -> Result<&FunctionEntry, EvalError> {
    let entry = symbols.function(call.fun).ok_or(EvalError::UnknownFunction(call.fun.0))?;
    entry.check_arity(call.arity)?;
    Ok(entry)
}

fn wrong_kind(entry: &FunctionEntry, expected: &'static str) -> EvalError {
    EvalError::WrongKind { name: entry.name.clone(), expected }
}
