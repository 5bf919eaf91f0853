//! Human-readable listing of a bytecode stream, one instruction per line.
//!
//! ```text
//! Number of RPN tokens: 4
//!    0 : VAR          depth 1  [VAR #0]
//!    1 : VAL          depth 2  [3]
//!    2 : MUL          depth 1
//!    3 : END          depth 1
//! ```

use crate::bytecode::Bytecode;
use crate::ir::{Instruction, Op};
use std::fmt;

impl Op {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Val(_) => "VAL",
            Op::Var(_) => "VAR",
            Op::Oprt(op) => op.mnemonic(),
            Op::If { .. } => "IF",
            Op::Else { .. } => "ELSE",
            Op::EndIf => "ENDIF",
            Op::Assign(_) => "ASSIGN",
            Op::Call(_) => "CALL",
            Op::BulkCall(_) => "CALL BULK",
            Op::StrCall { .. } => "CALL STRFUNC",
            Op::End => "END",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Val(v) => write!(f, "[{v}]"),
            Op::Var(var) | Op::Assign(var) => write!(f, "[VAR #{}]", var.0),
            Op::If { offset } | Op::Else { offset } => write!(f, "[OFFSET: {offset}]"),
            Op::Call(call) | Op::BulkCall(call) => {
                write!(f, "[ARG: {}][FUN #{}]", call.arity.to_signed(), call.fun.0)
            }
            Op::StrCall { call, string } => write!(
                f,
                "[ARG: {}][IDX: {}][FUN #{}]",
                call.arity.to_signed(),
                string.0,
                call.fun.0
            ),
            Op::Oprt(_) | Op::EndIf | Op::End => Ok(()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = format!("{:<12} depth {}  {}", self.op.mnemonic(), self.stack_depth, self.op);
        f.write_str(line.trim_end())
    }
}

impl fmt::Display for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No bytecode available");
        }
        writeln!(f, "Number of RPN tokens: {}", self.len())?;
        for (i, instr) in self.instructions().iter().enumerate() {
            writeln!(f, "{i:>4} : {instr}")?;
        }
        Ok(())
    }
}

impl Bytecode {
    /// Renders the listing shown in the module docs. Does not require a finalized stream.
    pub fn dump(&self) -> String {
        self.to_string()
    }
}
