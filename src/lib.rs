//! rpn-asm: an RPN bytecode assembler for math expression evaluators.
//!
//! A front-end parser resolves precedence and calls the emission API of [`Bytecode`] in
//! postfix order. The assembler folds constant subexpressions as they are emitted, tracks
//! the operand-stack depth needed to run the program, and backpatches the jumps of
//! conditional expressions. The finalized stream is then executed, as many times as
//! needed, by an [`Evaluator`].
//!
//! # Architecture
//! - Operators and their numeric semantics (`ops`)
//! - Instruction format and handle types (`ir`)
//! - Instruction stream and emission API (`bytecode`)
//! - Constant folding (`fold`)
//! - Human-readable dumps (`dump`)
//! - Variable cells, callables and string arguments (`symbols`)
//! - Reference stack-machine evaluator (`eval`)
//!
//! ```
//! use rpn_asm::*;
//!
//! let mut symbols = SymbolTable::new();
//! let x = symbols.define_var("x", 4.0);
//!
//! let mut bc = Bytecode::new();
//! bc.add_val(2.0)?;
//! bc.add_val(3.0)?;
//! bc.add_op(BinaryOp::Add.into())?; // folded into a single immediate
//! bc.add_var(x)?;
//! bc.add_op(BinaryOp::Mul.into())?;
//! bc.finalize()?;
//!
//! assert_eq!(bc.len(), 4);
//! assert_eq!(Evaluator::new().eval(&bc, &mut symbols)?, 20.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bytecode;
mod config;
mod dump;
mod eval;
mod fold;
mod ir;
mod ops;
mod symbols;

pub use bytecode::*;
pub use config::*;
pub use eval::*;
pub use ir::*;
pub use ops::*;
pub use symbols::*;

use thiserror::Error;

/// Errors raised while assembling a program.
///
/// Everything except [`AsmError::AlreadyFinalized`] and [`AsmError::NotFinalized`] means the
/// emission sequence itself is malformed, which points at a bug in the front-end rather than
/// at bad user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("stack underflow at {op}: needs {needed} operand(s), {available} available")]
    StackUnderflow {
        op: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{marker} without a matching {expected}")]
    UnbalancedBranch {
        marker: &'static str,
        expected: &'static str,
    },
    #[error("{branch} branch may leave at most one value, found {found}")]
    BranchValueCount { branch: &'static str, found: usize },
    #[error("ELSE branch leaves {found} value(s) but the IF branch left {expected}")]
    BranchMismatch { expected: usize, found: usize },
    #[error("{open} conditional(s) still open at finalize")]
    UnclosedBranch { open: usize },
    #[error("bytecode is finalized and read-only")]
    AlreadyFinalized,
    #[error("bytecode is not finalized")]
    NotFinalized,
}

impl AsmError {
    /// True for errors caused by a malformed emission sequence.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, AsmError::AlreadyFinalized | AsmError::NotFinalized)
    }
}

/// Errors raised while evaluating a finalized program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Bytecode(#[from] AsmError),
    #[error("unknown variable #{0}")]
    UnknownVariable(usize),
    #[error("unknown function #{0}")]
    UnknownFunction(usize),
    #[error("unknown string argument #{0}")]
    UnknownString(usize),
    #[error("function '{name}' is not a {expected} function")]
    WrongKind { name: String, expected: &'static str },
    #[error("function '{name}' takes a fixed argument list, called as variadic")]
    NotVariadic { name: String },
    #[error("function '{name}' takes {expected} argument(s), called with {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("operand stack exhausted")]
    StackExhausted,
}
