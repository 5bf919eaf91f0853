//! Symbols module: variable cells, callables and string arguments referenced by bytecode.
//!
//! Bytecode stores plain [`VarId`], [`FunId`] and [`StrId`] indices into a [`SymbolTable`].
//! The table must outlive every compiled program that refers to it; wrap it in an `Arc`
//! when several owners need it. Entries are only ever appended, so handles stay valid for
//! the lifetime of the table.

use crate::ir::{Arity, FunId, StrId, VarId};
use crate::EvalError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait ScalarFunction: Send + Sync {
    fn call(&self, args: &[f64]) -> f64;
}

/// A function evaluated once per element of a bulk evaluation; receives the element index.
pub trait BulkFunction: Send + Sync {
    fn call(&self, index: usize, args: &[f64]) -> f64;
}

/// A function taking one string argument ahead of its numeric operands.
pub trait StringFunction: Send + Sync {
    fn call(&self, text: &str, args: &[f64]) -> f64;
}

impl<F> ScalarFunction for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn call(&self, args: &[f64]) -> f64 {
        self(args)
    }
}

impl<F> BulkFunction for F
where
    F: Fn(usize, &[f64]) -> f64 + Send + Sync,
{
    fn call(&self, index: usize, args: &[f64]) -> f64 {
        self(index, args)
    }
}

impl<F> StringFunction for F
where
    F: Fn(&str, &[f64]) -> f64 + Send + Sync,
{
    fn call(&self, text: &str, args: &[f64]) -> f64 {
        self(text, args)
    }
}

#[derive(Clone)]
pub enum Callable {
    Scalar(Arc<dyn ScalarFunction>),
    Bulk(Arc<dyn BulkFunction>),
    Str(Arc<dyn StringFunction>),
}

impl Callable {
    pub fn kind(&self) -> &'static str {
        match self {
            Callable::Scalar(_) => "scalar",
            Callable::Bulk(_) => "bulk",
            Callable::Str(_) => "string",
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable::{}", self.kind())
    }
}

#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub name: String,
    /// Declared signature. `Variadic(n)` accepts `n` or more operands.
    pub arity: Arity,
    pub callable: Callable,
}

impl FunctionEntry {
    /// Checks an emitted call's operand count against the declared signature. A variadic
    /// call site only matches a variadic callable.
    pub fn check_arity(&self, call: Arity) -> Result<(), EvalError> {
        if call.is_variadic() && !self.arity.is_variadic() {
            return Err(EvalError::NotVariadic { name: self.name.clone() });
        }
        let found = call.count();
        let ok = match self.arity {
            Arity::Fixed(n) => found == n,
            Arity::Variadic(min) => found >= min,
        };
        if ok {
            Ok(())
        } else {
            Err(EvalError::ArgumentCount {
                name: self.name.clone(),
                expected: self.arity.count(),
                found,
            })
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    values: Vec<f64>,
    var_names: Vec<String>,
    var_ids: HashMap<String, VarId>,
    functions: Vec<FunctionEntry>,
    fun_ids: HashMap<String, FunId>,
    strings: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a variable, or overwrites the value of an existing one and returns its handle.
    pub fn define_var(&mut self, name: impl Into<String>, value: f64) -> VarId {
        let name = name.into();
        if let Some(&id) = self.var_ids.get(&name) {
            self.values[id.0] = value;
            return id;
        }
        let id = VarId(self.values.len());
        self.values.push(value);
        self.var_ids.insert(name.clone(), id);
        self.var_names.push(name);
        id
    }

    pub fn var_id(&self, name: &str) -> Option<VarId> {
        self.var_ids.get(name).copied()
    }

    pub fn var_name(&self, id: VarId) -> Option<&str> {
        self.var_names.get(id.0).map(|s| s.as_str())
    }

    pub fn var(&self, id: VarId) -> Option<f64> {
        self.values.get(id.0).copied()
    }

    pub fn set_var(&mut self, id: VarId, value: f64) -> Result<(), EvalError> {
        match self.values.get_mut(id.0) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(EvalError::UnknownVariable(id.0)),
        }
    }

    pub fn num_vars(&self) -> usize {
        self.values.len()
    }

    pub fn define_fun<F>(&mut self, name: impl Into<String>, arity: Arity, func: F) -> FunId
    where
        F: ScalarFunction + 'static,
    {
        self.insert_fun(name.into(), arity, Callable::Scalar(Arc::new(func)))
    }

    pub fn define_bulk_fun<F>(&mut self, name: impl Into<String>, arity: Arity, func: F) -> FunId
    where
        F: BulkFunction + 'static,
    {
        self.insert_fun(name.into(), arity, Callable::Bulk(Arc::new(func)))
    }

    /// `arity` counts the numeric operands only.
    pub fn define_str_fun<F>(&mut self, name: impl Into<String>, arity: Arity, func: F) -> FunId
    where
        F: StringFunction + 'static,
    {
        self.insert_fun(name.into(), arity, Callable::Str(Arc::new(func)))
    }

    pub fn fun_id(&self, name: &str) -> Option<FunId> {
        self.fun_ids.get(name).copied()
    }

    pub fn function(&self, id: FunId) -> Option<&FunctionEntry> {
        self.functions.get(id.0)
    }

    pub fn add_string(&mut self, text: impl Into<String>) -> StrId {
        self.strings.push(text.into());
        StrId(self.strings.len() - 1)
    }

    pub fn string(&self, id: StrId) -> Option<&str> {
        self.strings.get(id.0).map(|s| s.as_str())
    }

    // Redefinition keeps the old entry alive so existing handles stay valid.
    fn insert_fun(&mut self, name: String, arity: Arity, callable: Callable) -> FunId {
        let id = FunId(self.functions.len());
        self.functions.push(FunctionEntry { name: name.clone(), arity, callable });
        self.fun_ids.insert(name, id);
        id
    }
}

macro_rules! builtin_functions {
    ($( $name:ident: $func_name:expr, $arity:expr, $args:ident => $body:expr ),* $(,)?) => {
        $(
            pub struct $name;
            impl ScalarFunction for $name {
                fn call(&self, $args: &[f64]) -> f64 {
                    $body
                }
            }
        )*
        /// Installs the standard math functions and `strlen`.
        pub fn register_builtins(table: &mut SymbolTable) {
            $(table.define_fun($func_name, $arity, $name);)*
            table.define_str_fun("strlen", Arity::Fixed(0), StrLenFunction);
        }
    };
}

builtin_functions! {
    SinFunction: "sin", Arity::Fixed(1), args => args[0].sin(),
    CosFunction: "cos", Arity::Fixed(1), args => args[0].cos(),
    TanFunction: "tan", Arity::Fixed(1), args => args[0].tan(),
    SqrtFunction: "sqrt", Arity::Fixed(1), args => args[0].sqrt(),
    AbsFunction: "abs", Arity::Fixed(1), args => args[0].abs(),
    LnFunction: "ln", Arity::Fixed(1), args => args[0].ln(),
    ExpFunction: "exp", Arity::Fixed(1), args => args[0].exp(),
    MinFunction: "min", Arity::Variadic(1), args => args.iter().copied().fold(f64::INFINITY, f64::min),
    MaxFunction: "max", Arity::Variadic(1), args => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    SumFunction: "sum", Arity::Variadic(1), args => args.iter().sum(),
    AvgFunction: "avg", Arity::Variadic(1), args => args.iter().sum::<f64>() / args.len() as f64,
}

pub struct StrLenFunction;

impl StringFunction for StrLenFunction {
    fn call(&self, text: &str, _args: &[f64]) -> f64 {
        text.chars().count() as f64
    }
}
