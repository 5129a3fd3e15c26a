//! Sandboxed evaluator for model-generated numeric functions.
//!
//! Generated "code" is never executed. It is parsed into a small expression
//! language restricted to a fixed numeric namespace (trig, exp/log, roots,
//! rounding, piecewise helpers and constants) and evaluated by a tree walker.
//!
//! # Module layout
//!
//! - [`error`]: `EvalError`, `EvalResult`
//! - `lexer` / `parser`: tokens, AST, name resolution, evaluation
//! - `namespace`: the builtin functions and constants
//! - `source`: `compile_function`, `CompiledFunction`

pub mod error;
mod lexer;
mod namespace;
mod parser;
mod source;

pub use error::{EvalError, EvalResult};
pub use source::{compile_function, CompiledFunction};
