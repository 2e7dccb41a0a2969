//! Runtime core for the Slate language (see `spec.md` for the full
//! specification this crate implements): the bytecode VM, heap value
//! model, closure/call-frame machinery, error taxonomy, and module loader.
//!
//! The lexer, parser, code generator, REPL, and CLI front-end are external
//! collaborators — this crate consumes already-compiled `FunctionValue`s
//! (see `value::function`) and never parses Slate source itself, except
//! through the `module::ModuleCompiler` seam a host implementation plugs
//! into.

pub mod bytecode;
pub mod error;
pub mod module;
pub mod ordered_map;
pub mod span;
pub mod value;
pub mod vm;

pub use error::{ErrorKind, RuntimeError};
pub use value::{Value, ValueType};
pub use vm::Vm;
