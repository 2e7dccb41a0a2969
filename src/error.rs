//! Error system.
//!
//! A single taxonomy covers both diagnostics handed up from the (external)
//! compile pipeline and the ones raised by the interpreter itself. Errors
//! are never converted to sentinel values inside this crate; a failing
//! opcode handler returns `Err` and `Vm::run` stops executing the failing
//! path.

use crate::span::Span;

/// The error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    Type,
    Reference,
    Range,
    Arithmetic,
    Argument,
    State,
    Assert,
    Io,
    Import,
    User,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Arithmetic => "ArithmeticError",
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::State => "StateError",
            ErrorKind::Assert => "AssertError",
            ErrorKind::Io => "IOError",
            ErrorKind::Import => "ImportError",
            ErrorKind::User => "Error",
        };
        write!(f, "{s}")
    }
}

/// A runtime (or compile-handoff) diagnostic.
///
/// Carries enough to reproduce a readable diagnostic: the kind, a
/// pre-formatted message (values are rendered through their display form
/// before being embedded), the source location of the operand at fault
/// (favoring the left operand when both are problematic), and the mnemonic
/// of the opcode that raised it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Span>,
    pub opcode: Option<&'static str>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            opcode: None,
        }
    }

    pub fn with_location(mut self, location: Span) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_opcode(mut self, opcode: &'static str) -> Self {
        self.opcode = Some(opcode);
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn reference_error(name: &str) -> Self {
        Self::new(ErrorKind::Reference, format!("`{name}` is not defined"))
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Range, message)
    }

    pub fn arithmetic_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arithmetic, message)
    }

    pub fn argument_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Argument, message)
    }

    pub fn state_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, message)
    }

    pub fn import_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Import, message)
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User, message)
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(loc) = &self.location {
            write!(f, " at {loc}")?;
        }
        if let Some(op) = self.opcode {
            write!(f, " (in {op})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}
