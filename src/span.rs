//! Source location used for error attribution.

/// A source location: file, 1-indexed line, 1-indexed column.
///
/// Carried by heap-allocated `Value`s and by `SET_DEBUG_LOCATION` so that a
/// failing opcode can blame the operand that caused it rather than just the
/// currently executing instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Span {
    pub file: std::rc::Rc<str>,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(file: impl Into<std::rc::Rc<str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
