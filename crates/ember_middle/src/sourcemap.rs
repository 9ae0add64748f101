use std::fmt;

#[cfg(feature = "format")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub lo: u32,
    pub hi: u32,
}

impl Span {
    pub const COMPILER_GENERATED: Span = Span { lo: 0, hi: 0 };

    pub fn to(self, other: Span) -> Span {
        debug_assert!(other.hi >= self.lo);
        Span {
            lo: self.lo,
            hi: other.hi,
        }
    }

    pub fn is_compiler_generated(self) -> bool {
        self == Self::COMPILER_GENERATED
    }
}

/// A source position as reported in diagnostics: the line of the enclosing statement and the span of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: u32,
    pub span: Span,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.span.is_compiler_generated() {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "line {} ({}..{})", self.line, self.span.lo, self.span.hi)
        }
    }
}
