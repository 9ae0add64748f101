use std::fmt;
use std::sync::Arc;

use ember_middle::ast::RuntimeRequest;
use ember_middle::sourcemap::Location;
use ember_middle::ty::Type;
use thiserror::Error;

use crate::install::InstallError;
use crate::verify::VerifyError;

/// The sequence of operand types on the modeled stack, bottom first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackShape(pub Vec<Type>);

impl fmt::Display for StackShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ty) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        Ok(())
    }
}

impl From<&[Type]> for StackShape {
    fn from(value: &[Type]) -> Self {
        Self(value.to_vec())
    }
}

/// A failure that aborts the whole compilation.
///
/// Every variant is an internal inconsistency; source errors are rejected before code generation.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("stack shape mismatch at {context} in `{function}` at {location}: expected [{expected}], found [{actual}]")]
    StackShapeMismatch {
        function: Arc<str>,
        location: Location,
        context: &'static str,
        expected: StackShape,
        actual: StackShape,
    },
    #[error("`{op}` expects {expected} but found {actual} in `{function}` at {location}")]
    OperandType {
        function: Arc<str>,
        location: Location,
        op: &'static str,
        expected: Type,
        actual: Type,
    },
    #[error("`{op}` is not defined for {ty} in `{function}` at {location}")]
    UnsupportedOperand {
        function: Arc<str>,
        location: Location,
        op: &'static str,
        ty: Type,
    },
    #[error("stack underflow at `{op}` in `{function}` at {location}")]
    StackUnderflow {
        function: Arc<str>,
        location: Location,
        op: &'static str,
    },
    #[error("label `{label}` in `{function}` is jumped to but never bound")]
    UnboundLabel { function: Arc<str>, label: &'static str },
    #[error("label `{label}` in `{function}` at {location} is bound twice")]
    LabelRebound {
        function: Arc<str>,
        location: Location,
        label: &'static str,
    },
    #[error("jump to unreachable label `{label}` in `{function}` at {location}")]
    DeadLabel {
        function: Arc<str>,
        location: Location,
        label: &'static str,
    },
    #[error("`{function}` can fall off the end of its body")]
    MissingReturn { function: Arc<str> },
    #[error("no compile unit for `{function}`")]
    MissingCompileUnit { function: Arc<str> },
    #[error("no slot for {what} in `{function}`")]
    MissingSlot { function: Arc<str>, what: Arc<str> },
    #[error("`{kind}` without a target in `{function}` at {location}")]
    MissingJumpTarget {
        function: Arc<str>,
        location: Location,
        kind: &'static str,
        label: Option<Arc<str>>,
    },
    #[error("cannot assign to this expression in `{function}` at {location}")]
    InvalidAssignmentTarget { function: Arc<str>, location: Location },
    #[error("malformed runtime request `{request}` in `{function}` at {location}: expected {expected} operands, found {found}")]
    MalformedRuntimeRequest {
        function: Arc<str>,
        location: Location,
        request: RuntimeRequest,
        expected: usize,
        found: usize,
    },
    #[error("{what} limit exceeded in `{function}`")]
    LimitExceeded { function: Arc<str>, what: &'static str },
    #[error("split unit `{unit}` of `{function}` failed verification")]
    SplitVerification {
        function: Arc<str>,
        unit: Arc<str>,
        #[source]
        source: VerifyError,
    },
    #[error("unit `{unit}` failed verification")]
    Verification {
        unit: Arc<str>,
        #[source]
        source: VerifyError,
    },
    #[error("failed to install unit `{unit}`")]
    Install {
        unit: Arc<str>,
        #[source]
        source: InstallError,
    },
}

impl CompileError {
    /// The function the error was raised in, if it is attributable to one
    pub fn function(&self) -> Option<&str> {
        match self {
            CompileError::StackShapeMismatch { function, .. }
            | CompileError::OperandType { function, .. }
            | CompileError::UnsupportedOperand { function, .. }
            | CompileError::StackUnderflow { function, .. }
            | CompileError::UnboundLabel { function, .. }
            | CompileError::LabelRebound { function, .. }
            | CompileError::DeadLabel { function, .. }
            | CompileError::MissingReturn { function }
            | CompileError::MissingCompileUnit { function }
            | CompileError::MissingSlot { function, .. }
            | CompileError::MissingJumpTarget { function, .. }
            | CompileError::InvalidAssignmentTarget { function, .. }
            | CompileError::MalformedRuntimeRequest { function, .. }
            | CompileError::LimitExceeded { function, .. }
            | CompileError::SplitVerification { function, .. } => Some(&**function),
            CompileError::Verification { .. } | CompileError::Install { .. } => None,
        }
    }
}
