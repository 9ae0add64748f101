#[cfg(feature = "format")]
use serde::{Deserialize, Serialize};
use strum_macros::{Display, FromRepr};

/// The static type of a value, as annotated by the resolver and tracked on the operand stack.
///
/// The variants are ordered from narrowest to widest, so the join of two types is their maximum.
/// `Undefined` is the bottom of the lattice: it describes a value whose type is not known yet and
/// never appears on the operand stack itself (it is represented as an `Object` there).
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Type {
    Undefined,
    Boolean,
    Int,
    Long,
    Double,
    Object,
}

impl Type {
    /// The widest common type of `self` and `other`
    pub fn widest(self, other: Type) -> Type {
        self.max(other)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Type::Int | Type::Long | Type::Double)
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Type::Int | Type::Long)
    }

    pub fn is_boolean(self) -> bool {
        self == Type::Boolean
    }

    pub fn is_object(self) -> bool {
        matches!(self, Type::Object | Type::Undefined)
    }

    /// Whether a value of this type is a primitive on the operand stack
    pub fn is_primitive(self) -> bool {
        !self.is_object()
    }

    /// The type a value of this type occupies on the operand stack
    pub fn stack_type(self) -> Type {
        match self {
            Type::Undefined => Type::Object,
            other => other,
        }
    }
}
