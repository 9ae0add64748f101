#[cfg(feature = "format")]
use serde::{Deserialize, Serialize};
use strum_macros::{Display, FromRepr};

use crate::ty::Type;

/// Opcodes of the stack machine.
///
/// Operands follow the opcode byte inline, little endian. Branch targets are absolute offsets into
/// the instruction stream of the same function.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
pub enum Instruction {
    Nop,
    Pop,
    Dup,
    /// Duplicates the top two values
    Dup2,
    /// Copies the top value below the second value (`a b` -> `b a b`)
    DupX1,
    /// Copies the top value below the third value (`a b c` -> `c a b c`)
    DupX2,
    Swap,
    Undefined,
    Null,
    True,
    False,
    /// `i32` immediate
    Int,
    /// `u16` index into the constant pool of the unit
    Constant,
    /// `u32` index into the literal pool of the unit
    Literal,
    /// `u16` slot
    LdLocal,
    /// `u16` slot
    StoreLocal,
    /// [`ArithOp`], [`Type`]
    Arith,
    /// [`Type`]
    Neg,
    /// [`Condition`], [`Type`]; pushes a boolean
    Cmp,
    /// [`Type`] from, [`Type`] to
    Convert,
    /// `u32` target
    Goto,
    /// `u32` target; pops a boolean
    IfTrue,
    /// `u32` target; pops a boolean
    IfFalse,
    /// `i32` low, `i32` high, `u32` default, `high - low + 1` `u32` targets; pops an int
    TableSwitch,
    /// `u32` default, `u16` count, `count` pairs of `i32` key and `u32` target; pops an int
    LookupSwitch,
    /// [`Type`]
    Return,
    Throw,
    /// [`RuntimeCall`]
    Runtime,
    /// `u16` constant pool index of a method reference
    InvokeStatic,
    /// `u16` constant pool index of a method reference; pops the scope, pushes a function object
    NewFunction,
    /// `u16` index into the call site table of the unit
    Dynamic,
    /// [`Type`] of the element; pops array, index and value
    ArrayStore,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "lowercase")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Sar,
    /// Unsigned right shift. The result does not fit an int and is widened to long.
    Shr,
}

impl ArithOp {
    /// Whether this operation is defined for two operands of type `ty`
    pub fn accepts(self, ty: Type) -> bool {
        match self {
            ArithOp::Add => matches!(ty, Type::Int | Type::Long | Type::Double | Type::Object),
            ArithOp::Sub | ArithOp::Mul | ArithOp::Div | ArithOp::Rem => ty.is_numeric(),
            ArithOp::BitAnd | ArithOp::BitOr | ArithOp::BitXor => ty.is_integral(),
            ArithOp::Shl | ArithOp::Sar | ArithOp::Shr => ty == Type::Int,
        }
    }

    /// The type this operation pushes for operands of type `ty`
    pub fn result(self, ty: Type) -> Type {
        match self {
            ArithOp::Shr => Type::Long,
            _ => ty,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "lowercase")]
pub enum Condition {
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Condition {
    pub fn negate(self) -> Condition {
        match self {
            Condition::Eq => Condition::Ne,
            Condition::Ne => Condition::Eq,
            Condition::StrictEq => Condition::StrictNe,
            Condition::StrictNe => Condition::StrictEq,
            Condition::Lt => Condition::Ge,
            Condition::Le => Condition::Gt,
            Condition::Gt => Condition::Le,
            Condition::Ge => Condition::Lt,
        }
    }
}

/// Calls into the execution target's runtime support library.
///
/// Every call has a fixed stack signature, see [`RuntimeCall::params`] and [`RuntimeCall::ret`].
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
pub enum RuntimeCall {
    /// The parent of a scope record
    GetProto,
    /// A new scope record with the given parent and own properties (a property map constant)
    NewScope,
    /// Merges the top level scope record of a script into the global object
    MergeScope,
    /// The scope a function object was created in
    CalleeScope,
    /// Builds the `arguments` object out of the varargs array, the callee and the declared parameter count
    AllocateArguments,
    /// The n-th element of a varargs array, or undefined
    ArgumentAt,
    GlobalInstance,
    /// Whether a value is the built-in `eval` function
    IsEval,
    /// Evaluates source text in the given scope, with the given `this`, source location and strictness
    DirectEval,
    /// Pushes a `with` object on top of a scope
    OpenWith,
    PropertyIterator,
    ValueIterator,
    HasNext,
    Next,
    /// Converts a switch tag to an int, or to the given default if it is not an integral number
    SwitchTagAsInt,
    NewRegExp,
    /// A fresh copy of a cached regular expression template
    CopyRegExp,
    /// A raw element array of the given length
    NewRawArray,
    /// A script array backed by a raw element array
    AllocateArray,
    GetSplitState,
    SetSplitState,
    NewObject,
    ToBoolean,
    ToInt32,
    ToLong,
    ToNumber,
    Typeof,
    Delete,
    In,
    InstanceOf,
}

impl RuntimeCall {
    pub fn params(self) -> &'static [Type] {
        use Type::*;
        match self {
            RuntimeCall::GlobalInstance | RuntimeCall::NewObject => &[],
            RuntimeCall::GetProto
            | RuntimeCall::MergeScope
            | RuntimeCall::CalleeScope
            | RuntimeCall::IsEval
            | RuntimeCall::PropertyIterator
            | RuntimeCall::ValueIterator
            | RuntimeCall::HasNext
            | RuntimeCall::Next
            | RuntimeCall::CopyRegExp
            | RuntimeCall::AllocateArray
            | RuntimeCall::GetSplitState
            | RuntimeCall::ToBoolean
            | RuntimeCall::ToInt32
            | RuntimeCall::ToLong
            | RuntimeCall::ToNumber
            | RuntimeCall::Typeof => &[Object],
            RuntimeCall::NewScope
            | RuntimeCall::OpenWith
            | RuntimeCall::NewRegExp
            | RuntimeCall::In
            | RuntimeCall::InstanceOf => &[Object, Object],
            RuntimeCall::ArgumentAt | RuntimeCall::SwitchTagAsInt | RuntimeCall::SetSplitState => &[Object, Int],
            RuntimeCall::NewRawArray => &[Int],
            RuntimeCall::AllocateArguments => &[Object, Object, Int],
            RuntimeCall::Delete => &[Object, Object, Boolean],
            RuntimeCall::DirectEval => &[Object, Object, Object, Object, Boolean],
        }
    }

    /// The type pushed by this call, if any
    pub fn ret(self) -> Option<Type> {
        match self {
            RuntimeCall::SetSplitState => None,
            RuntimeCall::IsEval
            | RuntimeCall::HasNext
            | RuntimeCall::ToBoolean
            | RuntimeCall::Delete
            | RuntimeCall::In
            | RuntimeCall::InstanceOf => Some(Type::Boolean),
            RuntimeCall::SwitchTagAsInt | RuntimeCall::GetSplitState | RuntimeCall::ToInt32 => Some(Type::Int),
            RuntimeCall::ToLong => Some(Type::Long),
            RuntimeCall::ToNumber => Some(Type::Double),
            _ => Some(Type::Object),
        }
    }
}
