use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
#[cfg(feature = "format")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum_macros::Display;

use crate::ty::Type;

bitflags! {
    /// Hints passed to the linker along with a dynamic call site
    #[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
    pub struct CallSiteFlags: u16 {
        /// The receiver is a scope record and the name is resolved along the scope chain
        const SCOPE = 0x01;
        const STRICT = 0x02;
        /// Arguments were collapsed into a single array
        const SPREAD_ARGS = 0x04;
        const PROFILE = 0x10;
        const TRACE = 0x20;
        const TRACE_MISSES = 0x40;
        const TRACE_ENTEREXIT = 0x80;
        const TRACE_VALUES = 0x100;
        const TRACE_SCOPE = 0x200;
        /// The property is known to live exactly on the receiver scope record
        const FAST_SCOPE = 0x400;

        const INSTRUMENTATION = Self::PROFILE.bits
            | Self::TRACE.bits
            | Self::TRACE_MISSES.bits
            | Self::TRACE_ENTEREXIT.bits
            | Self::TRACE_VALUES.bits
            | Self::TRACE_SCOPE.bits;
    }
}

#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "camelCase")]
pub enum Operation {
    /// `receiver` -> value
    GetProp,
    /// `receiver value` ->
    SetProp,
    /// `receiver key` -> value
    GetElem,
    /// `receiver key value` ->
    SetElem,
    /// `callee this args...` -> value
    Call,
    /// `callee args...` -> value
    New,
}

/// The static shape of a dynamic operation.
///
/// `params` lists the types of every value the operation pops, in push order,
/// so the stack effect of a [`Dynamic`](super::instruction::Instruction::Dynamic) instruction is fully described by its descriptor.
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSiteDescriptor {
    pub operation: Operation,
    pub name: Option<Arc<str>>,
    pub params: SmallVec<[Type; 4]>,
    pub ret: Option<Type>,
    pub flags: CallSiteFlags,
}

impl CallSiteDescriptor {
    pub fn is_scope(&self) -> bool {
        self.flags.contains(CallSiteFlags::SCOPE)
    }

    pub fn is_fast_scope(&self) -> bool {
        self.flags.contains(CallSiteFlags::FAST_SCOPE)
    }
}

impl fmt::Display for CallSiteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn:{}", self.operation)?;
        if let Some(name) = &self.name {
            write!(f, ":{name}")?;
        }
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")?;
        match self.ret {
            Some(ret) => write!(f, "{ret}")?,
            None => f.write_str("void")?,
        }
        if self.flags.contains(CallSiteFlags::SCOPE) {
            f.write_str(" scope")?;
        }
        if self.flags.contains(CallSiteFlags::FAST_SCOPE) {
            f.write_str(" fastscope")?;
        }
        if self.flags.contains(CallSiteFlags::STRICT) {
            f.write_str(" strict")?;
        }
        if self.flags.contains(CallSiteFlags::SPREAD_ARGS) {
            f.write_str(" spread")?;
        }
        Ok(())
    }
}
