//! The compiled representation handed to an installer

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "format")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ty::Type;

pub mod callsite;
pub mod constant;
pub mod instruction;
pub mod instruction_iter;

use callsite::CallSiteDescriptor;
use constant::{Constant, LiteralData};

/// Parameter and return types of a compiled method
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: SmallVec<[Type; 4]>,
    pub ret: Type,
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = Type>, ret: Type) -> Self {
        Self {
            params: params.into_iter().collect(),
            ret,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, "){}", self.ret)
    }
}

/// A statically resolved reference to a method in some unit
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub unit: Arc<str>,
    pub name: Arc<str>,
    pub signature: Signature,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.unit, self.name, self.signature)
    }
}

#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// The body of a script function: `(callee, this, params...)`
    Function,
    /// The outermost function of a script
    Program,
    /// Part of a split function body: `(callee, this, scope[, arguments])`
    SplitUnit,
    /// Element stores of a large array literal: `(callee, this, scope, array)`
    ArrayUnit,
    /// Shared scope call: `(scope, depth, args...)`
    ScopeCall,
    /// Shared scope read: `(scope, depth)`
    ScopeGet,
}

#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub ip: u32,
    pub line: u32,
}

/// A named local slot and the instruction range it is live in
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub slot: u16,
    pub name: Arc<str>,
    pub ty: Type,
    pub start: u32,
    pub end: u32,
}

/// A protected instruction range. Entries are ordered innermost first.
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRegion {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
}

#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: Arc<str>,
    pub kind: MethodKind,
    pub signature: Signature,
    pub code: Box<[u8]>,
    /// The type of every local slot, parameters included
    pub slots: Vec<Type>,
    pub max_stack: u16,
    pub lines: Vec<LineEntry>,
    pub locals: Vec<LocalEntry>,
    pub try_regions: Vec<TryRegion>,
}

impl CompiledFunction {
    /// The source line of the instruction at `ip`
    pub fn line_at(&self, ip: u32) -> Option<u32> {
        self.lines.iter().take_while(|e| e.ip <= ip).last().map(|e| e.line)
    }
}

/// An installable group of functions sharing a constant pool, a literal pool and a call site table
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub name: Arc<str>,
    pub source_name: Arc<str>,
    pub functions: Vec<CompiledFunction>,
    pub constants: Box<[Constant]>,
    pub literals: Box<[LiteralData]>,
    pub call_sites: Box<[Arc<CallSiteDescriptor>]>,
}

impl CompiledUnit {
    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| &*f.name == name)
    }

    pub fn constant(&self, id: u16) -> Option<&Constant> {
        self.constants.get(usize::from(id))
    }

    pub fn literal(&self, id: u32) -> Option<&LiteralData> {
        self.literals.get(id as usize)
    }

    pub fn call_site(&self, id: u16) -> Option<&CallSiteDescriptor> {
        self.call_sites.get(usize::from(id)).map(|c| &**c)
    }
}
