use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHashMap;
#[cfg(feature = "format")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ty::Type;

use super::MethodRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pool limit exceeded")]
pub struct LimitExceededError;

/// A value embedded in the constant pool of a unit
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub enum Constant {
    Long(i64),
    Double(f64),
    String(Arc<str>),
    Method(MethodRef),
    /// The own property names of a scope record
    PropertyMap(Arc<[Arc<str>]>),
}

impl Constant {
    /// The type of the value pushed when this constant is loaded
    pub fn ty(&self) -> Type {
        match self {
            Constant::Long(_) => Type::Long,
            Constant::Double(_) => Type::Double,
            _ => Type::Object,
        }
    }

    pub fn as_method(&self) -> Option<&MethodRef> {
        match self {
            Constant::Method(m) => Some(m),
            _ => None,
        }
    }
}

// Doubles are compared by bit pattern so that `NaN` and `-0.0` get their own entries
impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Long(a), Constant::Long(b)) => a == b,
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            (Constant::Method(a), Constant::Method(b)) => a == b,
            (Constant::PropertyMap(a), Constant::PropertyMap(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Long(v) => v.hash(state),
            Constant::Double(v) => v.to_bits().hash(state),
            Constant::String(v) => v.hash(state),
            Constant::Method(v) => v.hash(state),
            Constant::PropertyMap(v) => v.hash(state),
        }
    }
}

/// The deduplicating constant pool of a unit
#[derive(Debug, Default)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    index: FxHashMap<Constant, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constant, returning the index of an identical entry if there already is one
    pub fn add(&mut self, constant: Constant) -> Result<u16, LimitExceededError> {
        if let Some(&id) = self.index.get(&constant) {
            return Ok(id);
        }

        let id = u16::try_from(self.constants.len()).map_err(|_| LimitExceededError)?;
        self.constants.push(constant.clone());
        self.index.insert(constant, id);
        Ok(id)
    }

    pub fn get(&self, id: u16) -> Option<&Constant> {
        self.constants.get(usize::from(id))
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn into_inner(self) -> Box<[Constant]> {
        self.constants.into_boxed_slice()
    }
}

/// A compile time constant element of an array literal
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub enum PresetValue {
    /// A hole, or an element that is stored after the preset is loaded
    Empty,
    Undefined,
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(Arc<str>),
}

impl PartialEq for PresetValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PresetValue::Empty, PresetValue::Empty)
            | (PresetValue::Undefined, PresetValue::Undefined)
            | (PresetValue::Null, PresetValue::Null) => true,
            (PresetValue::Boolean(a), PresetValue::Boolean(b)) => a == b,
            (PresetValue::Int(a), PresetValue::Int(b)) => a == b,
            (PresetValue::Long(a), PresetValue::Long(b)) => a == b,
            (PresetValue::Double(a), PresetValue::Double(b)) => a.to_bits() == b.to_bits(),
            (PresetValue::String(a), PresetValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PresetValue {}

impl Hash for PresetValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            PresetValue::Boolean(v) => v.hash(state),
            PresetValue::Int(v) => v.hash(state),
            PresetValue::Long(v) => v.hash(state),
            PresetValue::Double(v) => v.to_bits().hash(state),
            PresetValue::String(v) => v.hash(state),
            PresetValue::Empty | PresetValue::Undefined | PresetValue::Null => {}
        }
    }
}

/// The raw element array an array literal starts out with
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayPreset {
    /// The element type of the raw array
    pub element: Type,
    pub values: Vec<PresetValue>,
}

/// Large or structured literal data that is not embedded in the constant pool
#[cfg_attr(feature = "format", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LiteralData {
    String(Arc<str>),
    Array(ArrayPreset),
    /// A regular expression template that is copied on every load
    Regex { pattern: Arc<str>, flags: Arc<str> },
}

/// Auxiliary per-unit storage for [`LiteralData`], bounded by a ceiling
#[derive(Debug)]
pub struct LiteralPool {
    entries: Vec<LiteralData>,
    index: FxHashMap<LiteralData, u32>,
    ceiling: usize,
}

impl LiteralPool {
    pub fn new(ceiling: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: FxHashMap::default(),
            ceiling,
        }
    }

    pub fn add(&mut self, data: LiteralData) -> Result<u32, LimitExceededError> {
        if let Some(&id) = self.index.get(&data) {
            return Ok(id);
        }
        if self.entries.len() >= self.ceiling {
            return Err(LimitExceededError);
        }

        let id = u32::try_from(self.entries.len()).map_err(|_| LimitExceededError)?;
        self.entries.push(data.clone());
        self.index.insert(data, id);
        Ok(id)
    }

    pub fn get(&self, id: u32) -> Option<&LiteralData> {
        self.entries.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_inner(self) -> Box<[LiteralData]> {
        self.entries.into_boxed_slice()
    }
}
