//! Compiled units under construction and the policy that packs functions into them

use std::sync::Arc;

use ember_middle::compiler::callsite::CallSiteDescriptor;
use ember_middle::compiler::constant::{Constant, ConstantPool, LimitExceededError, LiteralData, LiteralPool};
use ember_middle::compiler::{CompiledFunction, CompiledUnit, MethodRef, Signature};
use ember_middle::index_type;
use rustc_hash::FxHashMap;

use crate::shared_call::SharedCallKey;

index_type!(
    /// Index of a unit in the order it was opened
    UnitId u16
);

/// Read access to the pools of a unit, finished or not
pub trait UnitView {
    fn constant(&self, id: u16) -> Option<&Constant>;
    fn literal(&self, id: u32) -> Option<&LiteralData>;
    fn call_site(&self, id: u16) -> Option<&CallSiteDescriptor>;
}

impl UnitView for CompiledUnit {
    fn constant(&self, id: u16) -> Option<&Constant> {
        CompiledUnit::constant(self, id)
    }

    fn literal(&self, id: u32) -> Option<&LiteralData> {
        CompiledUnit::literal(self, id)
    }

    fn call_site(&self, id: u16) -> Option<&CallSiteDescriptor> {
        CompiledUnit::call_site(self, id)
    }
}

#[derive(Debug)]
pub struct UnitBuilder {
    name: Arc<str>,
    source_name: Arc<str>,
    constants: ConstantPool,
    literals: LiteralPool,
    call_sites: Vec<Arc<CallSiteDescriptor>>,
    call_site_index: FxHashMap<Arc<CallSiteDescriptor>, u16>,
    functions: Vec<CompiledFunction>,
    shared_calls: FxHashMap<SharedCallKey, MethodRef>,
}

impl UnitBuilder {
    pub fn new(name: Arc<str>, source_name: Arc<str>, literal_pool_ceiling: usize) -> Self {
        Self {
            name,
            source_name,
            constants: ConstantPool::new(),
            literals: LiteralPool::new(literal_pool_ceiling),
            call_sites: Vec::new(),
            call_site_index: FxHashMap::default(),
            functions: Vec::new(),
            shared_calls: FxHashMap::default(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn method_ref(&self, name: Arc<str>, signature: Signature) -> MethodRef {
        MethodRef {
            unit: self.name.clone(),
            name,
            signature,
        }
    }

    pub fn add_constant(&mut self, constant: Constant) -> Result<u16, LimitExceededError> {
        self.constants.add(constant)
    }

    pub fn add_literal(&mut self, data: LiteralData) -> Result<u32, LimitExceededError> {
        self.literals.add(data)
    }

    /// Adds a canonical descriptor to the call site table, reusing its entry if it is already there
    pub fn add_call_site(&mut self, desc: Arc<CallSiteDescriptor>) -> Result<u16, LimitExceededError> {
        if let Some(&id) = self.call_site_index.get(&desc) {
            return Ok(id);
        }
        let id = u16::try_from(self.call_sites.len()).map_err(|_| LimitExceededError)?;
        self.call_sites.push(desc.clone());
        self.call_site_index.insert(desc, id);
        Ok(id)
    }

    pub fn add_function(&mut self, function: CompiledFunction) {
        self.functions.push(function);
    }

    pub fn shared_call(&self, key: &SharedCallKey) -> Option<&MethodRef> {
        self.shared_calls.get(key)
    }

    pub fn add_shared_call(&mut self, key: SharedCallKey, method: MethodRef) {
        self.shared_calls.insert(key, method);
    }

    pub fn finish(self) -> CompiledUnit {
        CompiledUnit {
            name: self.name,
            source_name: self.source_name,
            functions: self.functions,
            constants: self.constants.into_inner(),
            literals: self.literals.into_inner(),
            call_sites: self.call_sites.into_boxed_slice(),
        }
    }
}

impl UnitView for UnitBuilder {
    fn constant(&self, id: u16) -> Option<&Constant> {
        self.constants.get(id)
    }

    fn literal(&self, id: u32) -> Option<&LiteralData> {
        self.literals.get(id)
    }

    fn call_site(&self, id: u16) -> Option<&CallSiteDescriptor> {
        self.call_sites.get(usize::from(id)).map(|c| &**c)
    }
}

/// Packs functions into units until the weight budget of a unit is used up
#[derive(Debug)]
pub struct UnitAllocator {
    budget: usize,
    current: Option<UnitId>,
    weight: usize,
    count: u16,
}

impl UnitAllocator {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            current: None,
            weight: 0,
            count: 0,
        }
    }

    /// The unit a function of the given weight is placed in, and whether that unit is new
    pub fn assign(&mut self, weight: usize) -> Result<(UnitId, bool), LimitExceededError> {
        match self.current {
            Some(unit) if self.weight == 0 || self.weight + weight <= self.budget => {
                self.weight += weight;
                Ok((unit, false))
            }
            _ => {
                let unit = UnitId(self.count);
                self.count = self.count.checked_add(1).ok_or(LimitExceededError)?;
                self.current = Some(unit);
                self.weight = weight;
                Ok((unit, true))
            }
        }
    }
}

pub fn unit_name(prefix: &str, id: UnitId) -> Arc<str> {
    Arc::from(format!("{prefix}${}", id.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_rolls_over_at_budget() {
        let mut alloc = UnitAllocator::new(100);
        assert_eq!(alloc.assign(60).unwrap(), (UnitId(0), true));
        assert_eq!(alloc.assign(40).unwrap(), (UnitId(0), false));
        assert_eq!(alloc.assign(1).unwrap(), (UnitId(1), true));
        // an oversized function still gets a unit of its own
        assert_eq!(alloc.assign(500).unwrap(), (UnitId(2), true));
        assert_eq!(alloc.assign(10).unwrap(), (UnitId(3), true));
    }

    #[test]
    fn call_sites_are_interned_per_unit() {
        use ember_middle::compiler::callsite::{CallSiteFlags, Operation};
        use ember_middle::ty::Type;
        use smallvec::smallvec;

        let mut unit = UnitBuilder::new(unit_name("Script", UnitId(0)), Arc::from("test.js"), 16);
        let desc = Arc::new(CallSiteDescriptor {
            operation: Operation::GetProp,
            name: Some(Arc::from("x")),
            params: smallvec![Type::Object],
            ret: Some(Type::Object),
            flags: CallSiteFlags::empty(),
        });
        let a = unit.add_call_site(desc.clone()).unwrap();
        let b = unit.add_call_site(desc).unwrap();
        assert_eq!(a, b);
        assert_eq!(&*unit.finish().name, "Script$0");
    }
}
