use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ember_middle::compiler::callsite::CallSiteDescriptor;

/// Interns call site descriptors across compilations.
///
/// Safe to share between threads. The first descriptor inserted for a key stays the canonical one.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    descriptors: DashMap<CallSiteDescriptor, Arc<CallSiteDescriptor>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical descriptor equal to `desc`, inserting it if there is none yet
    pub fn canonical(&self, desc: CallSiteDescriptor) -> Arc<CallSiteDescriptor> {
        match self.descriptors.entry(desc) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let canonical = Arc::new(entry.key().clone());
                entry.insert(canonical.clone());
                canonical
            }
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_middle::compiler::callsite::{CallSiteDescriptor, CallSiteFlags, Operation};
    use ember_middle::ty::Type;
    use smallvec::smallvec;

    use super::DescriptorCache;

    fn get(name: &str) -> CallSiteDescriptor {
        CallSiteDescriptor {
            operation: Operation::GetProp,
            name: Some(Arc::from(name)),
            params: smallvec![Type::Object],
            ret: Some(Type::Object),
            flags: CallSiteFlags::SCOPE,
        }
    }

    #[test]
    fn identical_descriptors_are_shared() {
        let cache = DescriptorCache::new();
        let a = cache.canonical(get("x"));
        let b = cache.canonical(get("x"));
        let c = cache.canonical(get("y"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_inserts_agree_on_one_descriptor() {
        let cache = DescriptorCache::new();
        let results = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..64).map(|i| cache.canonical(get(&format!("v{}", i % 16)))).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        assert_eq!(cache.len(), 16);
        for run in &results {
            for (i, desc) in run.iter().enumerate() {
                let expected = cache.canonical(get(&format!("v{}", i % 16)));
                assert!(Arc::ptr_eq(desc, &expected));
            }
        }
    }
}
