//! Stubs that share one scope lookup sequence between many call sites.
//!
//! A stub takes the scope record and the number of parent links to follow (or -1 to let the lookup search
//! the whole chain), followed by the call arguments.

use std::sync::Arc;

use ember_middle::compiler::Signature;
use ember_middle::compiler::callsite::{CallSiteDescriptor, CallSiteFlags};
use ember_middle::compiler::instruction::{ArithOp, Condition, RuntimeCall};
use ember_middle::ty::Type;
use smallvec::SmallVec;

use crate::emitter::MethodEmitter;
use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedKind {
    Call,
    Get,
}

/// Everything that distinguishes one stub from another
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharedCallKey {
    pub kind: SharedKind,
    pub name: Arc<str>,
    pub args: SmallVec<[Type; 4]>,
    pub ret: Type,
    pub flags: CallSiteFlags,
}

impl SharedCallKey {
    pub fn signature(&self) -> Signature {
        let params = [Type::Object, Type::Int].into_iter().chain(self.args.iter().copied());
        Signature::new(params, self.ret)
    }

    pub fn method_name(&self, index: usize) -> Arc<str> {
        let prefix = match self.kind {
            SharedKind::Call => "scopeCall",
            SharedKind::Get => "scopeGet",
        };
        Arc::from(format!("{prefix}${index}${}", self.name))
    }
}

/// Call site ids the stub body refers to
pub struct StubSites<'a> {
    pub get: (u16, &'a CallSiteDescriptor),
    pub call: Option<(u16, &'a CallSiteDescriptor)>,
}

/// Emits the body of a stub: walk up `depth` scopes, look the name up, then call or return it
pub fn emit_body(em: &mut MethodEmitter, key: &SharedCallKey, sites: StubSites<'_>) -> Result<(), CompileError> {
    const SCOPE: u16 = 0;
    const DEPTH: u16 = 1;

    let walk = em.new_label("scope_walk");
    let found = em.new_label("scope_found");

    em.label(walk)?;
    em.load_slot(DEPTH)?;
    em.int(0);
    em.cmp(Condition::Gt, Type::Int)?;
    em.if_false(found)?;
    em.load_slot(SCOPE)?;
    em.runtime(RuntimeCall::GetProto)?;
    em.store_slot(SCOPE)?;
    em.load_slot(DEPTH)?;
    em.int(1);
    em.arith(ArithOp::Sub, Type::Int)?;
    em.store_slot(DEPTH)?;
    em.goto(walk)?;

    em.label(found)?;
    em.load_slot(SCOPE)?;
    em.dynamic(sites.get.0, sites.get.1)?;

    if let (SharedKind::Call, Some((id, desc))) = (key.kind, sites.call) {
        em.undefined();
        for i in 0..key.args.len() {
            em.load_slot(2 + i as u16)?;
        }
        em.dynamic(id, desc)?;
    }

    em.convert(key.ret)?;
    em.ret(key.ret)
}
