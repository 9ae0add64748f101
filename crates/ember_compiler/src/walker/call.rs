use std::sync::Arc;

use ember_middle::ast::{CallExpr, Expr, ExprKind, FunctionNode, SymbolId};
use ember_middle::compiler::callsite::{CallSiteDescriptor, CallSiteFlags, Operation};
use ember_middle::compiler::constant::Constant;
use ember_middle::compiler::instruction::RuntimeCall;
use ember_middle::compiler::{MethodKind, MethodRef};
use ember_middle::ty::Type;
use smallvec::{SmallVec, smallvec};

use super::CodeGenerator;
use crate::call_site::{self, CallShape};
use crate::emitter::{MethodEmitter, Reserved};
use crate::error::CompileError;
use crate::scope_access::ScopeAccess;
use crate::shared_call::{self, SharedCallKey, SharedKind, StubSites};

type ArgTypes = SmallVec<[Type; 4]>;

fn callee_symbol(call: &CallExpr) -> SymbolId {
    match call.callee.kind {
        ExprKind::Ident(id) => id,
        _ => unreachable!("scope calls always have an identifier callee"),
    }
}

impl CodeGenerator<'_> {
    pub(super) fn call(&mut self, call: &CallExpr, ty: Type) -> Result<(), CompileError> {
        let shape = match call_site::classify(call, self.symbols, &self.lc, self.config) {
            CallShape::Shared(access) if call.args.len() > self.config.arg_limit => CallShape::Scope(access),
            shape => shape,
        };

        match shape {
            CallShape::Direct => {
                let ExprKind::Function(f) = &call.callee.kind else {
                    unreachable!("direct calls always have a function literal callee")
                };
                self.direct_call(f, &call.args)
            }
            CallShape::Eval(access) => self.eval_call(call, access, ty),
            CallShape::Scope(access) => {
                self.scope_callee(callee_symbol(call), access)?;
                self.em().undefined();
                let (types, flags) = self.arguments(&call.args)?;
                self.dynamic_call(&types, ty, flags | CallSiteFlags::SCOPE)
            }
            CallShape::Shared(access) => self.shared_call(call, access, ty),
            CallShape::Method => self.method_call(call, ty),
            CallShape::Value => {
                self.load_as(&call.callee, Type::Object)?;
                self.em().undefined();
                let (types, flags) = self.arguments(&call.args)?;
                self.dynamic_call(&types, ty, flags)
            }
            CallShape::New => {
                self.load_as(&call.callee, Type::Object)?;
                let (types, flags) = self.arguments(&call.args)?;
                let params: ArgTypes = std::iter::once(Type::Object).chain(types).collect();
                self.dynamic(Operation::New, None, &params, Some(ty), flags)
            }
        }
    }

    /// Pushes the arguments of a dynamic call, collapsed into one array if there are too many
    fn arguments(&mut self, args: &[Expr]) -> Result<(ArgTypes, CallSiteFlags), CompileError> {
        if args.len() > self.config.arg_limit {
            self.args_array(args)?;
            return Ok((smallvec![Type::Object], CallSiteFlags::SPREAD_ARGS));
        }

        let mut types = ArgTypes::new();
        for arg in args {
            self.load(arg)?;
            types.push(arg.ty.stack_type());
        }
        Ok((types, CallSiteFlags::empty()))
    }

    fn args_array(&mut self, args: &[Expr]) -> Result<(), CompileError> {
        let len = i32::try_from(args.len()).map_err(|_| self.em_ref().limit_exceeded("argument"))?;
        self.em().int(len);
        self.em().runtime(RuntimeCall::NewRawArray)?;
        for (i, arg) in (0..len).zip(args) {
            self.em().dup()?;
            self.em().int(i);
            self.load_as(arg, Type::Object)?;
            self.em().array_store(Type::Object)?;
        }
        self.em().runtime(RuntimeCall::AllocateArray)
    }

    /// With the callee and `this` on the stack and the arguments of `types` above them, calls the callee
    fn dynamic_call(&mut self, types: &[Type], ty: Type, flags: CallSiteFlags) -> Result<(), CompileError> {
        let params: ArgTypes = [Type::Object, Type::Object].into_iter().chain(types.iter().copied()).collect();
        self.dynamic(Operation::Call, None, &params, Some(ty), flags)
    }

    /// Calls a function literal without creating a function object for it, unless the callee needs one
    fn direct_call(&mut self, f: &FunctionNode, args: &[Expr]) -> Result<(), CompileError> {
        let method = self.compile_function(f)?;
        if f.needs_callee() || f.needs_parent_scope() {
            self.function_object(f)?;
        } else {
            self.em().null();
        }
        if f.is_strict() || self.config.strict {
            self.em().undefined();
        } else {
            self.em().runtime(RuntimeCall::GlobalInstance)?;
        }

        if f.is_var_args() {
            self.args_array(args)?;
        } else {
            let symbols = self.symbols;
            for (i, &param) in f.params.iter().enumerate() {
                let ty = symbols[param].ty.stack_type();
                match args.get(i) {
                    Some(arg) => self.load_as(arg, ty)?,
                    None => self.load_undefined(ty)?,
                }
            }
            for extra in args.iter().skip(f.params.len()) {
                self.discard(extra)?;
            }
        }

        self.invoke(method)
    }

    /// Looks up the callee of a scope call
    fn scope_callee(&mut self, id: SymbolId, access: ScopeAccess) -> Result<(), CompileError> {
        let symbols = self.symbols;
        let sym = &symbols[id];
        self.load_scope()?;
        self.walk_protos(access.depth.max(0) as usize)?;
        self.dynamic(
            Operation::GetProp,
            Some(sym.name.clone()),
            &[Type::Object],
            Some(Type::Object),
            access.flags(),
        )
    }

    fn method_call(&mut self, call: &CallExpr, ty: Type) -> Result<(), CompileError> {
        match &call.callee.kind {
            ExprKind::Access(base, name) => {
                self.load_as(base, Type::Object)?;
                self.em().dup()?;
                self.dynamic(
                    Operation::GetProp,
                    Some(name.clone()),
                    &[Type::Object],
                    Some(Type::Object),
                    CallSiteFlags::empty(),
                )?;
            }
            ExprKind::Index(base, index) => {
                self.load_as(base, Type::Object)?;
                self.em().dup()?;
                self.load(index)?;
                self.dynamic(
                    Operation::GetElem,
                    None,
                    &[Type::Object, index.ty],
                    Some(Type::Object),
                    CallSiteFlags::empty(),
                )?;
            }
            _ => unreachable!("method calls always have a property callee"),
        }

        // the receiver becomes `this`
        self.em().swap()?;
        let (types, flags) = self.arguments(&call.args)?;
        self.dynamic_call(&types, ty, flags)
    }

    /// A call to something named `eval`. If it is the built-in at run time the source is evaluated in the
    /// current scope, otherwise this is an ordinary scope call.
    fn eval_call(&mut self, call: &CallExpr, access: ScopeAccess, ty: Type) -> Result<(), CompileError> {
        let not_eval = self.em().new_label("not_eval");
        let done = self.em().new_label("eval_done");

        self.scope_callee(callee_symbol(call), access)?;
        self.em().dup()?;
        self.em().runtime(RuntimeCall::IsEval)?;
        self.em().if_false(not_eval)?;
        self.em().pop()?;

        self.load_scope()?;
        match call.args.first() {
            Some(source) => self.load_as(source, Type::Object)?,
            None => self.em().undefined(),
        }
        for extra in call.args.iter().skip(1) {
            self.discard(extra)?;
        }
        self.em().load_reserved(Reserved::This)?;
        let location = format!("{}#{}", self.source_name, self.em_ref().location().line);
        self.push_constant(Constant::String(Arc::from(location)))?;
        let strict = self.function_state().strict;
        self.em().boolean(strict);
        self.em().runtime(RuntimeCall::DirectEval)?;
        self.em().convert(ty)?;
        self.em().goto(done)?;

        self.em().label(not_eval)?;
        self.em().undefined();
        let (types, flags) = self.arguments(&call.args)?;
        self.dynamic_call(&types, ty, flags | CallSiteFlags::SCOPE)?;
        self.em().label(done)
    }

    fn shared_call(&mut self, call: &CallExpr, access: ScopeAccess, ty: Type) -> Result<(), CompileError> {
        let symbols = self.symbols;
        let sym = &symbols[callee_symbol(call)];
        let key = SharedCallKey {
            kind: SharedKind::Call,
            name: sym.name.clone(),
            args: call.args.iter().map(|a| a.ty.stack_type()).collect(),
            ret: ty.stack_type(),
            flags: access.flags() | self.base_flags(),
        };
        let method = self.shared_stub(key)?;

        self.load_scope()?;
        self.em().int(access.depth);
        for arg in &call.args {
            self.load(arg)?;
        }
        self.invoke(method)
    }

    pub(super) fn shared_get(&mut self, name: Arc<str>, access: ScopeAccess, ty: Type) -> Result<(), CompileError> {
        let key = SharedCallKey {
            kind: SharedKind::Get,
            name,
            args: ArgTypes::new(),
            ret: ty.stack_type(),
            flags: access.flags() | self.base_flags(),
        };
        let method = self.shared_stub(key)?;

        self.load_scope()?;
        self.em().int(access.depth);
        self.invoke(method)
    }

    /// The stub for `key` in the current unit, emitting it on first use
    fn shared_stub(&mut self, key: SharedCallKey) -> Result<MethodRef, CompileError> {
        if let Some(method) = self.unit_mut()?.shared_call(&key) {
            return Ok(method.clone());
        }

        let function = self.function_state().name.clone();
        let unit = self.em_ref().unit();
        let name = key.method_name(self.shared_count);
        self.shared_count += 1;

        let (kind, get_ret) = match key.kind {
            SharedKind::Call => (MethodKind::ScopeCall, Type::Object),
            SharedKind::Get => (MethodKind::ScopeGet, key.ret),
        };
        let get = self.descriptors.canonical(CallSiteDescriptor {
            operation: Operation::GetProp,
            name: Some(key.name.clone()),
            params: smallvec![Type::Object],
            ret: Some(get_ret),
            flags: key.flags,
        });
        let get_id = self.call_site(get.clone())?;

        let call = match key.kind {
            SharedKind::Call => {
                let desc = self.descriptors.canonical(CallSiteDescriptor {
                    operation: Operation::Call,
                    name: None,
                    params: [Type::Object, Type::Object].into_iter().chain(key.args.iter().copied()).collect(),
                    ret: Some(key.ret),
                    flags: key.flags - CallSiteFlags::FAST_SCOPE,
                });
                let id = self.call_site(desc.clone())?;
                Some((id, desc))
            }
            SharedKind::Get => None,
        };

        let signature = key.signature();
        let mut em = MethodEmitter::new(name.clone(), function, kind, signature.clone(), unit);
        em.set_location(self.em_ref().location());
        let sites = StubSites {
            get: (get_id, &*get),
            call: call.as_ref().map(|(id, desc)| (*id, &**desc)),
        };
        shared_call::emit_body(&mut em, &key, sites)?;
        let compiled = em.finish()?;

        let builder = self.unit_mut()?;
        let method = builder.method_ref(name, signature);
        builder.add_function(compiled);
        builder.add_shared_call(key, method.clone());
        ember_log::debug!(method = %method, "emitted shared scope stub");
        Ok(method)
    }
}
