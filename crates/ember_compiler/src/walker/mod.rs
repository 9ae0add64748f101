//! Lowers annotated trees into compiled units.
//!
//! Methods under construction are kept on a stack and the innermost one receives all emitted code.
//! Entering a nested function, a split sub-unit or an array sub-unit pushes a new emitter, leaving it
//! finishes the method and files it into the unit it was assigned to.

use std::sync::Arc;

use ember_middle::ast::{Block, FunctionNode, Statement, Storage, SymbolFlags, SymbolTable};
use ember_middle::compiler::callsite::{CallSiteDescriptor, CallSiteFlags, Operation};
use ember_middle::compiler::constant::Constant;
use ember_middle::compiler::instruction::RuntimeCall;
use ember_middle::compiler::{CompiledUnit, MethodKind, MethodRef, Signature};
use ember_middle::sourcemap::Location;
use ember_middle::ty::Type;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::config::CompilerConfig;
use crate::decompiler;
use crate::descriptor::DescriptorCache;
use crate::emitter::{MethodEmitter, Reserved};
use crate::error::CompileError;
use crate::lexical::{Frame, LexicalContext};
use crate::unit::{self, UnitAllocator, UnitBuilder, UnitId};
use crate::weigh;

mod call;
mod expr;
mod literal;
mod split;
mod stmt;
mod store;
mod switch;

/// Per source function state shared by the function's method and all of its sub-units
struct FunctionState {
    name: Arc<str>,
    strict: bool,
    /// Whether the function receives a scope record from its callee
    has_scope: bool,
    ret: Type,
}

pub struct CodeGenerator<'a> {
    config: &'a CompilerConfig,
    descriptors: &'a DescriptorCache,
    symbols: &'a SymbolTable,
    source_name: Arc<str>,
    units: Vec<UnitBuilder>,
    allocator: UnitAllocator,
    emitters: Vec<MethodEmitter>,
    functions: Vec<FunctionState>,
    lc: LexicalContext,
    /// Functions that are already compiled, by unique name
    emitted: FxHashMap<Arc<str>, MethodRef>,
    /// Labels of the labeled statements directly around the statement that is lowered next
    pending_labels: Vec<Arc<str>>,
    split_count: usize,
    array_unit_count: usize,
    shared_count: usize,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(
        config: &'a CompilerConfig,
        descriptors: &'a DescriptorCache,
        symbols: &'a SymbolTable,
        source_name: Arc<str>,
    ) -> Self {
        Self {
            config,
            descriptors,
            symbols,
            source_name,
            units: Vec::new(),
            allocator: UnitAllocator::new(config.unit_weight_budget),
            emitters: Vec::new(),
            functions: Vec::new(),
            lc: LexicalContext::new(),
            emitted: FxHashMap::default(),
            pending_labels: Vec::new(),
            split_count: 0,
            array_unit_count: 0,
            shared_count: 0,
        }
    }

    /// Compiles `main` and every function reachable from it
    pub fn generate(mut self, main: &FunctionNode) -> Result<Vec<CompiledUnit>, CompileError> {
        self.compile_function(main)?;
        Ok(self.units.into_iter().map(UnitBuilder::finish).collect())
    }

    fn em(&mut self) -> &mut MethodEmitter {
        self.emitters.last_mut().expect("no method under construction")
    }

    fn em_ref(&self) -> &MethodEmitter {
        self.emitters.last().expect("no method under construction")
    }

    fn emitter_index(&self) -> usize {
        self.emitters.len() - 1
    }

    fn function_state(&self) -> &FunctionState {
        self.functions.last().expect("no function under construction")
    }

    fn is_reachable(&self) -> bool {
        self.em_ref().is_reachable()
    }

    fn unit_mut(&mut self) -> Result<&mut UnitBuilder, CompileError> {
        let id = usize::from(self.em_ref().unit());
        if id >= self.units.len() {
            return Err(CompileError::MissingCompileUnit {
                function: self.em_ref().function().clone(),
            });
        }
        Ok(&mut self.units[id])
    }

    /// The unit a new method of the given weight goes into, opening a new one if the current one is full
    fn open_unit(&mut self, function: &Arc<str>, weight: usize) -> Result<UnitId, CompileError> {
        match self.allocator.assign(weight) {
            Ok((id, true)) => {
                let name = unit::unit_name(&self.config.unit_prefix, id);
                ember_log::debug!(unit = %name, %function, weight, "opening compile unit");
                self.units.push(UnitBuilder::new(
                    name,
                    self.source_name.clone(),
                    self.config.literal_pool_ceiling,
                ));
                Ok(id)
            }
            Ok((id, false)) => Ok(id),
            Err(_) => Err(CompileError::LimitExceeded {
                function: function.clone(),
                what: "compile unit",
            }),
        }
    }

    fn add_constant(&mut self, constant: Constant) -> Result<u16, CompileError> {
        let result = self.unit_mut()?.add_constant(constant);
        result.map_err(|_| self.em_ref().limit_exceeded("constant pool"))
    }

    fn push_constant(&mut self, constant: Constant) -> Result<(), CompileError> {
        let ty = constant.ty();
        let id = self.add_constant(constant)?;
        self.em().constant(id, ty);
        Ok(())
    }

    fn call_site(&mut self, desc: Arc<CallSiteDescriptor>) -> Result<u16, CompileError> {
        let result = self.unit_mut()?.add_call_site(desc);
        result.map_err(|_| self.em_ref().limit_exceeded("call site table"))
    }

    fn base_flags(&self) -> CallSiteFlags {
        let mut flags = self.config.call_site_flags;
        if self.function_state().strict {
            flags |= CallSiteFlags::STRICT;
        }
        flags
    }

    /// Emits a dynamic operation that pops values of `params` and pushes `ret`
    fn dynamic(
        &mut self,
        operation: Operation,
        name: Option<Arc<str>>,
        params: &[Type],
        ret: Option<Type>,
        flags: CallSiteFlags,
    ) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }

        let desc = self.descriptors.canonical(CallSiteDescriptor {
            operation,
            name,
            params: params.iter().map(|t| t.stack_type()).collect(),
            ret: ret.map(Type::stack_type),
            flags: flags | self.base_flags(),
        });
        let id = self.call_site(desc.clone())?;
        self.em().dynamic(id, &desc)
    }

    fn invoke(&mut self, method: MethodRef) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let id = self.add_constant(Constant::Method(method.clone()))?;
        self.em().invoke_static(id, &method)
    }

    fn load_scope(&mut self) -> Result<(), CompileError> {
        self.em().load_reserved(Reserved::Scope)
    }

    fn walk_protos(&mut self, count: usize) -> Result<(), CompileError> {
        for _ in 0..count {
            self.em().runtime(RuntimeCall::GetProto)?;
        }
        Ok(())
    }

    /// Pops `count` records off the current scope chain
    fn unwind_scopes(&mut self, count: usize) -> Result<(), CompileError> {
        if count > 0 {
            self.load_scope()?;
            self.walk_protos(count)?;
            self.em().store_reserved(Reserved::Scope)?;
        }
        Ok(())
    }

    /// Pushes the value an uninitialized variable of type `ty` starts out with
    fn load_undefined(&mut self, ty: Type) -> Result<(), CompileError> {
        match ty.stack_type() {
            Type::Boolean => self.em().boolean(false),
            Type::Int => self.em().int(0),
            Type::Long => self.push_constant(Constant::Long(0))?,
            Type::Double => self.push_constant(Constant::Double(f64::NAN))?,
            Type::Undefined | Type::Object => self.em().undefined(),
        }
        Ok(())
    }

    fn function_signature(&self, f: &FunctionNode) -> Signature {
        let mut params: SmallVec<[Type; 4]> = SmallVec::from_slice(&[Type::Object, Type::Object]);
        if f.is_var_args() {
            params.push(Type::Object);
        } else {
            params.extend(f.params.iter().map(|p| self.symbols[*p].ty.stack_type()));
        }

        Signature {
            params,
            ret: f.return_type.stack_type(),
        }
    }

    /// Compiles `f` into a method of its own, unless it was compiled before
    fn compile_function(&mut self, f: &FunctionNode) -> Result<MethodRef, CompileError> {
        if let Some(method) = self.emitted.get(&f.name) {
            return Ok(method.clone());
        }

        let span = ember_log::span!(ember_log::Level::DEBUG, "function", name = %f.name);
        let _enter = span.enter();

        // blocks that get split are packed with their sub-units, not here
        let scoped = f.is_program() || f.needs_parent_scope();
        let weight = weigh::resident_block(&f.body, self.config.method_weight_budget, self.symbols, scoped);
        let unit = self.open_unit(&f.name, weight)?;
        let kind = if f.is_program() {
            MethodKind::Program
        } else {
            MethodKind::Function
        };
        let signature = self.function_signature(f);
        ember_log::debug!(unit = %self.units[usize::from(unit)].name(), "enter function");

        self.emitters
            .push(MethodEmitter::new(f.name.clone(), f.name.clone(), kind, signature, unit));
        self.functions.push(FunctionState {
            name: f.name.clone(),
            strict: f.is_strict() || self.config.strict,
            has_scope: scoped,
            ret: f.return_type.stack_type(),
        });
        let index = self.emitter_index();
        self.lc.push(
            Frame::Function {
                id: f.id,
                has_eval: f.has_eval(),
            },
            index,
        );

        let result = self.function_body(f);

        self.lc.pop();
        self.functions.pop();
        let em = self.emitters.pop().expect("function emitter was pushed above");
        result?;

        let compiled = em.finish()?;
        let unit = &mut self.units[usize::from(unit)];
        if ember_log::ENABLED {
            match decompiler::disassemble(&compiled, &*unit) {
                Ok(text) => ember_log::debug!("\n{text}"),
                Err(err) => ember_log::warn!(%err, "cannot disassemble"),
            }
        }

        let method = unit.method_ref(f.name.clone(), compiled.signature.clone());
        unit.add_function(compiled);
        self.emitted.insert(f.name.clone(), method.clone());
        ember_log::debug!(method = %method, "leave function");
        Ok(method)
    }

    fn function_body(&mut self, f: &FunctionNode) -> Result<(), CompileError> {
        let symbols = self.symbols;
        self.em().set_location(Location { line: f.line, span: f.span });
        self.em().line_number(f.line);
        self.em().bind_reserved(Reserved::Callee, 0);
        self.em().bind_reserved(Reserved::This, 1);

        // the slot every parameter value arrives in
        let mut incoming: SmallVec<[u16; 4]> = SmallVec::new();
        if f.is_var_args() {
            self.em().bind_reserved(Reserved::Varargs, 2);
        } else {
            for (i, &param) in f.params.iter().enumerate() {
                let slot = u16::try_from(i + 2).map_err(|_| self.em_ref().limit_exceeded("parameter"))?;
                if symbols[param].is_slot() {
                    self.em().bind_symbol(param, slot);
                }
                incoming.push(slot);
            }
        }

        self.em().reserve(Reserved::Scope, Type::Object)?;
        if f.is_program() || f.needs_parent_scope() {
            self.em().load_reserved(Reserved::Callee)?;
            self.em().runtime(RuntimeCall::CalleeScope)?;
        } else {
            self.em().null();
        }
        self.em().store_reserved(Reserved::Scope)?;

        if f.needs_arguments() {
            let count = i32::try_from(f.params.len()).map_err(|_| self.em_ref().limit_exceeded("parameter"))?;
            self.em().reserve(Reserved::Arguments, Type::Object)?;
            self.em().load_reserved(Reserved::Varargs)?;
            self.em().load_reserved(Reserved::Callee)?;
            self.em().int(count);
            self.em().runtime(RuntimeCall::AllocateArguments)?;
            self.em().store_reserved(Reserved::Arguments)?;
        }

        if f.is_var_args() {
            for (i, &param) in f.params.iter().enumerate() {
                let sym = &symbols[param];
                let slot = if sym.is_slot() {
                    self.em().symbol_slot(param, sym)?
                } else {
                    self.em().new_named_slot(sym.name.clone(), Type::Object)?
                };
                self.em().load_reserved(Reserved::Varargs)?;
                self.em().int(i as i32);
                self.em().runtime(RuntimeCall::ArgumentAt)?;
                let ty = self.em_ref().slot_type(slot).unwrap_or(Type::Object);
                self.em().convert(ty)?;
                self.em().store_slot(slot)?;
                incoming.push(slot);
            }
        }

        let body = &f.body;
        let index = self.emitter_index();
        self.lc.push(
            Frame::Block {
                id: body.id,
                needs_scope: body.needs_scope,
            },
            index,
        );

        if body.needs_scope {
            self.new_scope(body)?;
            if f.is_program() {
                self.em().runtime(RuntimeCall::MergeScope)?;
            }
            for (&param, &slot) in f.params.iter().zip(&incoming) {
                let sym = &symbols[param];
                if !sym.is_scope() {
                    continue;
                }
                let ty = self.em_ref().slot_type(slot).unwrap_or(Type::Object);
                self.em().dup()?;
                self.em().load_slot(slot)?;
                self.dynamic(
                    Operation::SetProp,
                    Some(sym.name.clone()),
                    &[Type::Object, ty],
                    None,
                    CallSiteFlags::SCOPE | CallSiteFlags::FAST_SCOPE,
                )?;
            }
            self.em().store_reserved(Reserved::Scope)?;
        }

        self.init_slots(body)?;
        self.statements(body)?;
        self.lc.pop();

        if self.is_reachable() {
            let ret = self.function_state().ret;
            self.load_undefined(ret)?;
            self.em().ret(ret)?;
        }
        Ok(())
    }

    /// Pushes a new scope record whose parent is the current one, with a property for every scope-resident
    /// symbol of `block`
    fn new_scope(&mut self, block: &Block) -> Result<(), CompileError> {
        let symbols = self.symbols;
        let names: Arc<[Arc<str>]> = block
            .symbols
            .iter()
            .map(|&id| &symbols[id])
            .filter(|sym| sym.is_scope())
            .map(|sym| sym.name.clone())
            .collect();

        self.load_scope()?;
        self.push_constant(Constant::PropertyMap(names))?;
        self.em().runtime(RuntimeCall::NewScope)
    }

    fn init_slots(&mut self, block: &Block) -> Result<(), CompileError> {
        let symbols = self.symbols;
        for &id in &block.symbols {
            let sym = &symbols[id];
            if !sym.is_slot()
                || sym.is_param()
                || matches!(sym.storage, Storage::Param(_))
                || sym.flags.contains(SymbolFlags::ARGUMENTS)
            {
                continue;
            }

            let slot = self.em().symbol_slot(id, sym)?;
            self.load_undefined(sym.ty)?;
            self.em().store_slot(slot)?;
        }
        Ok(())
    }

    fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.block_with(block, |_| Ok(()))
    }

    /// Lowers `block`, running `prelude` once its scope record exists and its slots are initialized
    fn block_with<F>(&mut self, block: &Block, prelude: F) -> Result<(), CompileError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        let index = self.emitter_index();
        let frame = Frame::Block {
            id: block.id,
            needs_scope: block.needs_scope,
        };

        if !block.needs_scope {
            self.lc.push(frame, index);
            self.init_slots(block)?;
            prelude(self)?;
            self.statements(block)?;
            self.lc.pop();
            return Ok(());
        }

        let start = self.em().new_label("scope_start");
        let end = self.em().new_label("scope_end");
        let handler = self.em().new_label("scope_handler");
        let done = self.em().new_label("scope_done");

        self.new_scope(block)?;
        self.em().store_reserved(Reserved::Scope)?;
        self.lc.push(frame, index);
        self.em().label(start)?;

        self.init_slots(block)?;
        prelude(self)?;
        self.statements(block)?;

        self.em().label(end)?;
        self.lc.pop();
        if self.is_reachable() {
            self.unwind_scopes(1)?;
            self.em().goto(done)?;
        }

        self.em().catch_label(handler)?;
        self.unwind_scopes(1)?;
        self.em().throw()?;
        self.em().label(done)?;
        self.em().try_region(start, end, handler);
        Ok(())
    }

    /// Lowers the statements of `block`, splitting them into sub-units if they are too heavy for one method
    fn statements(&mut self, block: &Block) -> Result<(), CompileError> {
        if block.statements.len() > 1 && weigh::block(block) > self.config.method_weight_budget {
            if self.can_split(block) {
                return self.split_block(block);
            }
            ember_log::warn!(
                function = %self.function_state().name,
                weight = weigh::block(block),
                "block exceeds the method budget but cannot be split"
            );
        }
        self.statement_list(&block.statements)
    }

    fn statement_list(&mut self, statements: &[Statement]) -> Result<(), CompileError> {
        for stmt in statements {
            if !self.is_reachable() {
                break;
            }
            self.statement(stmt)?;
        }
        Ok(())
    }
}
