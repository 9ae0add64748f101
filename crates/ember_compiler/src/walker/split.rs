use std::sync::Arc;

use ember_middle::ast::{Block, Statement};
use ember_middle::compiler::instruction::{Condition, RuntimeCall};
use ember_middle::compiler::{MethodKind, Signature};
use ember_middle::ty::Type;
use smallvec::SmallVec;

use super::CodeGenerator;
use crate::emitter::{Label, MethodEmitter, Reserved, SplitExits};
use crate::error::CompileError;
use crate::lexical::Frame;
use crate::{splitter, verify, weigh};

impl CodeGenerator<'_> {
    /// Whether the statements of `block` can be moved into sub-units.
    /// The sub-units report how they exited through the current scope record, so there has to be one.
    pub(super) fn can_split(&self, block: &Block) -> bool {
        (self.function_state().has_scope || self.lc.has_open_scope()) && splitter::is_splittable(block, self.symbols)
    }

    pub(super) fn split_block(&mut self, block: &Block) -> Result<(), CompileError> {
        let chunks = splitter::chunks(&block.statements, self.config.method_weight_budget);
        ember_log::debug!(
            function = %self.function_state().name,
            weight = weigh::block(block),
            chunks = chunks.len(),
            "splitting block"
        );

        for range in chunks {
            if !self.is_reachable() {
                break;
            }
            self.split_unit(&block.statements[range])?;
        }
        Ok(())
    }

    /// Moves `statements` into a method of their own and calls it
    fn split_unit(&mut self, statements: &[Statement]) -> Result<(), CompileError> {
        let function = self.function_state().name.clone();
        let ret = self.function_state().ret;
        let weight = weigh::resident_statements(statements, self.config.method_weight_budget, self.symbols);
        let unit = self.open_unit(&function, weight)?;
        let name: Arc<str> = Arc::from(format!("{function}$split${}", self.split_count));
        self.split_count += 1;

        let has_arguments = self.em_ref().has_reserved(Reserved::Arguments);
        let mut params: SmallVec<[Type; 4]> = SmallVec::from_slice(&[Type::Object; 3]);
        if has_arguments {
            params.push(Type::Object);
        }
        let signature = Signature { params, ret };

        let mut em = MethodEmitter::new(name.clone(), function.clone(), MethodKind::SplitUnit, signature.clone(), unit);
        em.enter_split();
        em.bind_reserved(Reserved::Callee, 0);
        em.bind_reserved(Reserved::This, 1);
        em.bind_reserved(Reserved::Scope, 2);
        if has_arguments {
            em.bind_reserved(Reserved::Arguments, 3);
        }
        em.set_location(self.em_ref().location());

        self.emitters.push(em);
        let index = self.emitter_index();
        self.lc.push(Frame::Split, index);
        let result = self.split_body(statements, ret);
        self.lc.pop();
        let em = self.emitters.pop().expect("split emitter was pushed above");
        result?;

        let exits = em.split_exits().cloned().unwrap_or_default();
        let compiled = em.finish()?;
        let builder = &mut self.units[usize::from(unit)];
        verify::verify_function(&compiled, &*builder).map_err(|source| CompileError::SplitVerification {
            function: function.clone(),
            unit: builder.name().clone(),
            source,
        })?;
        let method = builder.method_ref(name, signature);
        builder.add_function(compiled);
        ember_log::debug!(
            method = %method,
            exits = exits.targets.len(),
            returns = exits.has_return,
            "emitted split unit"
        );

        self.em().load_reserved(Reserved::Callee)?;
        self.em().load_reserved(Reserved::This)?;
        self.load_scope()?;
        if has_arguments {
            self.em().load_reserved(Reserved::Arguments)?;
        }
        self.invoke(method)?;

        if exits.has_return {
            if !self.em_ref().has_reserved(Reserved::ReturnValue) {
                self.em().reserve(Reserved::ReturnValue, ret)?;
            }
            self.em().store_reserved(Reserved::ReturnValue)?;
        } else {
            self.em().pop()?;
        }
        self.dispatch_split_exits(&exits)
    }

    fn split_body(&mut self, statements: &[Statement], ret: Type) -> Result<(), CompileError> {
        self.statement_list(statements)?;
        if self.is_reachable() {
            self.load_undefined(ret)?;
            self.em().ret(ret)?;
        }
        Ok(())
    }

    /// Continues after a split unit returned, according to the state it left behind.
    ///
    /// State 0 is a return from the function, `n > 0` a jump to the `n`-th external target and -1 a fall through.
    fn dispatch_split_exits(&mut self, exits: &SplitExits) -> Result<(), CompileError> {
        if !exits.has_return && exits.targets.is_empty() {
            return Ok(());
        }

        let next = self.em().new_label("split_next");
        self.load_scope()?;
        self.em().runtime(RuntimeCall::GetSplitState)?;
        self.load_scope()?;
        self.em().int(-1);
        self.em().runtime(RuntimeCall::SetSplitState)?;

        if exits.targets.is_empty() {
            self.em().int(0);
            self.em().cmp(Condition::Eq, Type::Int)?;
            self.em().if_false(next)?;
            self.split_return()?;
            return self.em().label(next);
        }

        let ret_label = exits.has_return.then(|| self.em().new_label("split_return"));
        let exit_labels: Vec<Label> = exits.targets.iter().map(|_| self.em().new_label("split_exit")).collect();
        let targets: Vec<Label> = std::iter::once(ret_label.unwrap_or(next))
            .chain(exit_labels.iter().copied())
            .collect();
        let high = i32::try_from(exit_labels.len()).map_err(|_| self.em_ref().limit_exceeded("split exit"))?;
        self.em().table_switch(0, high, next, &targets)?;

        for (label, target) in exit_labels.iter().zip(&exits.targets) {
            self.em().label(*label)?;
            self.jump_to(target.frame, target.kind)?;
        }
        if let Some(label) = ret_label {
            self.em().label(label)?;
            self.split_return()?;
        }
        self.em().label(next)
    }

    fn split_return(&mut self) -> Result<(), CompileError> {
        self.em().load_reserved(Reserved::ReturnValue)?;
        self.return_loaded()
    }
}
