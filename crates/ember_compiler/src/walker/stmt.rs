use std::sync::Arc;

use ember_middle::ast::{
    Block, Expr, ExprKind, ForInLoop, ForLoop, IfStatement, LabeledStatement, Statement, StatementKind, TryCatch,
    WhileLoop, WithStatement,
};
use ember_middle::compiler::instruction::RuntimeCall;
use ember_middle::sourcemap::Location;
use ember_middle::ty::Type;

use super::CodeGenerator;
use crate::emitter::{ExternalTarget, Label, Reserved};
use crate::error::CompileError;
use crate::lexical::{BreakableKind, Frame, JumpKind};

impl CodeGenerator<'_> {
    pub(super) fn statement(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        let labels = std::mem::take(&mut self.pending_labels);
        if !self.is_reachable() {
            return Ok(());
        }

        self.em().set_location(Location {
            line: stmt.line,
            span: stmt.span,
        });
        self.em().line_number(stmt.line);

        match &stmt.kind {
            StatementKind::Expression(e) => self.discard(e),
            StatementKind::Var(v) => match &v.init {
                Some(init) => self.store_symbol(v.symbol, |g| g.load(init)),
                None => Ok(()),
            },
            StatementKind::Block(b) => self.block(b),
            StatementKind::If(i) => self.if_statement(i),
            StatementKind::While(w) if w.do_while => self.do_while_loop(w, labels),
            StatementKind::While(w) => self.while_loop(w, labels),
            StatementKind::For(f) => self.for_loop(f, labels),
            StatementKind::ForIn(f) => self.for_in_loop(f, labels),
            StatementKind::Labeled(l) => self.labeled(l, labels),
            StatementKind::Break(label) => self.jump(JumpKind::Break, label.as_deref()),
            StatementKind::Continue(label) => self.jump(JumpKind::Continue, label.as_deref()),
            StatementKind::Return(value) => {
                let ret = self.function_state().ret;
                match value {
                    Some(e) => self.load_as(e, ret)?,
                    None => self.load_undefined(ret)?,
                }
                self.return_loaded()
            }
            StatementKind::Throw(e) => {
                self.load_as(e, Type::Object)?;
                self.em().throw()
            }
            StatementKind::Try(t) => self.try_catch(t),
            StatementKind::Switch(s) => self.switch(s, labels),
            StatementKind::With(w) => self.with(w),
            StatementKind::Empty => Ok(()),
        }
    }

    /// Evaluates `e` for its side effects only
    pub(super) fn discard(&mut self, e: &Expr) -> Result<(), CompileError> {
        match &e.kind {
            ExprKind::Assign(assign) => self.assign(assign, e.ty, false),
            ExprKind::Unary(op, target) if op.is_self_modifying() => self.increment(*op, target, e.ty, false),
            _ => {
                self.load(e)?;
                self.em().pop()
            }
        }
    }

    fn if_statement(&mut self, i: &IfStatement) -> Result<(), CompileError> {
        let fail_label = self.em().new_label("if_else");
        self.load_as(&i.test, Type::Boolean)?;
        self.em().if_false(fail_label)?;
        self.block(&i.pass)?;

        match &i.fail {
            Some(fail) => {
                let done = self.em().new_label("if_done");
                self.em().goto(done)?;
                self.em().label(fail_label)?;
                self.block(fail)?;
                self.em().label(done)
            }
            None => self.em().label(fail_label),
        }
    }

    fn loop_frame(labels: Vec<Arc<str>>, break_label: Label, continue_label: Label) -> Frame {
        Frame::Breakable {
            kind: BreakableKind::Loop,
            labels,
            break_label,
            continue_label: Some(continue_label),
        }
    }

    fn loop_body(&mut self, frame: Frame, body: &Block) -> Result<(), CompileError> {
        let index = self.emitter_index();
        self.lc.push(frame, index);
        let result = self.block(body);
        self.lc.pop();
        result
    }

    fn while_loop(&mut self, w: &WhileLoop, labels: Vec<Arc<str>>) -> Result<(), CompileError> {
        let cont = self.em().new_label("while_continue");
        let brk = self.em().new_label("while_break");

        self.em().label(cont)?;
        self.load_as(&w.test, Type::Boolean)?;
        self.em().if_false(brk)?;
        let frame = Self::loop_frame(labels, brk, cont);
        self.loop_body(frame, &w.body)?;
        self.em().goto(cont)?;
        self.em().label(brk)
    }

    fn do_while_loop(&mut self, w: &WhileLoop, labels: Vec<Arc<str>>) -> Result<(), CompileError> {
        let body = self.em().new_label("do_body");
        let cont = self.em().new_label("do_continue");
        let brk = self.em().new_label("do_break");

        self.em().label(body)?;
        let frame = Self::loop_frame(labels, brk, cont);
        self.loop_body(frame, &w.body)?;
        self.em().label(cont)?;
        self.load_as(&w.test, Type::Boolean)?;
        self.em().if_true(body)?;
        self.em().label(brk)
    }

    fn for_loop(&mut self, f: &ForLoop, labels: Vec<Arc<str>>) -> Result<(), CompileError> {
        let test = self.em().new_label("for_test");
        let cont = self.em().new_label("for_continue");
        let brk = self.em().new_label("for_break");

        if let Some(init) = &f.init {
            self.discard(init)?;
        }
        self.em().label(test)?;
        if let Some(cond) = &f.test {
            self.load_as(cond, Type::Boolean)?;
            self.em().if_false(brk)?;
        }
        let frame = Self::loop_frame(labels, brk, cont);
        self.loop_body(frame, &f.body)?;
        self.em().label(cont)?;
        if let Some(modify) = &f.modify {
            self.discard(modify)?;
        }
        self.em().goto(test)?;
        self.em().label(brk)
    }

    fn for_in_loop(&mut self, f: &ForInLoop, labels: Vec<Arc<str>>) -> Result<(), CompileError> {
        let cont = self.em().new_label("forin_continue");
        let brk = self.em().new_label("forin_break");

        self.load_as(&f.object, Type::Object)?;
        self.em().runtime(if f.each {
            RuntimeCall::ValueIterator
        } else {
            RuntimeCall::PropertyIterator
        })?;
        let iter = self.em().new_temp(Type::Object)?;
        self.em().store_slot(iter)?;

        self.em().label(cont)?;
        self.em().load_slot(iter)?;
        self.em().runtime(RuntimeCall::HasNext)?;
        self.em().if_false(brk)?;
        self.store_to(
            &f.target,
            |g| {
                g.em().load_slot(iter)?;
                g.em().runtime(RuntimeCall::Next)
            },
            false,
        )?;

        let frame = Self::loop_frame(labels, brk, cont);
        self.loop_body(frame, &f.body)?;
        self.em().goto(cont)?;
        self.em().label(brk)
    }

    fn labeled(&mut self, l: &LabeledStatement, mut labels: Vec<Arc<str>>) -> Result<(), CompileError> {
        labels.push(l.label.clone());

        match &l.body.kind {
            StatementKind::While(_)
            | StatementKind::For(_)
            | StatementKind::ForIn(_)
            | StatementKind::Switch(_)
            | StatementKind::Labeled(_) => {
                self.pending_labels = labels;
                self.statement(&l.body)
            }
            _ => {
                let brk = self.em().new_label("labeled_break");
                let index = self.emitter_index();
                self.lc.push(
                    Frame::Breakable {
                        kind: BreakableKind::Labeled,
                        labels,
                        break_label: brk,
                        continue_label: None,
                    },
                    index,
                );
                let result = self.statement(&l.body);
                self.lc.pop();
                result?;
                self.em().label(brk)
            }
        }
    }

    fn jump(&mut self, kind: JumpKind, label: Option<&str>) -> Result<(), CompileError> {
        let target = self
            .lc
            .find_jump_target(kind, label)
            .ok_or_else(|| CompileError::MissingJumpTarget {
                function: self.function_state().name.clone(),
                location: self.em_ref().location(),
                kind: match kind {
                    JumpKind::Break => "break",
                    JumpKind::Continue => "continue",
                },
                label: label.map(Arc::from),
            })?;
        self.jump_to(target, kind)
    }

    /// Branches to the breakable frame at `target`, popping every scope record pushed since
    pub(super) fn jump_to(&mut self, target: usize, kind: JumpKind) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }

        if let Some(split) = self.lc.current_split() {
            if target < split {
                let code = self.em().register_external_target(ExternalTarget { frame: target, kind });
                return self.leave_split(split, code);
            }
        }

        let label = self.lc.jump_label(target, kind).ok_or_else(|| CompileError::MissingJumpTarget {
            function: self.function_state().name.clone(),
            location: self.em_ref().location(),
            kind: "jump",
            label: None,
        })?;
        self.unwind_scopes(self.lc.scopes_above(target))?;
        self.em().goto(label)
    }

    /// Returns from a split sub-unit, leaving `code` in the split state of the caller's scope record
    fn leave_split(&mut self, split: usize, code: i32) -> Result<(), CompileError> {
        self.load_scope()?;
        self.walk_protos(self.lc.scopes_above(split))?;
        self.em().int(code);
        self.em().runtime(RuntimeCall::SetSplitState)?;

        let ret = self.function_state().ret;
        self.load_undefined(ret)?;
        self.em().ret(ret)
    }

    /// Returns the value on top of the stack from the source function
    pub(super) fn return_loaded(&mut self) -> Result<(), CompileError> {
        if let Some(split) = self.lc.current_split() {
            self.load_scope()?;
            self.walk_protos(self.lc.scopes_above(split))?;
            self.em().int(0);
            self.em().runtime(RuntimeCall::SetSplitState)?;
            self.em().register_return();
        }

        let ret = self.function_state().ret;
        self.em().ret(ret)
    }

    fn try_catch(&mut self, t: &TryCatch) -> Result<(), CompileError> {
        let start = self.em().new_label("try_start");
        let end = self.em().new_label("try_end");
        let handler = self.em().new_label("try_handler");
        let done = self.em().new_label("try_done");

        self.em().label(start)?;
        self.block(&t.body)?;
        self.em().label(end)?;
        self.em().goto(done)?;

        self.em().catch_label(handler)?;
        let exception = self.em().new_temp(Type::Object)?;
        self.em().store_slot(exception)?;

        for clause in &t.catches {
            let next = self.em().new_label("catch_next");
            self.block_with(&clause.body, |g| {
                g.store_symbol(clause.exception, |g| g.em().load_slot(exception))?;
                if let Some(condition) = &clause.condition {
                    let matched = g.em().new_label("catch_matched");
                    g.load_as(condition, Type::Boolean)?;
                    g.em().if_true(matched)?;
                    if clause.body.needs_scope {
                        g.unwind_scopes(1)?;
                    }
                    g.em().goto(next)?;
                    g.em().label(matched)?;
                }
                Ok(())
            })?;
            self.em().goto(done)?;
            self.em().label(next)?;
            if !self.is_reachable() {
                break;
            }
        }

        // no clause matched
        self.em().load_slot(exception)?;
        self.em().throw()?;

        self.em().label(done)?;
        self.em().try_region(start, end, handler);
        Ok(())
    }

    fn with(&mut self, w: &WithStatement) -> Result<(), CompileError> {
        let start = self.em().new_label("with_start");
        let end = self.em().new_label("with_end");
        let handler = self.em().new_label("with_handler");
        let done = self.em().new_label("with_done");

        self.load_scope()?;
        self.load_as(&w.object, Type::Object)?;
        self.em().runtime(RuntimeCall::OpenWith)?;
        self.em().store_reserved(Reserved::Scope)?;

        let index = self.emitter_index();
        self.lc.push(Frame::With, index);
        self.em().label(start)?;
        let result = self.block(&w.body);
        self.em().label(end)?;
        self.lc.pop();
        result?;

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
}
