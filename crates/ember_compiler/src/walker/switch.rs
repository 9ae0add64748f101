use std::sync::Arc;

use ember_middle::ast::{Expr, ExprKind, Literal, SwitchStatement};
use ember_middle::compiler::instruction::{Condition, RuntimeCall};
use ember_middle::ty::Type;
use rustc_hash::{FxHashMap, FxHashSet};

use super::CodeGenerator;
use crate::emitter::Label;
use crate::error::CompileError;
use crate::lexical::{BreakableKind, Frame};

/// A key that none of `keys` uses, for tags that are not integers
fn unused_key(keys: &FxHashSet<i32>, lo: i32, hi: i32) -> i32 {
    if lo > i32::MIN {
        lo - 1
    } else if hi < i32::MAX {
        hi + 1
    } else {
        (lo..hi).find(|k| !keys.contains(k)).unwrap_or(lo)
    }
}

impl CodeGenerator<'_> {
    pub(super) fn switch(&mut self, s: &SwitchStatement, labels: Vec<Arc<str>>) -> Result<(), CompileError> {
        if s.cases.is_empty() {
            return self.discard(&s.discriminant);
        }

        let brk = self.em().new_label("switch_break");
        let case_labels: Vec<Label> = s.cases.iter().map(|_| self.em().new_label("switch_case")).collect();
        let default = s
            .cases
            .iter()
            .position(|c| c.test.is_none())
            .map_or(brk, |i| case_labels[i]);

        let tests: Vec<(&Expr, Label)> = s
            .cases
            .iter()
            .zip(&case_labels)
            .filter_map(|(case, label)| case.test.as_ref().map(|t| (t, *label)))
            .collect();
        let int_keys: Option<Vec<(i32, Label)>> = tests
            .iter()
            .map(|(test, label)| match test.kind {
                ExprKind::Literal(Literal::Int(v)) => Some((v, *label)),
                _ => None,
            })
            .collect();

        match int_keys {
            Some(keys) if !keys.is_empty() => self.int_dispatch(&s.discriminant, keys, default)?,
            _ => self.compare_dispatch(&s.discriminant, &tests, default)?,
        }

        let index = self.emitter_index();
        self.lc.push(
            Frame::Breakable {
                kind: BreakableKind::Switch,
                labels,
                break_label: brk,
                continue_label: None,
            },
            index,
        );
        for (case, label) in s.cases.iter().zip(&case_labels) {
            self.em().label(*label)?;
            self.statement_list(&case.body)?;
        }
        self.lc.pop();

        self.em().label(brk)
    }

    /// Dispatches through a jump table or a lookup table on an integer tag
    fn int_dispatch(&mut self, tag: &Expr, keys: Vec<(i32, Label)>, default: Label) -> Result<(), CompileError> {
        // the first case with a given value wins
        let mut seen = FxHashSet::default();
        let keys: Vec<(i32, Label)> = keys.into_iter().filter(|(k, _)| seen.insert(*k)).collect();
        let lo = keys.iter().map(|(k, _)| *k).min().unwrap_or(0);
        let hi = keys.iter().map(|(k, _)| *k).max().unwrap_or(0);

        if tag.ty.stack_type() == Type::Int {
            self.load_as(tag, Type::Int)?;
        } else {
            self.load_as(tag, Type::Object)?;
            self.em().int(unused_key(&seen, lo, hi));
            self.em().runtime(RuntimeCall::SwitchTagAsInt)?;
        }

        let range = i64::from(hi) - i64::from(lo) + 1;
        let policy = self.config.switch;
        if range < policy.table_range_ceiling && keys.len() as f64 / range as f64 >= policy.min_density {
            let by_key: FxHashMap<i32, Label> = keys.iter().copied().collect();
            let targets: Vec<Label> = (lo..=hi).map(|k| by_key.get(&k).copied().unwrap_or(default)).collect();
            ember_log::debug!(lo, hi, cases = keys.len(), "switch lowered to a jump table");
            self.em().table_switch(lo, hi, default, &targets)
        } else {
            ember_log::debug!(lo, hi, cases = keys.len(), "switch lowered to a lookup table");
            self.em().lookup_switch(default, &keys)
        }
    }

    /// Compares the tag with every case in order
    fn compare_dispatch(&mut self, tag: &Expr, tests: &[(&Expr, Label)], default: Label) -> Result<(), CompileError> {
        let tag_ty = tag.ty.stack_type();
        let ot = if tests.iter().all(|(test, _)| test.ty.stack_type() == tag_ty) {
            tag_ty
        } else {
            Type::Object
        };

        self.load_as(tag, tag_ty)?;
        let slot = self.em().new_temp(tag_ty)?;
        self.em().store_slot(slot)?;

        for (test, label) in tests {
            self.em().load_slot(slot)?;
            self.em().convert(ot)?;
            self.load_as(test, ot)?;
            self.em().cmp(Condition::StrictEq, ot)?;
            self.em().if_true(*label)?;
        }
        self.em().goto(default)
    }
}
