use std::sync::Arc;

use ember_middle::ast::{Expr, ExprKind, Literal};
use ember_middle::compiler::constant::{ArrayPreset, Constant, LiteralData, PresetValue};
use ember_middle::compiler::instruction::RuntimeCall;
use ember_middle::compiler::{MethodKind, MethodRef, Signature};
use ember_middle::ty::Type;

use super::CodeGenerator;
use crate::emitter::{MethodEmitter, Reserved};
use crate::error::CompileError;
use crate::{splitter, weigh};

/// The preset entry for a constant element of an array whose raw elements have type `element`
fn preset_value(lit: &Literal, element: Type) -> PresetValue {
    match (lit, element) {
        (Literal::Int(v), Type::Long) => PresetValue::Long(i64::from(*v)),
        (Literal::Int(v), Type::Double) => PresetValue::Double(f64::from(*v)),
        (Literal::Long(v), Type::Double) => PresetValue::Double(*v as f64),
        (Literal::Undefined, _) => PresetValue::Undefined,
        (Literal::Null, _) => PresetValue::Null,
        (Literal::Boolean(v), _) => PresetValue::Boolean(*v),
        (Literal::Int(v), _) => PresetValue::Int(*v),
        (Literal::Long(v), _) => PresetValue::Long(*v),
        (Literal::Double(v), _) => PresetValue::Double(*v),
        (Literal::String(s), _) => PresetValue::String(s.clone()),
        (Literal::Regex { .. } | Literal::Array(_), _) => PresetValue::Empty,
    }
}

/// Slot of the raw array in an array unit
const ARRAY_PARAM: u16 = 3;

fn constant_literal(e: &Expr) -> Option<&Literal> {
    match &e.kind {
        ExprKind::Literal(lit) if lit.is_constant() => Some(lit),
        _ => None,
    }
}

impl CodeGenerator<'_> {
    pub(super) fn literal(&mut self, lit: &Literal) -> Result<(), CompileError> {
        match lit {
            Literal::Undefined => self.em().undefined(),
            Literal::Null => self.em().null(),
            Literal::Boolean(v) => self.em().boolean(*v),
            Literal::Int(v) => self.em().int(*v),
            Literal::Long(v) => self.push_constant(Constant::Long(*v))?,
            Literal::Double(v) => self.push_constant(Constant::Double(*v))?,
            Literal::String(s) => self.string_literal(s)?,
            Literal::Regex { pattern, flags } => self.regex_literal(pattern, flags)?,
            Literal::Array(elements) => self.array_literal(elements)?,
        }
        Ok(())
    }

    fn string_literal(&mut self, s: &Arc<str>) -> Result<(), CompileError> {
        if s.len() > self.config.large_string_threshold {
            let result = self.unit_mut()?.add_literal(LiteralData::String(s.clone()));
            match result {
                Ok(id) => {
                    self.em().literal(id);
                    return Ok(());
                }
                Err(_) => ember_log::debug!(len = s.len(), "literal pool full, string goes to the constant pool"),
            }
        }
        self.push_constant(Constant::String(s.clone()))
    }

    fn regex_literal(&mut self, pattern: &Arc<str>, flags: &Arc<str>) -> Result<(), CompileError> {
        let result = self.unit_mut()?.add_literal(LiteralData::Regex {
            pattern: pattern.clone(),
            flags: flags.clone(),
        });

        match result {
            Ok(id) => {
                self.em().literal(id);
                self.em().runtime(RuntimeCall::CopyRegExp)
            }
            Err(_) => {
                self.push_constant(Constant::String(pattern.clone()))?;
                self.push_constant(Constant::String(flags.clone()))?;
                self.em().runtime(RuntimeCall::NewRegExp)
            }
        }
    }

    /// Starts from a preset of the constant elements where possible and stores the rest one by one
    fn array_literal(&mut self, elements: &[Option<Expr>]) -> Result<(), CompileError> {
        let numeric = !elements.is_empty() && elements.iter().all(|e| e.as_ref().is_some_and(|e| e.ty.is_numeric()));
        let element = if numeric {
            elements
                .iter()
                .flatten()
                .map(|e| e.ty)
                .reduce(Type::widest)
                .unwrap_or(Type::Object)
        } else {
            Type::Object
        };

        let values = elements
            .iter()
            .map(|e| match e.as_ref().and_then(constant_literal) {
                Some(lit) => preset_value(lit, element),
                None => PresetValue::Empty,
            })
            .collect();
        let result = self.unit_mut()?.add_literal(LiteralData::Array(ArrayPreset { element, values }));

        let present = elements.iter().enumerate().filter_map(|(i, e)| e.as_ref().map(|e| (i, e)));
        let (element, postsets): (Type, Vec<(usize, &Expr)>) = match result {
            Ok(id) => {
                self.em().literal(id);
                (element, present.filter(|(_, e)| constant_literal(e).is_none()).collect())
            }
            Err(_) => {
                let len = i32::try_from(elements.len()).map_err(|_| self.em_ref().limit_exceeded("array literal"))?;
                self.em().int(len);
                self.em().runtime(RuntimeCall::NewRawArray)?;
                (Type::Object, present.collect())
            }
        };

        let symbols = self.symbols;
        if postsets.len() > self.config.array_split_threshold
            && postsets.iter().all(|(_, e)| splitter::is_detached(e, symbols))
        {
            self.array_units(&postsets, element)?;
        } else {
            for (i, value) in postsets {
                self.store_element(i, value, element)?;
            }
        }

        self.em().runtime(RuntimeCall::AllocateArray)
    }

    /// With the raw array on the stack, stores `value` at index `i`
    fn store_element(&mut self, i: usize, value: &Expr, element: Type) -> Result<(), CompileError> {
        let index = i32::try_from(i).map_err(|_| self.em_ref().limit_exceeded("array literal"))?;
        self.em().dup()?;
        self.em().int(index);
        self.load_as(value, element)?;
        self.em().array_store(element)
    }

    /// Stores the elements in sub-units of at most `array_split_threshold` elements each
    fn array_units(&mut self, postsets: &[(usize, &Expr)], element: Type) -> Result<(), CompileError> {
        let raw = self.em().new_temp(Type::Object)?;
        self.em().store_slot(raw)?;

        for chunk in postsets.chunks(self.config.array_split_threshold.max(1)) {
            let method = self.array_unit(chunk, element)?;
            self.em().load_reserved(Reserved::Callee)?;
            self.em().load_reserved(Reserved::This)?;
            self.load_scope()?;
            self.em().load_slot(raw)?;
            self.invoke(method)?;
            self.em().pop()?;
        }

        self.em().load_slot(raw)
    }

    /// Stores the elements of `chunk` into the raw array parameter and returns it
    fn array_unit_body(&mut self, chunk: &[(usize, &Expr)], element: Type) -> Result<(), CompileError> {
        self.em().load_slot(ARRAY_PARAM)?;
        for (i, value) in chunk {
            self.store_element(*i, value, element)?;
        }
        self.em().ret(Type::Object)
    }

    fn array_unit(&mut self, chunk: &[(usize, &Expr)], element: Type) -> Result<MethodRef, CompileError> {
        let function = self.function_state().name.clone();
        let weight = chunk.iter().map(|(_, e)| weigh::expr(e)).sum();
        let unit = self.open_unit(&function, weight)?;
        let name: Arc<str> = Arc::from(format!("{function}$array${}", self.array_unit_count));
        self.array_unit_count += 1;
        let signature = Signature::new([Type::Object; 4], Type::Object);

        let mut em = MethodEmitter::new(name.clone(), function, MethodKind::ArrayUnit, signature.clone(), unit);
        em.bind_reserved(Reserved::Callee, 0);
        em.bind_reserved(Reserved::This, 1);
        em.bind_reserved(Reserved::Scope, 2);
        em.set_location(self.em_ref().location());
        self.emitters.push(em);

        let result = self.array_unit_body(chunk, element);
        let em = self.emitters.pop().expect("array unit emitter was pushed above");
        result?;
        let compiled = em.finish()?;

        let builder = &mut self.units[usize::from(unit)];
        let method = builder.method_ref(name, signature);
        builder.add_function(compiled);
        ember_log::debug!(method = %method, elements = chunk.len(), "emitted array unit");
        Ok(method)
    }
}
