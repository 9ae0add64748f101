//! Independent check of the stack discipline of compiled code.
//!
//! The shape of the operand stack is re-derived for every reachable instruction by abstract interpretation,
//! starting from an empty stack at the entry point and a single object at every exception handler.

use std::sync::Arc;

use ember_middle::compiler::instruction_iter::{DecodeCtxt, DecodeError, Op};
use ember_middle::compiler::{CompiledFunction, CompiledUnit};
use ember_middle::ty::Type;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::error::StackShape;
use crate::install::Verifier;
use crate::unit::UnitView;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("`{function}` is not a valid instruction stream")]
    Decode {
        function: Arc<str>,
        #[source]
        source: DecodeError,
    },
    #[error("stack underflow in `{function}` at {ip}")]
    Underflow { function: Arc<str>, ip: u32 },
    #[error("`{function}` at {ip}: expected {expected}, found {actual}")]
    OperandType {
        function: Arc<str>,
        ip: u32,
        expected: Type,
        actual: Type,
    },
    #[error("`{function}` at {ip}: incompatible stack shapes [{expected}] and [{actual}]")]
    ShapeMismatch {
        function: Arc<str>,
        ip: u32,
        expected: StackShape,
        actual: StackShape,
    },
    #[error("`{function}` at {ip}: {target} is not an instruction boundary")]
    InvalidTarget { function: Arc<str>, ip: u32, target: u32 },
    #[error("`{function}` at {ip}: {what} {index} does not exist")]
    MissingOperand {
        function: Arc<str>,
        ip: u32,
        what: &'static str,
        index: u32,
    },
    #[error("`{function}` at {ip}: operation is not defined for {ty}")]
    Unsupported { function: Arc<str>, ip: u32, ty: Type },
    #[error("control falls off the end of `{function}` at {ip}")]
    FallsOffEnd { function: Arc<str>, ip: u32 },
}

/// The verifier used when the environment does not supply one
#[derive(Debug, Default, Clone, Copy)]
pub struct StackShapeVerifier;

impl Verifier for StackShapeVerifier {
    fn verify(&self, unit: &CompiledUnit) -> Result<(), VerifyError> {
        unit.functions.iter().try_for_each(|f| verify_function(f, unit))
    }
}

pub fn verify_function(function: &CompiledFunction, unit: &dyn UnitView) -> Result<(), VerifyError> {
    let mut ops = FxHashMap::default();
    let mut order = Vec::new();
    for decoded in DecodeCtxt::new(&function.code) {
        let (ip, op) = decoded.map_err(|source| VerifyError::Decode {
            function: function.name.clone(),
            source,
        })?;
        order.push(ip as u32);
        ops.insert(ip as u32, op);
    }

    let mut cx = VerifyCtxt {
        function,
        unit,
        ops: &ops,
        next: order.windows(2).map(|w| (w[0], w[1])).collect(),
        states: FxHashMap::default(),
        worklist: Vec::new(),
    };

    cx.merge(0, 0, Vec::new())?;
    for region in &function.try_regions {
        cx.merge(region.handler, region.handler, vec![Type::Object])?;
    }

    while let Some(ip) = cx.worklist.pop() {
        cx.step(ip)?;
    }

    Ok(())
}

struct VerifyCtxt<'a> {
    function: &'a CompiledFunction,
    unit: &'a dyn UnitView,
    ops: &'a FxHashMap<u32, Op>,
    next: FxHashMap<u32, u32>,
    states: FxHashMap<u32, Vec<Type>>,
    worklist: Vec<u32>,
}

impl VerifyCtxt<'_> {
    fn name(&self) -> Arc<str> {
        self.function.name.clone()
    }

    fn merge(&mut self, from: u32, target: u32, shape: Vec<Type>) -> Result<(), VerifyError> {
        if !self.ops.contains_key(&target) {
            return Err(VerifyError::InvalidTarget {
                function: self.name(),
                ip: from,
                target,
            });
        }

        match self.states.get(&target) {
            Some(existing) if *existing != shape => Err(VerifyError::ShapeMismatch {
                function: self.name(),
                ip: target,
                expected: StackShape(existing.clone()),
                actual: StackShape(shape),
            }),
            Some(_) => Ok(()),
            None => {
                self.states.insert(target, shape);
                self.worklist.push(target);
                Ok(())
            }
        }
    }

    fn missing(&self, ip: u32, what: &'static str, index: u32) -> VerifyError {
        VerifyError::MissingOperand {
            function: self.name(),
            ip,
            what,
            index,
        }
    }

    fn step(&mut self, ip: u32) -> Result<(), VerifyError> {
        let mut stack = Stack {
            types: self.states[&ip].clone(),
            function: self.name(),
            ip,
        };
        let ops = self.ops;
        let op = &ops[&ip];

        match op {
            Op::Nop => {}
            Op::Pop => {
                stack.pop()?;
            }
            Op::Dup => {
                let ty = stack.pop()?;
                stack.push(ty);
                stack.push(ty);
            }
            Op::Dup2 => {
                let b = stack.pop()?;
                let a = stack.pop()?;
                stack.extend([a, b, a, b]);
            }
            Op::DupX1 => {
                let b = stack.pop()?;
                let a = stack.pop()?;
                stack.extend([b, a, b]);
            }
            Op::DupX2 => {
                let c = stack.pop()?;
                let b = stack.pop()?;
                let a = stack.pop()?;
                stack.extend([c, a, b, c]);
            }
            Op::Swap => {
                let b = stack.pop()?;
                let a = stack.pop()?;
                stack.extend([b, a]);
            }
            Op::Undefined | Op::Null => stack.push(Type::Object),
            Op::True | Op::False => stack.push(Type::Boolean),
            Op::Int(_) => stack.push(Type::Int),
            Op::Constant(id) => {
                let constant = self
                    .unit
                    .constant(*id)
                    .ok_or_else(|| self.missing(ip, "constant", u32::from(*id)))?;
                stack.push(constant.ty());
            }
            Op::Literal(id) => {
                self.unit.literal(*id).ok_or_else(|| self.missing(ip, "literal", *id))?;
                stack.push(Type::Object);
            }
            Op::LdLocal(slot) => {
                let ty = self.slot(ip, *slot)?;
                stack.push(ty);
            }
            Op::StoreLocal(slot) => {
                let ty = self.slot(ip, *slot)?;
                stack.expect(ty)?;
            }
            Op::Arith(op, ty) => {
                if !op.accepts(*ty) {
                    return Err(VerifyError::Unsupported {
                        function: self.name(),
                        ip,
                        ty: *ty,
                    });
                }
                stack.expect(*ty)?;
                stack.expect(*ty)?;
                stack.push(op.result(*ty));
            }
            Op::Neg(ty) => {
                stack.expect(*ty)?;
                stack.push(*ty);
            }
            Op::Cmp(_, ty) => {
                stack.expect(*ty)?;
                stack.expect(*ty)?;
                stack.push(Type::Boolean);
            }
            Op::Convert(from, to) => {
                stack.expect(*from)?;
                stack.push(*to);
            }
            Op::Goto(target) => return self.merge(ip, *target, stack.types),
            Op::IfTrue(target) | Op::IfFalse(target) => {
                stack.expect(Type::Boolean)?;
                self.merge(ip, *target, stack.types.clone())?;
            }
            Op::TableSwitch { .. } | Op::LookupSwitch { .. } => {
                stack.expect(Type::Int)?;
                for target in op.targets() {
                    self.merge(ip, target, stack.types.clone())?;
                }
                return Ok(());
            }
            Op::Return(ty) => {
                let expected = self.function.signature.ret.stack_type();
                if *ty != expected {
                    return Err(VerifyError::OperandType {
                        function: self.name(),
                        ip,
                        expected,
                        actual: *ty,
                    });
                }
                stack.expect(*ty)?;
                return Ok(());
            }
            Op::Throw => {
                stack.expect(Type::Object)?;
                return Ok(());
            }
            Op::Runtime(call) => {
                for &param in call.params().iter().rev() {
                    stack.expect(param)?;
                }
                if let Some(ret) = call.ret() {
                    stack.push(ret);
                }
            }
            Op::InvokeStatic(id) => {
                let method = self
                    .unit
                    .constant(*id)
                    .and_then(|c| c.as_method())
                    .ok_or_else(|| self.missing(ip, "method", u32::from(*id)))?;
                for &param in method.signature.params.iter().rev() {
                    stack.expect(param)?;
                }
                stack.push(method.signature.ret);
            }
            Op::NewFunction(id) => {
                self.unit
                    .constant(*id)
                    .and_then(|c| c.as_method())
                    .ok_or_else(|| self.missing(ip, "method", u32::from(*id)))?;
                stack.expect(Type::Object)?;
                stack.push(Type::Object);
            }
            Op::Dynamic(id) => {
                let desc = self
                    .unit
                    .call_site(*id)
                    .ok_or_else(|| self.missing(ip, "call site", u32::from(*id)))?;
                for &param in desc.params.iter().rev() {
                    stack.expect(param)?;
                }
                if let Some(ret) = desc.ret {
                    stack.push(ret);
                }
            }
            Op::ArrayStore(ty) => {
                stack.expect(*ty)?;
                stack.expect(Type::Int)?;
                stack.expect(Type::Object)?;
            }
        }

        match self.next.get(&ip) {
            Some(&next) => self.merge(ip, next, stack.types),
            None => Err(VerifyError::FallsOffEnd {
                function: self.name(),
                ip,
            }),
        }
    }

    fn slot(&self, ip: u32, slot: u16) -> Result<Type, VerifyError> {
        self.function
            .slots
            .get(usize::from(slot))
            .copied()
            .ok_or_else(|| self.missing(ip, "slot", u32::from(slot)))
    }
}

struct Stack {
    types: Vec<Type>,
    function: Arc<str>,
    ip: u32,
}

impl Stack {
    fn pop(&mut self) -> Result<Type, VerifyError> {
        self.types.pop().ok_or_else(|| VerifyError::Underflow {
            function: self.function.clone(),
            ip: self.ip,
        })
    }

    fn expect(&mut self, expected: Type) -> Result<(), VerifyError> {
        let expected = expected.stack_type();
        let actual = self.pop()?;
        if actual != expected {
            return Err(VerifyError::OperandType {
                function: self.function.clone(),
                ip: self.ip,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn push(&mut self, ty: Type) {
        self.types.push(ty.stack_type());
    }

    fn extend(&mut self, types: impl IntoIterator<Item = Type>) {
        self.types.extend(types);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_middle::compiler::instruction::Instruction;
    use ember_middle::compiler::{CompiledFunction, CompiledUnit, MethodKind, Signature};
    use ember_middle::ty::Type;

    use super::*;

    fn unit(code: Vec<u8>) -> CompiledUnit {
        CompiledUnit {
            name: Arc::from("Script$0"),
            source_name: Arc::from("test.js"),
            functions: vec![CompiledFunction {
                name: Arc::from("f"),
                kind: MethodKind::Function,
                signature: Signature::new([], Type::Int),
                code: code.into_boxed_slice(),
                slots: Vec::new(),
                max_stack: 2,
                lines: Vec::new(),
                locals: Vec::new(),
                try_regions: Vec::new(),
            }],
            constants: Box::new([]),
            literals: Box::new([]),
            call_sites: Box::new([]),
        }
    }

    fn int(v: i32) -> Vec<u8> {
        let mut out = vec![Instruction::Int as u8];
        out.extend_from_slice(&v.to_le_bytes());
        out
    }

    #[test]
    fn accepts_straight_line_code() {
        let mut code = int(1);
        code.extend([Instruction::Return as u8, Type::Int as u8]);
        StackShapeVerifier.verify(&unit(code)).unwrap();
    }

    #[test]
    fn rejects_unbalanced_merge() {
        // True; IfTrue 11; Int 1; (11:) Int 2; Return int
        let mut code = vec![Instruction::True as u8, Instruction::IfTrue as u8];
        code.extend_from_slice(&11u32.to_le_bytes());
        code.extend(int(1));
        code.extend(int(2));
        code.extend([Instruction::Return as u8, Type::Int as u8]);

        let err = StackShapeVerifier.verify(&unit(code)).unwrap_err();
        assert!(matches!(err, VerifyError::ShapeMismatch { ip: 11, .. }));
    }

    #[test]
    fn rejects_fall_off() {
        let code = int(1);
        let err = StackShapeVerifier.verify(&unit(code)).unwrap_err();
        assert!(matches!(err, VerifyError::FallsOffEnd { .. }));
    }
}
