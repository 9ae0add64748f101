use thiserror::Error;

use crate::ty::Type;

use super::instruction::{ArithOp, Condition, Instruction, RuntimeCall};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {opcode:#x} at {ip}")]
    UnknownOpcode { ip: usize, opcode: u8 },
    #[error("invalid operand {value:#x} at {ip}")]
    InvalidOperand { ip: usize, value: u8 },
    #[error("instruction at {ip} is truncated")]
    Truncated { ip: usize },
}

/// A decoded instruction with its operands
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Nop,
    Pop,
    Dup,
    Dup2,
    DupX1,
    DupX2,
    Swap,
    Undefined,
    Null,
    True,
    False,
    Int(i32),
    Constant(u16),
    Literal(u32),
    LdLocal(u16),
    StoreLocal(u16),
    Arith(ArithOp, Type),
    Neg(Type),
    Cmp(Condition, Type),
    Convert(Type, Type),
    Goto(u32),
    IfTrue(u32),
    IfFalse(u32),
    TableSwitch { low: i32, default: u32, targets: Vec<u32> },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
    Return(Type),
    Throw,
    Runtime(RuntimeCall),
    InvokeStatic(u16),
    NewFunction(u16),
    Dynamic(u16),
    ArrayStore(Type),
}

impl Op {
    /// Whether control never falls through to the next instruction
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Op::Goto(_) | Op::TableSwitch { .. } | Op::LookupSwitch { .. } | Op::Return(_) | Op::Throw
        )
    }

    /// Every branch target of this instruction
    pub fn targets(&self) -> Vec<u32> {
        match self {
            Op::Goto(t) | Op::IfTrue(t) | Op::IfFalse(t) => vec![*t],
            Op::TableSwitch { default, targets, .. } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            Op::LookupSwitch { default, pairs } => {
                let mut all: Vec<u32> = pairs.iter().map(|&(_, t)| t).collect();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }
}

/// Decodes an instruction stream one instruction at a time
#[derive(Debug, Clone)]
pub struct DecodeCtxt<'a> {
    buf: &'a [u8],
    ip: usize,
}

impl<'a> DecodeCtxt<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, ip: 0 }
    }

    /// Starts decoding at `ip`
    pub fn at(buf: &'a [u8], ip: usize) -> Self {
        Self { buf, ip }
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    fn bytes<const N: usize>(&mut self, start: usize) -> Result<[u8; N], DecodeError> {
        let bytes = self
            .buf
            .get(self.ip..self.ip + N)
            .and_then(|b| <[u8; N]>::try_from(b).ok())
            .ok_or(DecodeError::Truncated { ip: start })?;
        self.ip += N;
        Ok(bytes)
    }

    fn u8(&mut self, start: usize) -> Result<u8, DecodeError> {
        self.bytes::<1>(start).map(|[b]| b)
    }

    fn u16(&mut self, start: usize) -> Result<u16, DecodeError> {
        self.bytes(start).map(u16::from_le_bytes)
    }

    fn u32(&mut self, start: usize) -> Result<u32, DecodeError> {
        self.bytes(start).map(u32::from_le_bytes)
    }

    fn i32(&mut self, start: usize) -> Result<i32, DecodeError> {
        self.bytes(start).map(i32::from_le_bytes)
    }

    fn ty(&mut self, start: usize) -> Result<Type, DecodeError> {
        let value = self.u8(start)?;
        Type::from_repr(value).ok_or(DecodeError::InvalidOperand { ip: start, value })
    }

    pub fn decode(&mut self) -> Result<(usize, Op), DecodeError> {
        let start = self.ip;
        let opcode = self.u8(start)?;
        let instr = Instruction::from_repr(opcode).ok_or(DecodeError::UnknownOpcode { ip: start, opcode })?;

        let op = match instr {
            Instruction::Nop => Op::Nop,
            Instruction::Pop => Op::Pop,
            Instruction::Dup => Op::Dup,
            Instruction::Dup2 => Op::Dup2,
            Instruction::DupX1 => Op::DupX1,
            Instruction::DupX2 => Op::DupX2,
            Instruction::Swap => Op::Swap,
            Instruction::Undefined => Op::Undefined,
            Instruction::Null => Op::Null,
            Instruction::True => Op::True,
            Instruction::False => Op::False,
            Instruction::Int => Op::Int(self.i32(start)?),
            Instruction::Constant => Op::Constant(self.u16(start)?),
            Instruction::Literal => Op::Literal(self.u32(start)?),
            Instruction::LdLocal => Op::LdLocal(self.u16(start)?),
            Instruction::StoreLocal => Op::StoreLocal(self.u16(start)?),
            Instruction::Arith => {
                let value = self.u8(start)?;
                let arith = ArithOp::from_repr(value).ok_or(DecodeError::InvalidOperand { ip: start, value })?;
                Op::Arith(arith, self.ty(start)?)
            }
            Instruction::Neg => Op::Neg(self.ty(start)?),
            Instruction::Cmp => {
                let value = self.u8(start)?;
                let cond = Condition::from_repr(value).ok_or(DecodeError::InvalidOperand { ip: start, value })?;
                Op::Cmp(cond, self.ty(start)?)
            }
            Instruction::Convert => Op::Convert(self.ty(start)?, self.ty(start)?),
            Instruction::Goto => Op::Goto(self.u32(start)?),
            Instruction::IfTrue => Op::IfTrue(self.u32(start)?),
            Instruction::IfFalse => Op::IfFalse(self.u32(start)?),
            Instruction::TableSwitch => {
                let low = self.i32(start)?;
                let high = self.i32(start)?;
                let default = self.u32(start)?;
                let count = i64::from(high) - i64::from(low) + 1;
                if count < 0 {
                    return Err(DecodeError::Truncated { ip: start });
                }
                let targets = (0..count).map(|_| self.u32(start)).collect::<Result<_, _>>()?;
                Op::TableSwitch { low, default, targets }
            }
            Instruction::LookupSwitch => {
                let default = self.u32(start)?;
                let count = self.u16(start)?;
                let pairs = (0..count)
                    .map(|_| -> Result<(i32, u32), DecodeError> { Ok((self.i32(start)?, self.u32(start)?)) })
                    .collect::<Result<_, _>>()?;
                Op::LookupSwitch { default, pairs }
            }
            Instruction::Return => Op::Return(self.ty(start)?),
            Instruction::Throw => Op::Throw,
            Instruction::Runtime => {
                let value = self.u8(start)?;
                Op::Runtime(RuntimeCall::from_repr(value).ok_or(DecodeError::InvalidOperand { ip: start, value })?)
            }
            Instruction::InvokeStatic => Op::InvokeStatic(self.u16(start)?),
            Instruction::NewFunction => Op::NewFunction(self.u16(start)?),
            Instruction::Dynamic => Op::Dynamic(self.u16(start)?),
            Instruction::ArrayStore => Op::ArrayStore(self.ty(start)?),
        };

        Ok((start, op))
    }
}

impl Iterator for DecodeCtxt<'_> {
    type Item = Result<(usize, Op), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ip >= self.buf.len() {
            return None;
        }
        let item = self.decode();
        if item.is_err() {
            // stop after the first error
            self.ip = self.buf.len();
        }
        Some(item)
    }
}
