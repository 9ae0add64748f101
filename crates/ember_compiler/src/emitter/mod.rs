//! A typed instruction emitter.
//!
//! Every instruction is checked against a shadow model of the operand stack before it is written,
//! and every edge into a label must carry the same stack shape. Code emitted while the current
//! position is unreachable (after a `goto`, `return`, `throw` or switch) is dropped.

use std::sync::Arc;

use ember_middle::ast::{Symbol, SymbolId};
use ember_middle::compiler::callsite::CallSiteDescriptor;
use ember_middle::compiler::instruction::{ArithOp, Condition, Instruction, RuntimeCall};
use ember_middle::compiler::{CompiledFunction, LineEntry, LocalEntry, MethodKind, MethodRef, Signature, TryRegion};
use ember_middle::sourcemap::Location;
use ember_middle::ty::Type;
use rustc_hash::FxHashMap;

use crate::error::CompileError;
use crate::lexical::JumpKind;
use crate::unit::UnitId;

mod jump_container;

pub use jump_container::Label;
use jump_container::JumpContainer;

/// Method-local values that are not user symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reserved {
    Callee,
    This,
    Scope,
    Arguments,
    Varargs,
    ReturnValue,
}

impl Reserved {
    const COUNT: usize = 6;

    pub fn name(self) -> &'static str {
        match self {
            Reserved::Callee => ":callee",
            Reserved::This => "this",
            Reserved::Scope => ":scope",
            Reserved::Arguments => ":arguments",
            Reserved::Varargs => ":varargs",
            Reserved::ReturnValue => ":return",
        }
    }
}

/// A break or continue target outside of a split sub-unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalTarget {
    /// Index of the target node in the lexical context
    pub frame: usize,
    pub kind: JumpKind,
}

/// How a split sub-unit can exit other than by falling through
#[derive(Debug, Clone, Default)]
pub struct SplitExits {
    pub targets: Vec<ExternalTarget>,
    pub has_return: bool,
}

pub struct MethodEmitter {
    name: Arc<str>,
    /// The source function this method belongs to
    function: Arc<str>,
    kind: MethodKind,
    signature: Signature,
    unit: UnitId,
    buf: Vec<u8>,
    /// `None` if the current position is unreachable
    stack: Option<Vec<Type>>,
    max_stack: usize,
    slots: Vec<Type>,
    symbol_slots: FxHashMap<SymbolId, u16>,
    reserved: [Option<u16>; Reserved::COUNT],
    jc: JumpContainer,
    try_regions: Vec<(Label, Label, Label)>,
    lines: Vec<LineEntry>,
    last_line: Option<u32>,
    locals: Vec<LocalEntry>,
    location: Location,
    split: Option<SplitExits>,
}

impl MethodEmitter {
    pub fn new(name: Arc<str>, function: Arc<str>, kind: MethodKind, signature: Signature, unit: UnitId) -> Self {
        let slots = signature.params.iter().map(|t| t.stack_type()).collect();

        Self {
            name,
            function,
            kind,
            signature,
            unit,
            buf: Vec::new(),
            stack: Some(Vec::new()),
            max_stack: 0,
            slots,
            symbol_slots: FxHashMap::default(),
            reserved: [None; Reserved::COUNT],
            jc: JumpContainer::new(),
            try_regions: Vec::new(),
            lines: Vec::new(),
            last_line: None,
            locals: Vec::new(),
            location: Location::default(),
            split: None,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn function(&self) -> &Arc<str> {
        &self.function
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn method_ref(&self, unit: Arc<str>) -> MethodRef {
        MethodRef {
            unit,
            name: self.name.clone(),
            signature: self.signature.clone(),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.stack.is_some()
    }

    /// The current stack shape, bottom first
    pub fn stack(&self) -> Option<&[Type]> {
        self.stack.as_deref()
    }

    pub fn top(&self) -> Option<Type> {
        self.stack.as_ref().and_then(|s| s.last().copied())
    }

    pub fn ip(&self) -> usize {
        self.buf.len()
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    fn mismatch(&self, context: &'static str, expected: &[Type], actual: &[Type]) -> CompileError {
        CompileError::StackShapeMismatch {
            function: self.function.clone(),
            location: self.location,
            context,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    fn operand_type(&self, op: &'static str, expected: Type, actual: Type) -> CompileError {
        CompileError::OperandType {
            function: self.function.clone(),
            location: self.location,
            op,
            expected,
            actual,
        }
    }

    fn unsupported(&self, op: &'static str, ty: Type) -> CompileError {
        CompileError::UnsupportedOperand {
            function: self.function.clone(),
            location: self.location,
            op,
            ty,
        }
    }

    pub fn limit_exceeded(&self, what: &'static str) -> CompileError {
        CompileError::LimitExceeded {
            function: self.function.clone(),
            what,
        }
    }

    fn missing_slot(&self, what: Arc<str>) -> CompileError {
        CompileError::MissingSlot {
            function: self.function.clone(),
            what,
        }
    }

    fn push(&mut self, ty: Type) {
        if let Some(stack) = &mut self.stack {
            stack.push(ty.stack_type());
            self.max_stack = self.max_stack.max(stack.len());
        }
    }

    fn pop_any(&mut self, op: &'static str) -> Result<Type, CompileError> {
        match self.stack.as_mut().and_then(Vec::pop) {
            Some(ty) => Ok(ty),
            None => Err(CompileError::StackUnderflow {
                function: self.function.clone(),
                location: self.location,
                op,
            }),
        }
    }

    fn pop_type(&mut self, op: &'static str, expected: Type) -> Result<(), CompileError> {
        let actual = self.pop_any(op)?;
        if actual != expected.stack_type() {
            return Err(self.operand_type(op, expected.stack_type(), actual));
        }
        Ok(())
    }

    fn peek(&self, op: &'static str) -> Result<Type, CompileError> {
        self.top().ok_or_else(|| CompileError::StackUnderflow {
            function: self.function.clone(),
            location: self.location,
            op,
        })
    }

    fn write_instr(&mut self, instr: Instruction) {
        self.buf.push(instr as u8);
    }

    fn write(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    fn writew(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn writei(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn writeu(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn new_label(&mut self, name: &'static str) -> Label {
        self.jc.new_label(name)
    }

    /// Allocates a fresh local slot
    pub fn new_temp(&mut self, ty: Type) -> Result<u16, CompileError> {
        let slot = u16::try_from(self.slots.len()).map_err(|_| self.limit_exceeded("local slot"))?;
        self.slots.push(ty.stack_type());
        Ok(slot)
    }

    /// Allocates a fresh local slot that is listed in the local variable table
    pub fn new_named_slot(&mut self, name: Arc<str>, ty: Type) -> Result<u16, CompileError> {
        let slot = self.new_temp(ty)?;
        self.locals.push(LocalEntry {
            slot,
            name,
            ty: ty.stack_type(),
            start: self.buf.len() as u32,
            end: 0,
        });
        Ok(slot)
    }

    pub fn slot_type(&self, slot: u16) -> Option<Type> {
        self.slots.get(usize::from(slot)).copied()
    }

    pub fn bind_reserved(&mut self, reserved: Reserved, slot: u16) {
        self.reserved[reserved as usize] = Some(slot);
    }

    /// Allocates and binds a slot for a reserved value
    pub fn reserve(&mut self, reserved: Reserved, ty: Type) -> Result<u16, CompileError> {
        let slot = self.new_named_slot(Arc::from(reserved.name()), ty)?;
        self.bind_reserved(reserved, slot);
        Ok(slot)
    }

    pub fn reserved_slot(&self, reserved: Reserved) -> Option<u16> {
        self.reserved[reserved as usize]
    }

    pub fn has_reserved(&self, reserved: Reserved) -> bool {
        self.reserved_slot(reserved).is_some()
    }

    pub fn bind_symbol(&mut self, id: SymbolId, slot: u16) {
        self.symbol_slots.insert(id, slot);
    }

    /// The slot of a slot-resident symbol, allocated on first use
    pub fn symbol_slot(&mut self, id: SymbolId, symbol: &Symbol) -> Result<u16, CompileError> {
        if let Some(&slot) = self.symbol_slots.get(&id) {
            return Ok(slot);
        }
        if !symbol.is_slot() {
            return Err(self.missing_slot(symbol.name.clone()));
        }

        let slot = self.new_named_slot(symbol.name.clone(), symbol.ty)?;
        self.symbol_slots.insert(id, slot);
        Ok(slot)
    }

    pub fn line_number(&mut self, line: u32) {
        if !self.is_reachable() || self.last_line == Some(line) {
            return;
        }
        self.last_line = Some(line);

        let ip = self.buf.len() as u32;
        match self.lines.last_mut() {
            Some(entry) if entry.ip == ip => entry.line = line,
            _ => self.lines.push(LineEntry { ip, line }),
        }
    }

    pub fn nop(&mut self) {
        if self.is_reachable() {
            self.write_instr(Instruction::Nop);
        }
    }

    pub fn pop(&mut self) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        self.pop_any("pop")?;
        self.write_instr(Instruction::Pop);
        Ok(())
    }

    pub fn dup(&mut self) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let ty = self.peek("dup")?;
        self.push(ty);
        self.write_instr(Instruction::Dup);
        Ok(())
    }

    pub fn dup2(&mut self) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let b = self.pop_any("dup2")?;
        let a = self.pop_any("dup2")?;
        for ty in [a, b, a, b] {
            self.push(ty);
        }
        self.write_instr(Instruction::Dup2);
        Ok(())
    }

    /// `a b` -> `b a b`
    pub fn dup_x1(&mut self) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let b = self.pop_any("dup_x1")?;
        let a = self.pop_any("dup_x1")?;
        for ty in [b, a, b] {
            self.push(ty);
        }
        self.write_instr(Instruction::DupX1);
        Ok(())
    }

    /// `a b c` -> `c a b c`
    pub fn dup_x2(&mut self) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let c = self.pop_any("dup_x2")?;
        let b = self.pop_any("dup_x2")?;
        let a = self.pop_any("dup_x2")?;
        for ty in [c, a, b, c] {
            self.push(ty);
        }
        self.write_instr(Instruction::DupX2);
        Ok(())
    }

    pub fn swap(&mut self) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let b = self.pop_any("swap")?;
        let a = self.pop_any("swap")?;
        self.push(b);
        self.push(a);
        self.write_instr(Instruction::Swap);
        Ok(())
    }

    pub fn undefined(&mut self) {
        if self.is_reachable() {
            self.write_instr(Instruction::Undefined);
            self.push(Type::Object);
        }
    }

    pub fn null(&mut self) {
        if self.is_reachable() {
            self.write_instr(Instruction::Null);
            self.push(Type::Object);
        }
    }

    pub fn boolean(&mut self, value: bool) {
        if self.is_reachable() {
            self.write_instr(if value { Instruction::True } else { Instruction::False });
            self.push(Type::Boolean);
        }
    }

    pub fn int(&mut self, value: i32) {
        if self.is_reachable() {
            self.write_instr(Instruction::Int);
            self.writei(value);
            self.push(Type::Int);
        }
    }

    /// Loads a constant pool entry of type `ty`
    pub fn constant(&mut self, id: u16, ty: Type) {
        if self.is_reachable() {
            self.write_instr(Instruction::Constant);
            self.writew(id);
            self.push(ty);
        }
    }

    pub fn literal(&mut self, id: u32) {
        if self.is_reachable() {
            self.write_instr(Instruction::Literal);
            self.writeu(id);
            self.push(Type::Object);
        }
    }

    pub fn load_slot(&mut self, slot: u16) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let ty = self
            .slot_type(slot)
            .ok_or_else(|| self.missing_slot(Arc::from(format!("slot {slot}"))))?;
        self.write_instr(Instruction::LdLocal);
        self.writew(slot);
        self.push(ty);
        Ok(())
    }

    pub fn store_slot(&mut self, slot: u16) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let ty = self
            .slot_type(slot)
            .ok_or_else(|| self.missing_slot(Arc::from(format!("slot {slot}"))))?;
        self.pop_type("store", ty)?;
        self.write_instr(Instruction::StoreLocal);
        self.writew(slot);
        Ok(())
    }

    pub fn load_reserved(&mut self, reserved: Reserved) -> Result<(), CompileError> {
        let slot = self
            .reserved_slot(reserved)
            .ok_or_else(|| self.missing_slot(Arc::from(reserved.name())))?;
        self.load_slot(slot)
    }

    pub fn store_reserved(&mut self, reserved: Reserved) -> Result<(), CompileError> {
        let slot = self
            .reserved_slot(reserved)
            .ok_or_else(|| self.missing_slot(Arc::from(reserved.name())))?;
        self.store_slot(slot)
    }

    pub fn arith(&mut self, op: ArithOp, ty: Type) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let ty = ty.stack_type();
        if !op.accepts(ty) {
            return Err(self.unsupported("arith", ty));
        }
        self.pop_type("arith", ty)?;
        self.pop_type("arith", ty)?;
        self.write_instr(Instruction::Arith);
        self.write(op as u8);
        self.write(ty as u8);
        self.push(op.result(ty));
        Ok(())
    }

    pub fn neg(&mut self, ty: Type) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        if !ty.is_numeric() {
            return Err(self.unsupported("neg", ty));
        }
        self.pop_type("neg", ty)?;
        self.write_instr(Instruction::Neg);
        self.write(ty as u8);
        self.push(ty);
        Ok(())
    }

    /// Compares two operands of type `ty` and pushes a boolean
    pub fn cmp(&mut self, cond: Condition, ty: Type) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let ty = ty.stack_type();
        self.pop_type("cmp", ty)?;
        self.pop_type("cmp", ty)?;
        self.write_instr(Instruction::Cmp);
        self.write(cond as u8);
        self.write(ty as u8);
        self.push(Type::Boolean);
        Ok(())
    }

    /// Coerces the top of the stack to `to`
    pub fn convert(&mut self, to: Type) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let to = to.stack_type();
        let from = self.peek("convert")?;
        if from == to {
            return Ok(());
        }

        if from == Type::Object {
            let call = match to {
                Type::Boolean => RuntimeCall::ToBoolean,
                Type::Int => RuntimeCall::ToInt32,
                Type::Long => RuntimeCall::ToLong,
                Type::Double => RuntimeCall::ToNumber,
                Type::Undefined | Type::Object => unreachable!("stack types are never undefined"),
            };
            return self.runtime(call);
        }

        self.pop_any("convert")?;
        self.write_instr(Instruction::Convert);
        self.write(from as u8);
        self.write(to as u8);
        self.push(to);
        Ok(())
    }

    pub fn runtime(&mut self, call: RuntimeCall) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        for &param in call.params().iter().rev() {
            self.pop_type("runtime call", param)?;
        }
        self.write_instr(Instruction::Runtime);
        self.write(call as u8);
        if let Some(ret) = call.ret() {
            self.push(ret);
        }
        Ok(())
    }

    pub fn invoke_static(&mut self, id: u16, method: &MethodRef) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        for &param in method.signature.params.iter().rev() {
            self.pop_type("invoke", param)?;
        }
        self.write_instr(Instruction::InvokeStatic);
        self.writew(id);
        self.push(method.signature.ret);
        Ok(())
    }

    /// Pops the scope and pushes a function object for the method at constant `id`
    pub fn new_function(&mut self, id: u16) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        self.pop_type("new function", Type::Object)?;
        self.write_instr(Instruction::NewFunction);
        self.writew(id);
        self.push(Type::Object);
        Ok(())
    }

    pub fn dynamic(&mut self, id: u16, desc: &CallSiteDescriptor) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        for &param in desc.params.iter().rev() {
            self.pop_type("dynamic", param)?;
        }
        self.write_instr(Instruction::Dynamic);
        self.writew(id);
        if let Some(ret) = desc.ret {
            self.push(ret);
        }
        Ok(())
    }

    pub fn array_store(&mut self, ty: Type) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        self.pop_type("array store", ty)?;
        self.pop_type("array store", Type::Int)?;
        self.pop_type("array store", Type::Object)?;
        self.write_instr(Instruction::ArrayStore);
        self.write(ty.stack_type() as u8);
        Ok(())
    }

    /// Records that `shape` flows into `label`
    fn merge_shape(&mut self, label: Label, shape: &[Type]) -> Result<(), CompileError> {
        let info = self.jc.info(label);
        let name = info.name;

        match &info.shape {
            Some(expected) if expected.as_slice() != shape => {
                let expected = expected.clone();
                Err(self.mismatch(name, &expected, shape))
            }
            Some(_) => Ok(()),
            None if info.ip.is_some() => Err(CompileError::DeadLabel {
                function: self.function.clone(),
                location: self.location,
                label: name,
            }),
            None => {
                self.jc.info_mut(label).shape = Some(shape.to_vec());
                Ok(())
            }
        }
    }

    fn jump(&mut self, instr: Instruction, label: Label) -> Result<(), CompileError> {
        let shape = self.stack.clone().unwrap_or_default();
        self.merge_shape(label, &shape)?;
        self.write_instr(instr);
        jump_container::add_jump(&mut self.jc, label, &mut self.buf);
        Ok(())
    }

    pub fn goto(&mut self, label: Label) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        self.jump(Instruction::Goto, label)?;
        self.stack = None;
        Ok(())
    }

    pub fn if_true(&mut self, label: Label) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        self.pop_type("iftrue", Type::Boolean)?;
        self.jump(Instruction::IfTrue, label)
    }

    pub fn if_false(&mut self, label: Label) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        self.pop_type("iffalse", Type::Boolean)?;
        self.jump(Instruction::IfFalse, label)
    }

    /// Binds `label` to the current position.
    ///
    /// If the current position is unreachable the label takes over the shape recorded by the jumps to it.
    /// A label without incoming edges bound at an unreachable position stays dead.
    pub fn label(&mut self, label: Label) -> Result<(), CompileError> {
        let info = self.jc.info(label);
        let name = info.name;
        if info.ip.is_some() {
            return Err(CompileError::LabelRebound {
                function: self.function.clone(),
                location: self.location,
                label: name,
            });
        }
        let recorded = info.shape.clone();

        match (self.stack.take(), recorded) {
            (Some(current), Some(expected)) => {
                if current != expected {
                    return Err(self.mismatch(name, &expected, &current));
                }
                self.stack = Some(current);
            }
            (Some(current), None) => {
                self.jc.info_mut(label).shape = Some(current.clone());
                self.stack = Some(current);
            }
            (None, Some(expected)) => self.stack = Some(expected),
            (None, None) => {}
        }

        jump_container::add_label(&mut self.jc, label, &mut self.buf);
        // control flow merges here, the next statement must record its line again
        self.last_line = None;
        Ok(())
    }

    /// Binds the handler of a try region. The caught value is the only operand on entry.
    pub fn catch_label(&mut self, label: Label) -> Result<(), CompileError> {
        self.jc.info_mut(label).shape.get_or_insert_with(|| vec![Type::Object]);
        self.merge_shape(label, &[Type::Object])?;
        self.label(label)?;
        if self.stack.is_none() {
            self.stack = Some(vec![Type::Object]);
            self.max_stack = self.max_stack.max(1);
        }
        Ok(())
    }

    pub fn table_switch(&mut self, low: i32, high: i32, default: Label, targets: &[Label]) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        debug_assert_eq!(i64::from(high) - i64::from(low) + 1, targets.len() as i64);
        self.pop_type("tableswitch", Type::Int)?;

        let shape = self.stack.clone().unwrap_or_default();
        self.merge_shape(default, &shape)?;
        for &target in targets {
            self.merge_shape(target, &shape)?;
        }

        self.write_instr(Instruction::TableSwitch);
        self.writei(low);
        self.writei(high);
        jump_container::add_jump(&mut self.jc, default, &mut self.buf);
        for &target in targets {
            jump_container::add_jump(&mut self.jc, target, &mut self.buf);
        }
        self.stack = None;
        Ok(())
    }

    pub fn lookup_switch(&mut self, default: Label, pairs: &[(i32, Label)]) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let count = u16::try_from(pairs.len()).map_err(|_| self.limit_exceeded("switch case"))?;
        self.pop_type("lookupswitch", Type::Int)?;

        let mut pairs = pairs.to_vec();
        pairs.sort_by_key(|&(key, _)| key);

        let shape = self.stack.clone().unwrap_or_default();
        self.merge_shape(default, &shape)?;
        for &(_, target) in &pairs {
            self.merge_shape(target, &shape)?;
        }

        self.write_instr(Instruction::LookupSwitch);
        jump_container::add_jump(&mut self.jc, default, &mut self.buf);
        self.writew(count);
        for (key, target) in pairs {
            self.writei(key);
            jump_container::add_jump(&mut self.jc, target, &mut self.buf);
        }
        self.stack = None;
        Ok(())
    }

    pub fn ret(&mut self, ty: Type) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        let expected = self.signature.ret.stack_type();
        if ty.stack_type() != expected {
            return Err(self.operand_type("return", expected, ty.stack_type()));
        }
        self.pop_type("return", expected)?;
        self.write_instr(Instruction::Return);
        self.write(expected as u8);
        self.stack = None;
        Ok(())
    }

    pub fn throw(&mut self) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }
        self.pop_type("throw", Type::Object)?;
        self.write_instr(Instruction::Throw);
        self.stack = None;
        Ok(())
    }

    /// Registers the range between `start` and `end` as protected by `handler`.
    /// Inner regions must be registered before the regions enclosing them.
    pub fn try_region(&mut self, start: Label, end: Label, handler: Label) {
        self.try_regions.push((start, end, handler));
    }

    /// Marks this method as a split sub-unit
    pub fn enter_split(&mut self) {
        self.split = Some(SplitExits::default());
    }

    pub fn is_split(&self) -> bool {
        self.split.is_some()
    }

    /// The continuation code for a jump to `target`
    pub fn register_external_target(&mut self, target: ExternalTarget) -> i32 {
        let exits = self.split.get_or_insert_with(SplitExits::default);
        let index = match exits.targets.iter().position(|t| *t == target) {
            Some(index) => index,
            None => {
                exits.targets.push(target);
                exits.targets.len() - 1
            }
        };
        index as i32 + 1
    }

    pub fn register_return(&mut self) {
        self.split.get_or_insert_with(SplitExits::default).has_return = true;
    }

    pub fn split_exits(&self) -> Option<&SplitExits> {
        self.split.as_ref()
    }

    pub fn finish(self) -> Result<CompiledFunction, CompileError> {
        if self.stack.is_some() {
            return Err(CompileError::MissingReturn { function: self.function });
        }
        if let Some(info) = self.jc.unresolved() {
            return Err(CompileError::UnboundLabel {
                function: self.function.clone(),
                label: info.name,
            });
        }

        let try_regions = self
            .try_regions
            .iter()
            .filter_map(|&(start, end, handler)| {
                let start = self.jc.info(start).ip?;
                let end = self.jc.info(end).ip?;
                let handler = self.jc.info(handler).ip?;
                (start < end).then_some(TryRegion { start, end, handler })
            })
            .collect();

        let max_stack = u16::try_from(self.max_stack).map_err(|_| self.limit_exceeded("operand stack"))?;
        let end = self.buf.len() as u32;
        let locals = self
            .locals
            .into_iter()
            .map(|mut local| {
                local.end = end;
                local
            })
            .collect();

        Ok(CompiledFunction {
            name: self.name,
            kind: self.kind,
            signature: self.signature,
            code: self.buf.into_boxed_slice(),
            slots: self.slots,
            max_stack,
            lines: self.lines,
            locals,
            try_regions,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_labels(n: usize) -> Vec<Label> {
    let mut jc = JumpContainer::new();
    (0..n).map(|_| jc.new_label("test")).collect()
}
