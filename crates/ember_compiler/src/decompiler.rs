use std::fmt;
use std::fmt::Write;

use ember_middle::compiler::CompiledFunction;
use ember_middle::compiler::constant::{Constant, LiteralData};
use ember_middle::compiler::instruction_iter::{DecodeCtxt, DecodeError, Op};

use crate::unit::UnitView;

struct FunctionDecompiler<'buf> {
    function: &'buf CompiledFunction,
    unit: &'buf dyn UnitView,
    out: String,
    /// Offset of the current instruction
    ip: usize,
}

impl<'buf> FunctionDecompiler<'buf> {
    fn new(function: &'buf CompiledFunction, unit: &'buf dyn UnitView) -> Self {
        Self {
            function,
            unit,
            out: format!("function {}{}:\n", function.name, function.signature),
            ip: 0,
        }
    }

    fn handle_opless_instr(&mut self, name: &str) {
        let _ = writeln!(self.out, "{:04x}  {}", self.ip, name);
    }

    fn handle_op_instr(&mut self, name: &str, args: &[&dyn fmt::Display]) {
        let _ = write!(self.out, "{:04x}  {}  ", self.ip, name);
        for (index, arg) in args.iter().enumerate() {
            if index > 0 {
                let _ = write!(self.out, ", ");
            }

            let _ = write!(self.out, "{arg}");
        }
        let _ = self.out.write_char('\n');
    }

    fn constant(&self, id: u16) -> String {
        match self.unit.constant(id) {
            Some(Constant::Long(v)) => format!("{v}L"),
            Some(Constant::Double(v)) => format!("{v:?}"),
            Some(Constant::String(s)) => format!("{s:?}"),
            Some(Constant::Method(m)) => m.to_string(),
            Some(Constant::PropertyMap(names)) => format!("{{{}}}", names.join(", ")),
            None => format!("#{id}?"),
        }
    }

    fn literal(&self, id: u32) -> String {
        match self.unit.literal(id) {
            Some(LiteralData::String(s)) => format!("string({} chars)", s.chars().count()),
            Some(LiteralData::Array(preset)) => format!("array<{}>[{}]", preset.element, preset.values.len()),
            Some(LiteralData::Regex { pattern, flags }) => format!("/{pattern}/{flags}"),
            None => format!("@{id}?"),
        }
    }

    fn run(mut self) -> Result<String, DecodeError> {
        let function = self.function;
        for decoded in DecodeCtxt::new(&function.code) {
            let (ip, op) = decoded?;
            self.ip = ip;

            match op {
                Op::Nop => self.handle_opless_instr("nop"),
                Op::Pop => self.handle_opless_instr("pop"),
                Op::Dup => self.handle_opless_instr("dup"),
                Op::Dup2 => self.handle_opless_instr("dup2"),
                Op::DupX1 => self.handle_opless_instr("dup_x1"),
                Op::DupX2 => self.handle_opless_instr("dup_x2"),
                Op::Swap => self.handle_opless_instr("swap"),
                Op::Undefined => self.handle_opless_instr("undefined"),
                Op::Null => self.handle_opless_instr("null"),
                Op::True => self.handle_opless_instr("true"),
                Op::False => self.handle_opless_instr("false"),
                Op::Int(v) => self.handle_op_instr("int", &[&v]),
                Op::Constant(id) => {
                    let c = self.constant(id);
                    self.handle_op_instr("constant", &[&c]);
                }
                Op::Literal(id) => {
                    let l = self.literal(id);
                    self.handle_op_instr("literal", &[&l]);
                }
                Op::LdLocal(slot) => {
                    let name = self.slot_name(slot);
                    self.handle_op_instr("ldlocal", &[&name]);
                }
                Op::StoreLocal(slot) => {
                    let name = self.slot_name(slot);
                    self.handle_op_instr("storelocal", &[&name]);
                }
                Op::Arith(op, ty) => self.handle_op_instr("arith", &[&op, &ty]),
                Op::Neg(ty) => self.handle_op_instr("neg", &[&ty]),
                Op::Cmp(cond, ty) => self.handle_op_instr("cmp", &[&cond, &ty]),
                Op::Convert(from, to) => self.handle_op_instr("convert", &[&from, &to]),
                Op::Goto(t) => self.handle_op_instr("goto", &[&Target(t)]),
                Op::IfTrue(t) => self.handle_op_instr("iftrue", &[&Target(t)]),
                Op::IfFalse(t) => self.handle_op_instr("iffalse", &[&Target(t)]),
                Op::TableSwitch { low, default, targets } => {
                    let cases = targets
                        .iter()
                        .enumerate()
                        .map(|(i, t)| format!("{}: {}", i64::from(low) + i as i64, Target(*t)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.handle_op_instr("tableswitch", &[&cases, &format!("default: {}", Target(default))]);
                }
                Op::LookupSwitch { default, pairs } => {
                    let cases = pairs
                        .iter()
                        .map(|(k, t)| format!("{k}: {}", Target(*t)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.handle_op_instr("lookupswitch", &[&cases, &format!("default: {}", Target(default))]);
                }
                Op::Return(ty) => self.handle_op_instr("return", &[&ty]),
                Op::Throw => self.handle_opless_instr("throw"),
                Op::Runtime(call) => self.handle_op_instr("runtime", &[&call]),
                Op::InvokeStatic(id) => {
                    let c = self.constant(id);
                    self.handle_op_instr("invokestatic", &[&c]);
                }
                Op::NewFunction(id) => {
                    let c = self.constant(id);
                    self.handle_op_instr("newfunction", &[&c]);
                }
                Op::Dynamic(id) => {
                    let desc = match self.unit.call_site(id) {
                        Some(desc) => desc.to_string(),
                        None => format!("#{id}?"),
                    };
                    self.handle_op_instr("dynamic", &[&desc]);
                }
                Op::ArrayStore(ty) => self.handle_op_instr("arraystore", &[&ty]),
            }
        }

        for region in &function.try_regions {
            let _ = writeln!(
                self.out,
                "try {:04x}..{:04x} -> {:04x}",
                region.start, region.end, region.handler
            );
        }

        Ok(self.out)
    }

    fn slot_name(&self, slot: u16) -> String {
        match self.function.locals.iter().find(|l| l.slot == slot) {
            Some(local) => format!("{slot} ({})", local.name),
            None => slot.to_string(),
        }
    }
}

struct Target(u32);

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Renders a compiled function as a textual instruction trace
pub fn disassemble(function: &CompiledFunction, unit: &dyn UnitView) -> Result<String, DecodeError> {
    FunctionDecompiler::new(function, unit).run()
}
