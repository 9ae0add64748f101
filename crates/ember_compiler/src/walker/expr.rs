use std::sync::Arc;

use ember_middle::ast::{BinaryOp, Expr, ExprKind, FunctionNode, RuntimeRequest, Storage, SymbolFlags, SymbolId, UnaryOp};
use ember_middle::compiler::callsite::{CallSiteFlags, Operation};
use ember_middle::compiler::constant::Constant;
use ember_middle::compiler::instruction::{ArithOp, Condition, RuntimeCall};
use ember_middle::ty::Type;

use super::CodeGenerator;
use crate::emitter::Reserved;
use crate::error::CompileError;
use crate::scope_access::ScopeAccess;

pub(super) fn arith_op(op: BinaryOp) -> Option<ArithOp> {
    Some(match op {
        BinaryOp::Add => ArithOp::Add,
        BinaryOp::Sub => ArithOp::Sub,
        BinaryOp::Mul => ArithOp::Mul,
        BinaryOp::Div => ArithOp::Div,
        BinaryOp::Rem => ArithOp::Rem,
        BinaryOp::BitAnd => ArithOp::BitAnd,
        BinaryOp::BitOr => ArithOp::BitOr,
        BinaryOp::BitXor => ArithOp::BitXor,
        BinaryOp::Shl => ArithOp::Shl,
        BinaryOp::Sar => ArithOp::Sar,
        BinaryOp::Shr => ArithOp::Shr,
        _ => return None,
    })
}

fn condition(op: BinaryOp) -> Option<Condition> {
    Some(match op {
        BinaryOp::Eq => Condition::Eq,
        BinaryOp::Ne => Condition::Ne,
        BinaryOp::StrictEq => Condition::StrictEq,
        BinaryOp::StrictNe => Condition::StrictNe,
        BinaryOp::Lt => Condition::Lt,
        BinaryOp::Le => Condition::Le,
        BinaryOp::Gt => Condition::Gt,
        BinaryOp::Ge => Condition::Ge,
        _ => return None,
    })
}

/// `ty` if it is a number type, double otherwise
pub(super) fn numeric_type(ty: Type) -> Type {
    if ty.is_numeric() { ty } else { Type::Double }
}

/// The type both operands of `op` are converted to when the result has type `ty`
pub(super) fn operand_type(op: ArithOp, ty: Type) -> Type {
    let ty = ty.stack_type();
    match op {
        ArithOp::Shl | ArithOp::Sar | ArithOp::Shr => Type::Int,
        ArithOp::BitAnd | ArithOp::BitOr | ArithOp::BitXor if ty == Type::Long => Type::Long,
        ArithOp::BitAnd | ArithOp::BitOr | ArithOp::BitXor => Type::Int,
        ArithOp::Add if ty == Type::Object => Type::Object,
        _ => numeric_type(ty),
    }
}

/// The type two operands are compared at
fn comparison_type(op: BinaryOp, lhs: Type, rhs: Type) -> Type {
    let (lhs, rhs) = (lhs.stack_type(), rhs.stack_type());
    if lhs == rhs {
        lhs
    } else if matches!(op, BinaryOp::StrictEq | BinaryOp::StrictNe) {
        Type::Object
    } else if lhs.is_primitive() && rhs.is_primitive() {
        lhs.widest(rhs)
    } else {
        Type::Object
    }
}

impl CodeGenerator<'_> {
    pub(super) fn load_as(&mut self, e: &Expr, ty: Type) -> Result<(), CompileError> {
        self.load(e)?;
        self.em().convert(ty)
    }

    /// Pushes the value of `e` at its annotated type
    pub(super) fn load(&mut self, e: &Expr) -> Result<(), CompileError> {
        if !self.is_reachable() {
            return Ok(());
        }

        match &e.kind {
            ExprKind::Literal(lit) => self.literal(lit)?,
            ExprKind::Ident(id) => self.ident(*id, e.ty)?,
            ExprKind::This => self.em().load_reserved(Reserved::This)?,
            ExprKind::Access(base, name) => {
                self.load_as(base, Type::Object)?;
                self.dynamic(
                    Operation::GetProp,
                    Some(name.clone()),
                    &[Type::Object],
                    Some(e.ty),
                    CallSiteFlags::empty(),
                )?;
            }
            ExprKind::Index(base, index) => {
                self.load_as(base, Type::Object)?;
                self.load(index)?;
                self.dynamic(
                    Operation::GetElem,
                    None,
                    &[Type::Object, index.ty],
                    Some(e.ty),
                    CallSiteFlags::empty(),
                )?;
            }
            ExprKind::Call(call) => self.call(call, e.ty)?,
            ExprKind::Unary(op, operand) => self.unary(*op, operand, e.ty)?,
            ExprKind::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, e.ty)?,
            ExprKind::Assign(assign) => self.assign(assign, e.ty, true)?,
            ExprKind::Ternary(test, then, otherwise) => self.ternary(test, then, otherwise, e.ty)?,
            ExprKind::Function(f) => self.function_object(f)?,
            ExprKind::Object(props) => self.object_literal(props)?,
            ExprKind::Runtime(request, args) => self.runtime_request(*request, args)?,
        }

        self.em().convert(e.ty)
    }

    fn ident(&mut self, id: SymbolId, ty: Type) -> Result<(), CompileError> {
        let symbols = self.symbols;
        let sym = &symbols[id];
        if sym.flags.contains(SymbolFlags::ARGUMENTS) {
            return self.em().load_reserved(Reserved::Arguments);
        }

        match sym.storage {
            Storage::Slot | Storage::Param(_) => {
                let slot = self.em().symbol_slot(id, sym)?;
                self.em().load_slot(slot)
            }
            Storage::Scope => {
                let access = ScopeAccess::resolve(sym, &self.lc);
                if access.shares_get(sym, self.config) {
                    return self.shared_get(sym.name.clone(), access, ty);
                }
                self.load_scope()?;
                self.walk_protos(access.depth.max(0) as usize)?;
                self.dynamic(
                    Operation::GetProp,
                    Some(sym.name.clone()),
                    &[Type::Object],
                    Some(ty),
                    access.flags(),
                )
            }
            Storage::Unallocated => {
                self.em().undefined();
                Ok(())
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, ty: Type) -> Result<(), CompileError> {
        match op {
            UnaryOp::Neg => {
                let nt = numeric_type(ty);
                self.load_as(operand, nt)?;
                self.em().neg(nt)
            }
            UnaryOp::Plus => self.load_as(operand, numeric_type(ty)),
            UnaryOp::Not => {
                let truthy = self.em().new_label("not_truthy");
                let done = self.em().new_label("not_done");
                self.load_as(operand, Type::Boolean)?;
                self.em().if_true(truthy)?;
                self.em().boolean(true);
                self.em().goto(done)?;
                self.em().label(truthy)?;
                self.em().boolean(false);
                self.em().label(done)
            }
            UnaryOp::BitNot => {
                self.load_as(operand, Type::Int)?;
                self.em().int(-1);
                self.em().arith(ArithOp::BitXor, Type::Int)
            }
            UnaryOp::Void => {
                self.load(operand)?;
                self.em().pop()?;
                self.em().undefined();
                Ok(())
            }
            UnaryOp::PreIncrement | UnaryOp::PreDecrement | UnaryOp::PostIncrement | UnaryOp::PostDecrement => {
                self.increment(op, operand, ty, true)
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, ty: Type) -> Result<(), CompileError> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let skip = self.em().new_label("logical_skip");
                self.load_as(lhs, ty)?;
                self.em().dup()?;
                self.em().convert(Type::Boolean)?;
                if op == BinaryOp::And {
                    self.em().if_false(skip)?;
                } else {
                    self.em().if_true(skip)?;
                }
                self.em().pop()?;
                self.load_as(rhs, ty)?;
                self.em().label(skip)
            }
            BinaryOp::CommaLeft => {
                self.load_as(lhs, ty)?;
                self.discard(rhs)
            }
            BinaryOp::CommaRight => {
                self.discard(lhs)?;
                self.load_as(rhs, ty)
            }
            _ => {
                if let Some(cond) = condition(op) {
                    let ot = comparison_type(op, lhs.ty, rhs.ty);
                    self.load(lhs)?;
                    let lt = self.em_ref().top().unwrap_or_else(|| lhs.ty.stack_type());
                    self.load_rhs_operand(lt, rhs, ot)?;
                    return self.em().cmp(cond, ot);
                }

                let Some(arith) = arith_op(op) else {
                    unreachable!("`{op}` is neither logical, comparison nor arithmetic")
                };
                let ot = operand_type(arith, ty);
                self.load(lhs)?;
                let lt = self.em_ref().top().unwrap_or_else(|| lhs.ty.stack_type());
                self.load_rhs_operand(lt, rhs, ot)?;
                self.em().arith(arith, ot)
            }
        }
    }

    /// With the left operand of type `lhs` on the stack, pushes `rhs` and converts both to `ot`.
    ///
    /// A conversion that can run user code must not happen before the right operand is evaluated,
    /// so in that case both are converted after the fact.
    pub(super) fn load_rhs_operand(&mut self, lhs: Type, rhs: &Expr, ot: Type) -> Result<(), CompileError> {
        let ot = ot.stack_type();
        if lhs.is_primitive() || !ot.is_primitive() || ot.is_boolean() || rhs.is_local(self.symbols) {
            self.em().convert(ot)?;
            return self.load_as(rhs, ot);
        }

        self.load(rhs)?;
        self.em().swap()?;
        self.em().convert(ot)?;
        self.em().swap()?;
        self.em().convert(ot)
    }

    fn ternary(&mut self, test: &Expr, then: &Expr, otherwise: &Expr, ty: Type) -> Result<(), CompileError> {
        let fail = self.em().new_label("ternary_else");
        let done = self.em().new_label("ternary_done");

        self.load_as(test, Type::Boolean)?;
        self.em().if_false(fail)?;
        self.load_as(then, ty)?;
        self.em().goto(done)?;
        self.em().label(fail)?;
        self.load_as(otherwise, ty)?;
        self.em().label(done)
    }

    /// Creates a function object for `f` that closes over the current scope
    pub(super) fn function_object(&mut self, f: &FunctionNode) -> Result<(), CompileError> {
        let method = self.compile_function(f)?;
        if f.needs_parent_scope() {
            self.load_scope()?;
        } else {
            self.em().null();
        }
        let id = self.add_constant(Constant::Method(method))?;
        self.em().new_function(id)
    }

    fn object_literal(&mut self, props: &[(Arc<str>, Expr)]) -> Result<(), CompileError> {
        self.em().runtime(RuntimeCall::NewObject)?;
        for (name, value) in props {
            self.em().dup()?;
            self.load(value)?;
            self.dynamic(
                Operation::SetProp,
                Some(name.clone()),
                &[Type::Object, value.ty],
                None,
                CallSiteFlags::empty(),
            )?;
        }
        Ok(())
    }

    fn runtime_request(&mut self, request: RuntimeRequest, args: &[Expr]) -> Result<(), CompileError> {
        if args.len() != request.arity() {
            return Err(CompileError::MalformedRuntimeRequest {
                function: self.function_state().name.clone(),
                location: self.em_ref().location(),
                request,
                expected: request.arity(),
                found: args.len(),
            });
        }

        for arg in args {
            self.load_as(arg, Type::Object)?;
        }

        match request {
            RuntimeRequest::Typeof => self.em().runtime(RuntimeCall::Typeof),
            RuntimeRequest::Delete => {
                let strict = self.function_state().strict;
                self.em().boolean(strict);
                self.em().runtime(RuntimeCall::Delete)
            }
            RuntimeRequest::In => self.em().runtime(RuntimeCall::In),
            RuntimeRequest::InstanceOf => self.em().runtime(RuntimeCall::InstanceOf),
        }
    }
}
