use std::sync::Arc;

use ember_middle::ast::{AssignExpr, BinaryOp, Expr, ExprKind, Storage, SymbolFlags, SymbolId, UnaryOp};
use ember_middle::compiler::callsite::{CallSiteFlags, Operation};
use ember_middle::compiler::instruction::ArithOp;
use ember_middle::ty::Type;

use super::CodeGenerator;
use super::expr::{arith_op, numeric_type, operand_type};
use crate::emitter::Reserved;
use crate::error::CompileError;
use crate::scope_access::ScopeAccess;

/// The destination of a store. Whatever the place needs to address its target is already on the stack.
enum Place {
    Slot(u16),
    Arguments,
    /// A property of the scope record on the stack
    Scope { name: Arc<str>, flags: CallSiteFlags },
    /// A named property of the object on the stack
    Property(Arc<str>),
    /// An element of the object on the stack, with a key of the given type above it
    Element(Type),
    /// A symbol without storage
    Discard,
}

impl Place {
    /// Number of operands below the value
    fn depth(&self) -> usize {
        match self {
            Place::Slot(_) | Place::Arguments | Place::Discard => 0,
            Place::Scope { .. } | Place::Property(_) => 1,
            Place::Element(_) => 2,
        }
    }
}

impl CodeGenerator<'_> {
    fn invalid_target(&self) -> CompileError {
        CompileError::InvalidAssignmentTarget {
            function: self.function_state().name.clone(),
            location: self.em_ref().location(),
        }
    }

    fn place(&mut self, target: &Expr) -> Result<Place, CompileError> {
        match &target.kind {
            ExprKind::Ident(id) => self.symbol_place(*id),
            ExprKind::Access(base, name) => {
                self.load_as(base, Type::Object)?;
                Ok(Place::Property(name.clone()))
            }
            ExprKind::Index(base, index) => {
                self.load_as(base, Type::Object)?;
                self.load(index)?;
                Ok(Place::Element(index.ty.stack_type()))
            }
            _ => Err(self.invalid_target()),
        }
    }

    fn symbol_place(&mut self, id: SymbolId) -> Result<Place, CompileError> {
        let symbols = self.symbols;
        let sym = &symbols[id];
        if sym.flags.contains(SymbolFlags::ARGUMENTS) {
            return Ok(Place::Arguments);
        }

        match sym.storage {
            Storage::Slot | Storage::Param(_) => Ok(Place::Slot(self.em().symbol_slot(id, sym)?)),
            Storage::Scope => {
                let access = ScopeAccess::resolve(sym, &self.lc);
                self.load_scope()?;
                self.walk_protos(access.depth.max(0) as usize)?;
                Ok(Place::Scope {
                    name: sym.name.clone(),
                    flags: access.flags(),
                })
            }
            Storage::Unallocated => Ok(Place::Discard),
        }
    }

    /// Pushes the current value of `place`, leaving its operands in place
    fn place_load(&mut self, place: &Place, ty: Type) -> Result<(), CompileError> {
        match place {
            Place::Slot(slot) => self.em().load_slot(*slot),
            Place::Arguments => self.em().load_reserved(Reserved::Arguments),
            Place::Scope { name, flags } => {
                self.em().dup()?;
                self.dynamic(Operation::GetProp, Some(name.clone()), &[Type::Object], Some(ty), *flags)
            }
            Place::Property(name) => {
                self.em().dup()?;
                self.dynamic(
                    Operation::GetProp,
                    Some(name.clone()),
                    &[Type::Object],
                    Some(ty),
                    CallSiteFlags::empty(),
                )
            }
            Place::Element(key) => {
                self.em().dup2()?;
                self.dynamic(Operation::GetElem, None, &[Type::Object, *key], Some(ty), CallSiteFlags::empty())
            }
            Place::Discard => {
                self.em().undefined();
                Ok(())
            }
        }
    }

    fn place_store(&mut self, place: &Place) -> Result<(), CompileError> {
        let Some(top) = self.em_ref().top() else {
            return Ok(());
        };

        match place {
            Place::Slot(slot) => {
                let ty = self.em_ref().slot_type(*slot).unwrap_or(Type::Object);
                self.em().convert(ty)?;
                self.em().store_slot(*slot)
            }
            Place::Arguments => {
                self.em().convert(Type::Object)?;
                self.em().store_reserved(Reserved::Arguments)
            }
            Place::Scope { name, flags } => self.dynamic(
                Operation::SetProp,
                Some(name.clone()),
                &[Type::Object, top],
                None,
                *flags,
            ),
            Place::Property(name) => self.dynamic(
                Operation::SetProp,
                Some(name.clone()),
                &[Type::Object, top],
                None,
                CallSiteFlags::empty(),
            ),
            Place::Element(key) => self.dynamic(
                Operation::SetElem,
                None,
                &[Type::Object, *key, top],
                None,
                CallSiteFlags::empty(),
            ),
            Place::Discard => self.em().pop(),
        }
    }

    /// Copies the value on top of the stack below the operands of `place`
    fn keep_value(&mut self, place: &Place) -> Result<(), CompileError> {
        match place.depth() {
            0 => self.em().dup(),
            1 => self.em().dup_x1(),
            _ => self.em().dup_x2(),
        }
    }

    pub(super) fn assign(&mut self, assign: &AssignExpr, ty: Type, keep: bool) -> Result<(), CompileError> {
        match assign.op {
            None => self.store_to(&assign.target, |g| g.load(&assign.value), keep),
            Some(op) => self.compound(op, &assign.target, &assign.value, ty, keep),
        }
    }

    /// Stores the value pushed by `loader` into `target`, leaving a copy on the stack if `keep` is set
    pub(super) fn store_to<F>(&mut self, target: &Expr, loader: F, keep: bool) -> Result<(), CompileError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        let place = self.place(target)?;
        loader(self)?;
        if keep {
            self.keep_value(&place)?;
        }
        self.place_store(&place)
    }

    pub(super) fn store_symbol<F>(&mut self, id: SymbolId, loader: F) -> Result<(), CompileError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        let place = self.symbol_place(id)?;
        loader(self)?;
        self.place_store(&place)
    }

    fn compound(&mut self, op: BinaryOp, target: &Expr, value: &Expr, ty: Type, keep: bool) -> Result<(), CompileError> {
        let arith = arith_op(op).ok_or_else(|| self.invalid_target())?;
        let place = self.place(target)?;
        self.place_load(&place, target.ty)?;

        let lhs = self.em_ref().top().unwrap_or_else(|| target.ty.stack_type());
        let ot = operand_type(arith, ty);
        self.load_rhs_operand(lhs, value, ot)?;
        self.em().arith(arith, ot)?;
        self.em().convert(ty)?;

        if keep {
            self.keep_value(&place)?;
        }
        self.place_store(&place)
    }

    /// `++x`, `x++`, `--x` and `x--`. The value kept for the postfix forms is the old value converted to a number.
    pub(super) fn increment(&mut self, op: UnaryOp, target: &Expr, ty: Type, keep: bool) -> Result<(), CompileError> {
        let (arith, post) = match op {
            UnaryOp::PreIncrement => (ArithOp::Add, false),
            UnaryOp::PreDecrement => (ArithOp::Sub, false),
            UnaryOp::PostIncrement => (ArithOp::Add, true),
            UnaryOp::PostDecrement => (ArithOp::Sub, true),
            _ => return Err(self.invalid_target()),
        };

        let place = self.place(target)?;
        self.place_load(&place, target.ty)?;
        let ot = numeric_type(ty);
        self.em().convert(ot)?;

        if post && keep {
            self.keep_value(&place)?;
        }
        self.em().int(1);
        self.em().convert(ot)?;
        self.em().arith(arith, ot)?;
        if !post && keep {
            self.keep_value(&place)?;
        }
        self.place_store(&place)
    }
}
