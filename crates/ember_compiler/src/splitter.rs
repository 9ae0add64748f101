//! Partitioning of oversized blocks into sub-units.
//!
//! A block is cut along its top level statements. Each chunk becomes a method of its own that receives the
//! callee, `this`, the current scope record and (if the function needs it) the arguments object.
//! Since nothing else is passed, a chunk can only touch slot-resident symbols it declares itself.

use std::ops::Range;

use ember_middle::ast::{Block, BlockId, Expr, ExprKind, Literal, Statement, StatementKind, SymbolFlags, SymbolId, SymbolTable};
use rustc_hash::FxHashSet;

use crate::weigh;

/// Groups consecutive statements greedily so that no chunk exceeds `budget`, unless a single
/// statement does on its own
pub fn chunks(statements: &[Statement], budget: usize) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut weight = 0;

    for (i, stmt) in statements.iter().enumerate() {
        let w = weigh::statement(stmt);
        if i > start && weight + w > budget {
            chunks.push(start..i);
            start = i;
            weight = 0;
        }
        weight += w;
    }

    if start < statements.len() {
        chunks.push(start..statements.len());
    }

    chunks
}

/// Whether every top level statement of `block` only references slot symbols declared within itself
pub fn is_splittable(block: &Block, symbols: &SymbolTable) -> bool {
    block.statements.iter().all(|stmt| {
        let mut refs = References::default();
        refs.statement(stmt);
        refs.slots.iter().all(|id| {
            let sym = &symbols[*id];
            !sym.is_slot() || sym.flags.contains(SymbolFlags::ARGUMENTS) || refs.blocks.contains(&sym.block)
        })
    })
}

/// Whether `e` can be evaluated in a method that only receives the callee, `this` and the scope record
pub fn is_detached(e: &Expr, symbols: &SymbolTable) -> bool {
    let mut refs = References::default();
    refs.expr(e);
    refs.slots.iter().all(|id| {
        let sym = &symbols[*id];
        !sym.is_slot() && !sym.flags.contains(SymbolFlags::ARGUMENTS)
    })
}

#[derive(Default)]
struct References {
    slots: FxHashSet<SymbolId>,
    blocks: FxHashSet<BlockId>,
}

impl References {
    fn block(&mut self, block: &Block) {
        self.blocks.insert(block.id);
        for stmt in &block.statements {
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: &Statement) {
        match &stmt.kind {
            StatementKind::Expression(e) | StatementKind::Throw(e) => self.expr(e),
            StatementKind::Var(v) => {
                self.slots.insert(v.symbol);
                if let Some(init) = &v.init {
                    self.expr(init);
                }
            }
            StatementKind::Block(b) => self.block(b),
            StatementKind::If(i) => {
                self.expr(&i.test);
                self.block(&i.pass);
                if let Some(fail) = &i.fail {
                    self.block(fail);
                }
            }
            StatementKind::While(w) => {
                self.expr(&w.test);
                self.block(&w.body);
            }
            StatementKind::For(f) => {
                for e in [&f.init, &f.test, &f.modify].into_iter().flatten() {
                    self.expr(e);
                }
                self.block(&f.body);
            }
            StatementKind::ForIn(f) => {
                self.expr(&f.target);
                self.expr(&f.object);
                self.block(&f.body);
            }
            StatementKind::Labeled(l) => self.statement(&l.body),
            StatementKind::Return(e) => {
                if let Some(e) = e {
                    self.expr(e);
                }
            }
            StatementKind::Try(t) => {
                self.block(&t.body);
                for c in &t.catches {
                    self.slots.insert(c.exception);
                    if let Some(cond) = &c.condition {
                        self.expr(cond);
                    }
                    self.block(&c.body);
                }
            }
            StatementKind::Switch(s) => {
                self.expr(&s.discriminant);
                for case in &s.cases {
                    if let Some(test) = &case.test {
                        self.expr(test);
                    }
                    for stmt in &case.body {
                        self.statement(stmt);
                    }
                }
            }
            StatementKind::With(w) => {
                self.expr(&w.object);
                self.block(&w.body);
            }
            StatementKind::Break(_) | StatementKind::Continue(_) | StatementKind::Empty => {}
        }
    }

    fn expr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Ident(id) => {
                self.slots.insert(*id);
            }
            ExprKind::Literal(Literal::Array(elements)) => {
                for e in elements.iter().flatten() {
                    self.expr(e);
                }
            }
            ExprKind::Literal(_) | ExprKind::This | ExprKind::Function(_) => {}
            ExprKind::Access(base, _) | ExprKind::Unary(_, base) => self.expr(base),
            ExprKind::Index(a, b) | ExprKind::Binary(_, a, b) => {
                self.expr(a);
                self.expr(b);
            }
            ExprKind::Call(call) => {
                self.expr(&call.callee);
                for arg in &call.args {
                    self.expr(arg);
                }
            }
            ExprKind::Assign(assign) => {
                self.expr(&assign.target);
                self.expr(&assign.value);
            }
            ExprKind::Ternary(test, then, otherwise) => {
                self.expr(test);
                self.expr(then);
                self.expr(otherwise);
            }
            ExprKind::Object(props) => {
                for (_, value) in props {
                    self.expr(value);
                }
            }
            ExprKind::Runtime(_, args) => {
                for arg in args {
                    self.expr(arg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ember_middle::ast::builder::ProgramBuilder;
    use ember_middle::ast::{Expr, Statement, StatementKind, Storage, SymbolFlags, VarDecl};
    use ember_middle::ty::Type;

    use super::*;

    fn expr_stmt(value: i32) -> Statement {
        Statement::new(StatementKind::Expression(Expr::int(value)), 1)
    }

    #[test]
    fn chunks_are_greedy() {
        // every literal statement weighs 10
        let stmts: Vec<_> = (0..7).map(expr_stmt).collect();
        let chunks = chunks(&stmts, 25);
        assert_eq!(chunks, [0..2, 2..4, 4..6, 6..7]);
    }

    #[test]
    fn oversized_statement_gets_own_chunk() {
        let stmts: Vec<_> = (0..3).map(expr_stmt).collect();
        assert_eq!(chunks(&stmts, 5), [0..1, 1..2, 2..3]);
    }

    #[test]
    fn outer_slot_reference_prevents_split() {
        let mut pb = ProgramBuilder::new();
        let outer = pb.block_id();
        let inner = pb.block_id();
        let x = pb.declare(outer, "x", Storage::Slot, Type::Int, SymbolFlags::VAR);
        let y = pb.declare(inner, "y", Storage::Slot, Type::Int, SymbolFlags::VAR);
        let s = pb.declare(outer, "s", Storage::Scope, Type::Object, SymbolFlags::VAR);

        let uses_inner = pb.block(
            inner,
            false,
            vec![Statement::new(
                StatementKind::Var(VarDecl {
                    symbol: y,
                    init: Some(pb.ident(s)),
                }),
                1,
            )],
        );
        let ok = pb.block(outer, true, vec![Statement::new(StatementKind::Block(uses_inner.clone()), 1)]);
        assert!(is_splittable(&ok, pb.symbols()));

        let bad = Block {
            statements: vec![
                Statement::new(StatementKind::Block(uses_inner), 1),
                Statement::new(StatementKind::Expression(pb.ident(x)), 2),
            ],
            ..ok
        };
        assert!(!is_splittable(&bad, pb.symbols()));
    }
}
