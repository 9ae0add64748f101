//! Estimates how much code a subtree lowers to.
//!
//! The weights are relative costs, not byte counts. Bodies of nested functions are not counted
//! because they are compiled into methods of their own.

use ember_middle::ast::{Block, Expr, ExprKind, Literal, Statement, StatementKind, SymbolTable};

use crate::splitter;

const ACCESS: usize = 4;
const ADD: usize = 10;
const BREAK: usize = 1;
const CALL: usize = 10;
const CATCH: usize = 10;
const CONTINUE: usize = 1;
const IF: usize = 2;
const LITERAL: usize = 10;
const LOOP: usize = 4;
const NEW: usize = 6;
const FUNC_EXPR: usize = 20;
const RETURN: usize = 2;
const SPLIT: usize = 40;
/// Invoking a sub-unit and dispatching on the state it leaves
const SPLIT_CALL: usize = CALL + SWITCH;
const SWITCH: usize = 8;
const THROW: usize = 2;
const VAR: usize = 40;
const WITH: usize = 8;

/// Blocks heavier than `budget` are moved into sub-units if their symbols allow it
#[derive(Clone, Copy)]
struct SplitPolicy<'a> {
    budget: usize,
    symbols: &'a SymbolTable,
    /// Whether an enclosing scope record can carry the exit state of a sub-unit
    scoped: bool,
}

/// Walks a subtree summing the weights of its nodes.
///
/// With a split policy, a block that the walker will move into sub-units only counts for the calls
/// it leaves behind.
#[derive(Clone, Copy)]
struct Weigher<'a> {
    split: Option<SplitPolicy<'a>>,
}

impl Weigher<'_> {
    const FULL: Weigher<'static> = Weigher { split: None };

    fn block(self, b: &Block) -> usize {
        let base = if b.needs_scope { SPLIT } else { 0 };
        let mut inner = self;
        if let Some(policy) = &mut inner.split {
            policy.scoped |= b.needs_scope;
            if policy.scoped
                && b.statements.len() > 1
                && Self::FULL.block(b) > policy.budget
                && splitter::is_splittable(b, policy.symbols)
            {
                return base + splitter::chunks(&b.statements, policy.budget).len() * SPLIT_CALL;
            }
        }
        base + b.statements.iter().map(|s| inner.statement(s)).sum::<usize>()
    }

    fn statement(self, s: &Statement) -> usize {
        match &s.kind {
            StatementKind::Expression(e) => expr(e),
            StatementKind::Var(v) => VAR + v.init.as_ref().map_or(0, expr),
            StatementKind::Block(b) => self.block(b),
            StatementKind::If(i) => {
                IF + expr(&i.test) + self.block(&i.pass) + i.fail.as_ref().map_or(0, |b| self.block(b))
            }
            StatementKind::While(w) => LOOP + expr(&w.test) + self.block(&w.body),
            StatementKind::For(f) => {
                LOOP + [&f.init, &f.test, &f.modify]
                    .into_iter()
                    .flatten()
                    .map(expr)
                    .sum::<usize>()
                    + self.block(&f.body)
            }
            StatementKind::ForIn(f) => LOOP + expr(&f.target) + expr(&f.object) + self.block(&f.body),
            StatementKind::Labeled(l) => self.statement(&l.body),
            StatementKind::Break(_) => BREAK,
            StatementKind::Continue(_) => CONTINUE,
            StatementKind::Return(e) => RETURN + e.as_ref().map_or(0, expr),
            StatementKind::Throw(e) => THROW + expr(e),
            StatementKind::Try(t) => {
                self.block(&t.body)
                    + t.catches
                        .iter()
                        .map(|c| CATCH + c.condition.as_ref().map_or(0, expr) + self.block(&c.body))
                        .sum::<usize>()
            }
            StatementKind::Switch(s) => {
                SWITCH
                    + expr(&s.discriminant)
                    + s.cases
                        .iter()
                        .map(|c| {
                            c.test.as_ref().map_or(0, expr) + c.body.iter().map(|s| self.statement(s)).sum::<usize>()
                        })
                        .sum::<usize>()
            }
            StatementKind::With(w) => WITH + expr(&w.object) + self.block(&w.body),
            StatementKind::Empty => 0,
        }
    }
}

pub fn block(b: &Block) -> usize {
    Weigher::FULL.block(b)
}

pub fn statement(s: &Statement) -> usize {
    Weigher::FULL.statement(s)
}

/// The weight of `b` that remains in its own method once every block heavier than `budget` is split.
/// `scoped` tells whether the method already owns a scope record when `b` is entered.
pub fn resident_block(b: &Block, budget: usize, symbols: &SymbolTable, scoped: bool) -> usize {
    let policy = SplitPolicy { budget, symbols, scoped };
    Weigher { split: Some(policy) }.block(b)
}

/// Like [`resident_block`], for the statements of a sub-unit
pub fn resident_statements(statements: &[Statement], budget: usize, symbols: &SymbolTable) -> usize {
    let policy = SplitPolicy {
        budget,
        symbols,
        scoped: true,
    };
    let weigher = Weigher { split: Some(policy) };
    statements.iter().map(|s| weigher.statement(s)).sum()
}

#[cfg(test)]
mod tests {
    use ember_middle::ast::{BinaryOp, Block, BlockId, Expr, FunctionFlags, FunctionId, FunctionNode, Statement, StatementKind};
    use ember_middle::sourcemap::Span;
    use ember_middle::ty::Type;

    use super::*;

    fn block_of(statements: Vec<Statement>) -> Block {
        Block {
            id: BlockId(0),
            symbols: Vec::new(),
            needs_scope: false,
            statements,
        }
    }

    #[test]
    fn nested_function_bodies_are_not_counted() {
        let heavy = block_of(
            (0..100)
                .map(|_| Statement::new(StatementKind::Expression(Expr::int(1)), 1))
                .collect(),
        );
        let function = FunctionNode {
            id: FunctionId(1),
            name: "inner".into(),
            params: Vec::new(),
            body: heavy,
            return_type: Type::Object,
            flags: FunctionFlags::empty(),
            line: 1,
            span: Span::COMPILER_GENERATED,
        };
        let e = Expr::new(ExprKind::Function(Box::new(function)), Type::Object);
        assert_eq!(expr(&e), FUNC_EXPR);
    }

    #[test]
    fn weights_add_up() {
        let sum = Expr::binary(BinaryOp::Add, Expr::int(1), Expr::int(2), Type::Int);
        let b = block_of(vec![
            Statement::new(StatementKind::Expression(sum), 1),
            Statement::new(StatementKind::Return(None), 2),
        ]);
        assert_eq!(block(&b), ADD + 2 * LITERAL + RETURN);
    }

    #[test]
    fn split_blocks_only_leave_their_calls_behind() {
        let sum = || Expr::binary(BinaryOp::Add, Expr::int(1), Expr::int(2), Type::Int);
        let b = block_of(
            (0..4)
                .map(|_| Statement::new(StatementKind::Expression(sum()), 1))
                .collect(),
        );
        let symbols = SymbolTable::default();

        assert_eq!(block(&b), 4 * (ADD + 2 * LITERAL));
        // two chunks of two statements each
        assert_eq!(resident_block(&b, 60, &symbols, true), 2 * SPLIT_CALL);
        // nothing can carry the exit state, so the block stays whole
        assert_eq!(resident_block(&b, 60, &symbols, false), block(&b));
        // light enough to stay whole
        assert_eq!(resident_block(&b, 500, &symbols, true), block(&b));

        let scoped = Block { needs_scope: true, ..b.clone() };
        assert_eq!(resident_block(&scoped, 60, &symbols, false), SPLIT + 2 * SPLIT_CALL);

        let wrapper = block_of(vec![Statement::new(StatementKind::Block(b), 1), Statement::new(StatementKind::Empty, 2)]);
        assert_eq!(resident_statements(&wrapper.statements, 60, &symbols), 2 * SPLIT_CALL);
    }
}
