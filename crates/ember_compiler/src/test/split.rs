use ember_middle::ast::builder::ProgramBuilder;
use ember_middle::ast::{
    BinaryOp, Expr, IfStatement, Program, Statement, StatementKind, Storage, SymbolFlags, SymbolId, WhileLoop,
};
use ember_middle::compiler::instruction::RuntimeCall;
use ember_middle::compiler::instruction_iter::Op;
use ember_middle::compiler::{CompiledUnit, MethodKind};
use ember_middle::ty::Type;

use super::interp::Value;
use super::{assign, compile, function, ops, program, ret, run, stmt, var};
use crate::Compiler;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::install::{CodeInstaller, InstallError, MemoryInstaller};

/// ```js
/// var total = 0, i = 0;
/// while (true) {
///     i = i + 1;
///     if (i > limit) break;
///     total = total + i;
///     total = total + 0; // eight times
/// }
/// if (total > 100) return 1;
/// total = total * 2;
/// return total;
/// ```
fn split_program(limit: i32) -> Program {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let loop_body = pb.block_id();
    let if_body = pb.block_id();
    let exit_body = pb.block_id();
    let total = pb.declare(body, "total", Storage::Scope, Type::Int, SymbolFlags::VAR);
    let i = pb.declare(body, "i", Storage::Scope, Type::Int, SymbolFlags::VAR);

    let add = |pb: &ProgramBuilder, lhs: SymbolId, rhs: Expr| Expr::binary(BinaryOp::Add, pb.ident(lhs), rhs, Type::Int);

    let mut looped = vec![
        assign(&pb, i, add(&pb, i, Expr::int(1))),
        stmt(StatementKind::If(IfStatement {
            test: Expr::binary(BinaryOp::Gt, pb.ident(i), Expr::int(limit), Type::Boolean),
            pass: pb.block(if_body, false, vec![stmt(StatementKind::Break(None))]),
            fail: None,
        })),
        assign(&pb, total, add(&pb, total, pb.ident(i))),
    ];
    for _ in 0..8 {
        looped.push(assign(&pb, total, add(&pb, total, Expr::int(0))));
    }

    let statements: Vec<Statement> = vec![
        var(total, Expr::int(0)),
        var(i, Expr::int(0)),
        stmt(StatementKind::While(WhileLoop {
            test: Expr::boolean(true),
            body: pb.block(loop_body, false, looped),
            do_while: false,
        })),
        stmt(StatementKind::If(IfStatement {
            test: Expr::binary(BinaryOp::Gt, pb.ident(total), Expr::int(100), Type::Boolean),
            pass: pb.block(exit_body, false, vec![ret(Expr::int(1))]),
            fail: None,
        })),
        assign(&pb, total, Expr::binary(BinaryOp::Mul, pb.ident(total), Expr::int(2), Type::Int)),
        ret(pb.ident(total)),
    ];
    program(pb, body, statements, Type::Int)
}

fn split_units(units: &[CompiledUnit]) -> usize {
    units
        .iter()
        .flat_map(|u| &u.functions)
        .filter(|f| f.kind == MethodKind::SplitUnit)
        .count()
}

fn split_config() -> CompilerConfig {
    CompilerConfig::default().with_method_weight_budget(30)
}

#[test]
fn small_programs_stay_in_one_method() {
    let units = compile(&split_program(5), CompilerConfig::default());
    assert_eq!(split_units(&units), 0);
    assert_eq!(run(&units), Value::Int(30));
}

#[test]
fn split_program_keeps_its_result() {
    for (limit, expected) in [(5, 30), (20, 1), (0, 0)] {
        let whole = compile(&split_program(limit), CompilerConfig::default());
        let split = compile(&split_program(limit), split_config());

        assert!(split_units(&split) >= 2);
        assert_eq!(run(&whole), Value::Int(expected), "limit {limit}");
        assert_eq!(run(&split), Value::Int(expected), "limit {limit}");
    }
}

#[test]
fn caller_reads_and_clears_the_split_state() {
    let units = compile(&split_program(5), split_config());
    let main = ops(function(&units, "main").1);

    let reads = main
        .iter()
        .enumerate()
        .filter(|(_, op)| **op == Op::Runtime(RuntimeCall::GetSplitState))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    assert!(!reads.is_empty());

    // every read is followed by a reset to -1
    for i in reads {
        let reset = &main[i + 1..];
        let position = reset
            .iter()
            .position(|op| *op == Op::Runtime(RuntimeCall::SetSplitState))
            .unwrap();
        assert!(reset[..position].contains(&Op::Int(-1)));
    }
}

#[test]
fn split_units_report_their_exit() {
    let units = compile(&split_program(20), split_config());
    let returns_early = units
        .iter()
        .flat_map(|u| &u.functions)
        .filter(|f| f.kind == MethodKind::SplitUnit)
        .any(|f| {
            let code = ops(f);
            code.windows(2)
                .any(|w| matches!(w, [Op::Int(0), Op::Runtime(RuntimeCall::SetSplitState)]))
        });
    assert!(returns_early);
}

#[test]
fn small_unit_budget_spreads_methods_over_units() {
    let config = split_config().with_unit_weight_budget(60);
    let units = compile(&split_program(5), config);
    assert!(units.len() > 1);
    assert_eq!(run(&units), Value::Int(30));
}

/// Accepts units until `capacity` of them are installed
struct BoundedInstaller {
    inner: MemoryInstaller,
    capacity: usize,
}

impl CodeInstaller for BoundedInstaller {
    type Handle = usize;

    fn install(&mut self, name: &str, unit: &CompiledUnit) -> Result<usize, InstallError> {
        if self.inner.units.len() == self.capacity {
            return Err(InstallError(format!("no room for {name}")));
        }
        self.inner.install(name, unit)
    }

    fn uninstall(&mut self, handle: usize) {
        self.inner.uninstall(handle);
    }
}

#[test]
fn failed_installation_discards_earlier_units() {
    let config = split_config().with_unit_weight_budget(60);
    let mut installer = BoundedInstaller {
        inner: MemoryInstaller::default(),
        capacity: 1,
    };
    let err = Compiler::new(config)
        .compile(&split_program(5), &mut installer)
        .unwrap_err();

    assert!(matches!(err, CompileError::Install { .. }));
    assert!(installer.inner.units.is_empty());
}
