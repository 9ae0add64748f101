use ember_middle::ast::builder::ProgramBuilder;
use ember_middle::ast::{
    AssignExpr, Block, BlockId, Expr, ExprKind, FunctionFlags, Program, Statement, StatementKind, SymbolId, VarDecl,
};
use ember_middle::compiler::instruction_iter::{DecodeCtxt, Op};
use ember_middle::compiler::{CompiledFunction, CompiledUnit};
use ember_middle::ty::Type;

use crate::Compiler;
use crate::config::CompilerConfig;
use crate::install::MemoryInstaller;

use self::interp::{Interpreter, Value};

mod codegen;
mod split;

fn stmt(kind: StatementKind) -> Statement {
    Statement::new(kind, 1)
}

fn var(symbol: SymbolId, init: Expr) -> Statement {
    stmt(StatementKind::Var(VarDecl {
        symbol,
        init: Some(init),
    }))
}

fn ret(e: Expr) -> Statement {
    stmt(StatementKind::Return(Some(e)))
}

fn block(b: Block) -> Statement {
    stmt(StatementKind::Block(b))
}

/// `symbol = value;`
fn assign(pb: &ProgramBuilder, symbol: SymbolId, value: Expr) -> Statement {
    let target = pb.ident(symbol);
    let ty = target.ty;
    stmt(StatementKind::Expression(Expr::new(
        ExprKind::Assign(AssignExpr {
            op: None,
            target: Box::new(target),
            value: Box::new(value),
        }),
        ty,
    )))
}

/// A script whose top level is `statements`, with the symbols declared for `body` in its scope record
fn program(mut pb: ProgramBuilder, body: BlockId, statements: Vec<Statement>, ret: Type) -> Program {
    let main_id = pb.function_id();
    let body = pb.block(body, true, statements);
    let main = pb.function(main_id, "main", Vec::new(), body, ret, FunctionFlags::IS_PROGRAM);
    pb.finish("test.js", main)
}

/// Generates, verifies and installs `program`
fn compile(program: &Program, config: CompilerConfig) -> Vec<CompiledUnit> {
    let mut installer = MemoryInstaller::default();
    Compiler::new(config).compile(program, &mut installer).unwrap();
    installer.units
}

fn run(units: &[CompiledUnit]) -> Value {
    Interpreter::new(units).run_main().unwrap()
}

fn ops(f: &CompiledFunction) -> Vec<Op> {
    DecodeCtxt::new(&f.code)
        .map(|r| r.map(|(_, op)| op))
        .collect::<Result<_, _>>()
        .unwrap()
}

fn function<'a>(units: &'a [CompiledUnit], name: &str) -> (&'a CompiledUnit, &'a CompiledFunction) {
    units
        .iter()
        .find_map(|u| u.function(name).map(|f| (u, f)))
        .unwrap_or_else(|| panic!("no function `{name}`"))
}
