use std::sync::Arc;

use ember_middle::ast::builder::ProgramBuilder;
use ember_middle::ast::{
    BinaryOp, BlockId, CallExpr, CatchClause, Expr, ExprKind, ForInLoop, ForLoop, FunctionFlags, FunctionNode,
    IfStatement, LabeledStatement, Literal, Program, Statement, StatementKind, Storage, SwitchCase, SwitchStatement,
    SymbolFlags, SymbolId, TryCatch, WithStatement,
};
use ember_middle::compiler::callsite::{CallSiteFlags, Operation};
use ember_middle::compiler::constant::{Constant, LiteralData, PresetValue};
use ember_middle::compiler::instruction::RuntimeCall;
use ember_middle::compiler::instruction_iter::{DecodeCtxt, Op};
use ember_middle::compiler::{CompiledFunction, CompiledUnit, MethodKind};
use ember_middle::ty::Type;

use super::interp::{Interpreter, Value};
use super::{assign, block, compile, function, ops, program, ret, run, stmt, var};
use crate::Compiler;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::install::{MemoryInstaller, Verifier};
use crate::verify::VerifyError;

fn scope_var(pb: &mut ProgramBuilder, block: BlockId, name: &str, ty: Type) -> SymbolId {
    pb.declare(block, name, Storage::Scope, ty, SymbolFlags::VAR)
}

/// Call site ids of `unit` that read `name` through the scope chain
fn scope_gets(unit: &CompiledUnit, name: &str) -> Vec<u16> {
    (0..unit.call_sites.len() as u16)
        .filter(|&id| {
            let desc = &unit.call_sites[usize::from(id)];
            desc.operation == Operation::GetProp && desc.is_scope() && desc.name.as_deref() == Some(name)
        })
        .collect()
}

/// The number of parent links followed right before the dynamic operation at `index`
fn protos_before(ops: &[Op], index: usize) -> usize {
    ops[..index]
        .iter()
        .rev()
        .take_while(|op| matches!(op, Op::Runtime(RuntimeCall::GetProto)))
        .count()
}

/// `var v0 = 7; { var v1 = 1; { var v2 = 2; { var v3 = 3; return v0; } } }`
fn nested_blocks(depth: usize) -> Program {
    let mut pb = ProgramBuilder::new();
    let ids: Vec<BlockId> = (0..depth).map(|_| pb.block_id()).collect();
    let vars: Vec<SymbolId> = ids
        .iter()
        .enumerate()
        .map(|(i, &b)| scope_var(&mut pb, b, &format!("v{i}"), Type::Int))
        .collect();

    let mut inner = vec![ret(pb.ident(vars[0]))];
    for i in (1..depth).rev() {
        let mut statements = vec![var(vars[i], Expr::int(i as i32))];
        statements.append(&mut inner);
        inner = vec![block(pb.block(ids[i], true, statements))];
    }

    let mut body = vec![var(vars[0], Expr::int(7))];
    body.append(&mut inner);
    program(pb, ids[0], body, Type::Int)
}

#[test]
fn fast_scope_depth_counts_enclosing_blocks() {
    let units = compile(&nested_blocks(4), CompilerConfig::default());
    let (unit, main) = function(&units, "main");
    let ops = ops(main);

    let [site] = scope_gets(unit, "v0")[..] else {
        panic!("expected exactly one read of v0");
    };
    assert!(unit.call_sites[usize::from(site)].is_fast_scope());
    let index = ops.iter().position(|op| *op == Op::Dynamic(site)).unwrap();
    assert_eq!(protos_before(&ops, index), 3);

    assert_eq!(run(&units), Value::Int(7));
}

#[test]
fn with_between_use_and_definition_is_not_fast() {
    let mut pb = ProgramBuilder::new();
    let outer = pb.block_id();
    let inner = pb.block_id();
    let v0 = scope_var(&mut pb, outer, "v0", Type::Int);
    let v1 = scope_var(&mut pb, inner, "v1", Type::Int);

    let with_body = pb.block(inner, true, vec![var(v1, Expr::int(1)), ret(pb.ident(v0))]);
    let with = stmt(StatementKind::With(WithStatement {
        object: Expr::new(ExprKind::Object(Vec::new()), Type::Object),
        body: with_body,
    }));
    let program = program(pb, outer, vec![var(v0, Expr::int(7)), with], Type::Int);

    let units = compile(&program, CompilerConfig::default());
    let (unit, main) = function(&units, "main");
    let ops = ops(main);

    let [site] = scope_gets(unit, "v0")[..] else {
        panic!("expected exactly one read of v0");
    };
    let desc = &unit.call_sites[usize::from(site)];
    assert!(desc.is_scope());
    assert!(!desc.is_fast_scope());
    let index = ops.iter().position(|op| *op == Op::Dynamic(site)).unwrap();
    assert_eq!(protos_before(&ops, index), 0);

    // v1 is declared inside the with body, so it stays fast
    let v1_store = unit
        .call_sites
        .iter()
        .find(|d| d.operation == Operation::SetProp && d.name.as_deref() == Some("v1"))
        .unwrap();
    assert!(v1_store.is_fast_scope());

    assert_eq!(run(&units), Value::Int(7));
}

/// `var t = tag; switch (t) { case keys[i]: return 10 + i; ... default: return -1; }`
fn switch_program(keys: &[i32], tag: i32) -> Program {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let t = scope_var(&mut pb, body, "t", Type::Int);

    let mut cases: Vec<SwitchCase> = keys
        .iter()
        .enumerate()
        .map(|(i, &k)| SwitchCase {
            test: Some(Expr::int(k)),
            body: vec![ret(Expr::int(10 + i as i32))],
        })
        .collect();
    cases.push(SwitchCase {
        test: None,
        body: vec![ret(Expr::int(-1))],
    });

    let switch = stmt(StatementKind::Switch(SwitchStatement {
        discriminant: pb.ident(t),
        cases,
    }));
    program(pb, body, vec![var(t, Expr::int(tag)), switch], Type::Int)
}

#[test]
fn dense_switch_uses_jump_table() {
    let units = compile(&switch_program(&[0, 1, 2, 3, 4], 3), CompilerConfig::default());
    let ops = ops(function(&units, "main").1);
    assert!(ops.iter().any(|op| matches!(op, Op::TableSwitch { low: 0, targets, .. } if targets.len() == 5)));
    assert!(!ops.iter().any(|op| matches!(op, Op::LookupSwitch { .. })));
    assert_eq!(run(&units), Value::Int(13));
}

#[test]
fn sparse_switch_uses_lookup_table() {
    let units = compile(&switch_program(&[0, 1, 2, 3, 100], 100), CompilerConfig::default());
    let ops = ops(function(&units, "main").1);
    assert!(ops.iter().any(|op| matches!(op, Op::LookupSwitch { pairs, .. } if pairs.len() == 5)));
    assert!(!ops.iter().any(|op| matches!(op, Op::TableSwitch { .. })));
    assert_eq!(run(&units), Value::Int(14));

    let units = compile(&switch_program(&[0, 1, 2, 3, 100], 50), CompilerConfig::default());
    assert_eq!(run(&units), Value::Int(-1));
}

/// `var f = function (a) { return a + 1; }; var s = 0; s = s + f(1); ... s = s + f(calls); return s;`
fn calls_program(calls: i32) -> Program {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let fbody = pb.block_id();
    let f = scope_var(&mut pb, body, "f", Type::Object);
    let s = scope_var(&mut pb, body, "s", Type::Int);
    let a = pb.declare(fbody, "a", Storage::Slot, Type::Int, SymbolFlags::PARAM);
    pb.set_use_count(f, calls as u32);

    let fid = pb.function_id();
    let add_one = pb.function(
        fid,
        "f",
        vec![a],
        pb.block(fbody, false, vec![ret(Expr::binary(BinaryOp::Add, pb.ident(a), Expr::int(1), Type::Int))]),
        Type::Int,
        FunctionFlags::empty(),
    );

    let mut statements = vec![
        var(f, Expr::new(ExprKind::Function(Box::new(add_one)), Type::Object)),
        var(s, Expr::int(0)),
    ];
    for i in 1..=calls {
        let call = Expr::call(pb.ident(f), vec![Expr::int(i)], Type::Int);
        let sum = Expr::binary(BinaryOp::Add, pb.ident(s), call, Type::Int);
        statements.push(assign(&pb, s, sum));
    }
    statements.push(ret(pb.ident(s)));
    program(pb, body, statements, Type::Int)
}

#[test]
fn frequent_scope_calls_share_one_stub() {
    let units = compile(&calls_program(5), CompilerConfig::default());
    let (unit, main) = function(&units, "main");

    let stubs: Vec<_> = unit.functions.iter().filter(|f| f.kind == MethodKind::ScopeCall).collect();
    assert_eq!(stubs.len(), 1);
    assert_eq!(scope_gets(unit, "f").len(), 1);

    let invokes = ops(main)
        .into_iter()
        .filter(|op| match op {
            Op::InvokeStatic(id) => unit
                .constant(*id)
                .and_then(Constant::as_method)
                .is_some_and(|m| m.name == stubs[0].name),
            _ => false,
        })
        .count();
    assert_eq!(invokes, 5);

    assert_eq!(run(&units), Value::Int(2 + 3 + 4 + 5 + 6));
}

#[test]
fn rare_scope_calls_look_up_every_time() {
    let units = compile(&calls_program(4), CompilerConfig::default());
    let (unit, main) = function(&units, "main");

    assert!(!unit.functions.iter().any(|f| f.kind == MethodKind::ScopeCall));
    let [site] = scope_gets(unit, "f")[..] else {
        panic!("expected one interned lookup of f");
    };
    let lookups = ops(main).into_iter().filter(|op| *op == Op::Dynamic(site)).count();
    assert_eq!(lookups, 4);

    assert_eq!(run(&units), Value::Int(2 + 3 + 4 + 5));
}

#[test]
fn literals_survive_the_pools() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let d = scope_var(&mut pb, body, "d", Type::Double);
    let big = scope_var(&mut pb, body, "big", Type::Long);
    let s = scope_var(&mut pb, body, "s", Type::Object);

    let text = "a string that goes to the literal pool";
    let nested = Expr::literal(Literal::Array(vec![
        Some(Expr::int(1)),
        Some(Expr::int(2)),
        Some(Expr::literal(Literal::Array(vec![Some(Expr::int(3))]))),
    ]));
    let array = Expr::literal(Literal::Array(vec![
        Some(pb.ident(d)),
        Some(pb.ident(big)),
        Some(pb.ident(s)),
        Some(nested),
        Some(Expr::string("short")),
        None,
    ]));

    let statements = vec![
        var(d, Expr::double(2.5)),
        var(big, Expr::literal(Literal::Long(12_345_678_901))),
        var(s, Expr::string(text)),
        ret(array),
    ];
    let program = program(pb, body, statements, Type::Object);
    let units = compile(&program, CompilerConfig::default().with_large_string_threshold(16));
    let (unit, _) = function(&units, "main");

    assert!(unit.constants.iter().any(|c| *c == Constant::Double(2.5)));
    assert!(unit.constants.iter().any(|c| *c == Constant::Long(12_345_678_901)));
    let preset = unit
        .literals
        .iter()
        .find_map(|l| match l {
            LiteralData::Array(a) if a.values.len() == 6 => Some(a),
            _ => None,
        })
        .unwrap();
    assert_eq!(preset.values[4], PresetValue::String(Arc::from("short")));
    assert_eq!(preset.values[5], PresetValue::Empty);
    assert!(unit.literals.iter().any(|l| *l == LiteralData::String(Arc::from(text))));

    let expected = Value::array([
        Value::Double(2.5),
        Value::Long(12_345_678_901),
        Value::string(text),
        Value::array([Value::Int(1), Value::Int(2), Value::array([Value::Int(3)])]),
        Value::string("short"),
        Value::Undefined,
    ]);
    assert_eq!(run(&units), expected);
}

#[test]
fn instrumentation_flags_reach_every_call_site() {
    let config = CompilerConfig::default().with_call_site_flags(CallSiteFlags::PROFILE | CallSiteFlags::FAST_SCOPE);
    assert_eq!(config.call_site_flags, CallSiteFlags::PROFILE);

    let units = compile(&calls_program(2), config);
    let sites: Vec<_> = units.iter().flat_map(|u| u.call_sites.iter()).collect();
    assert!(!sites.is_empty());
    assert!(sites.iter().all(|d| d.flags.contains(CallSiteFlags::PROFILE)));
}

#[test]
fn generation_is_deterministic() {
    let program = calls_program(6);
    let compiler = Compiler::new(CompilerConfig::default());
    let first = compiler.generate(&program).unwrap();
    let second = compiler.generate(&program).unwrap();
    let fresh = Compiler::new(CompilerConfig::default()).generate(&program).unwrap();

    for other in [&second, &fresh] {
        assert_eq!(first.len(), other.len());
        for (a, b) in first.iter().zip(other.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.constants, b.constants);
            assert_eq!(a.literals, b.literals);
            assert_eq!(a.call_sites, b.call_sites);
            assert_eq!(a.functions.len(), b.functions.len());
            for (f, g) in a.functions.iter().zip(&b.functions) {
                assert_eq!(f.name, g.name);
                assert_eq!(f.code, g.code);
                assert_eq!(f.slots, g.slots);
            }
        }
    }
}

struct RejectAll;

impl Verifier for RejectAll {
    fn verify(&self, unit: &CompiledUnit) -> Result<(), VerifyError> {
        Err(VerifyError::FallsOffEnd {
            function: unit.name.clone(),
            ip: 0,
        })
    }
}

#[test]
fn nothing_is_installed_when_verification_fails() {
    let mut installer = MemoryInstaller::default();
    let err = Compiler::new(CompilerConfig::default())
        .compile_with(&calls_program(1), &RejectAll, &mut installer)
        .unwrap_err();
    assert!(matches!(err, CompileError::Verification { .. }));
    assert!(installer.units.is_empty());
}

#[test]
fn malformed_runtime_request_is_reported_with_its_function() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let request = Expr::new(
        ExprKind::Runtime(ember_middle::ast::RuntimeRequest::In, vec![Expr::int(1)]),
        Type::Boolean,
    );
    let statements: Vec<Statement> = vec![stmt(StatementKind::Expression(request)), ret(Expr::int(0))];
    let program = program(pb, body, statements, Type::Int);

    let err = Compiler::new(CompilerConfig::default()).generate(&program).unwrap_err();
    assert!(matches!(err, CompileError::MalformedRuntimeRequest { expected: 2, found: 1, .. }));
    assert_eq!(err.function(), Some("main"));
}

/// The instructions of `f` starting at byte offset `offset`
fn ops_from(f: &CompiledFunction, offset: u32) -> Vec<Op> {
    DecodeCtxt::new(&f.code)
        .map(|r| r.unwrap())
        .filter(|(at, _)| *at >= offset as usize)
        .map(|(_, op)| op)
        .collect()
}

/// Jumps that pop exactly one scope record right before they branch
fn unwinding_jumps(ops: &[Op]) -> usize {
    ops.windows(4)
        .filter(|w| {
            matches!(w, [Op::LdLocal(a), Op::Runtime(RuntimeCall::GetProto), Op::StoreLocal(b), Op::Goto(_)] if a == b)
        })
        .count()
}

fn function_expr(f: FunctionNode) -> Expr {
    Expr::new(ExprKind::Function(Box::new(f)), Type::Object)
}

fn increment(pb: &ProgramBuilder, symbol: SymbolId) -> Expr {
    Expr::assign(
        pb.ident(symbol),
        Expr::binary(BinaryOp::Add, pb.ident(symbol), Expr::int(1), Type::Int),
    )
}

/// `var s = 0; return (function (a, b) { return a + b; })(7) + (function (a) { return a; })(20, s = 3);`
#[test]
fn immediately_invoked_functions_are_called_directly() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let pad_body = pb.block_id();
    let excess_body = pb.block_id();
    let s = scope_var(&mut pb, body, "s", Type::Int);
    let a = pb.declare(pad_body, "a", Storage::Slot, Type::Int, SymbolFlags::PARAM);
    let b = pb.declare(pad_body, "b", Storage::Slot, Type::Int, SymbolFlags::PARAM);
    let x = pb.declare(excess_body, "a", Storage::Slot, Type::Int, SymbolFlags::PARAM);

    let pad_id = pb.function_id();
    let pad = pb.function(
        pad_id,
        "pad",
        vec![a, b],
        pb.block(pad_body, false, vec![ret(Expr::binary(BinaryOp::Add, pb.ident(a), pb.ident(b), Type::Int))]),
        Type::Int,
        FunctionFlags::empty(),
    );
    let excess_id = pb.function_id();
    let excess = pb.function(
        excess_id,
        "excess",
        vec![x],
        pb.block(excess_body, false, vec![ret(pb.ident(x))]),
        Type::Int,
        FunctionFlags::empty(),
    );

    let padded = Expr::call(function_expr(pad), vec![Expr::int(7)], Type::Int);
    let extra = Expr::call(
        function_expr(excess),
        vec![Expr::int(20), Expr::assign(pb.ident(s), Expr::int(3))],
        Type::Int,
    );
    let statements = vec![
        var(s, Expr::int(0)),
        ret(Expr::binary(BinaryOp::Add, padded, extra, Type::Int)),
    ];
    let program = program(pb, body, statements, Type::Int);

    let units = compile(&program, CompilerConfig::default());
    let (unit, main) = function(&units, "main");
    let ops = ops(main);

    assert!(!ops.iter().any(|op| matches!(op, Op::NewFunction(_))));
    // no function object, the global as `this`, the missing parameter as zero
    assert!(ops.windows(5).any(|w| matches!(
        w,
        [
            Op::Null,
            Op::Runtime(RuntimeCall::GlobalInstance),
            Op::Int(7),
            Op::Int(0),
            Op::InvokeStatic(_)
        ]
    )));

    // the extra argument is still evaluated, after the declared one and before the call
    let first = ops.iter().position(|op| *op == Op::Int(20)).unwrap();
    let invoke = first + ops[first..].iter().position(|op| matches!(op, Op::InvokeStatic(_))).unwrap();
    let Op::InvokeStatic(id) = ops[invoke] else {
        unreachable!()
    };
    assert_eq!(unit.constant(id).and_then(Constant::as_method).unwrap().name.as_ref(), "excess");
    assert!(ops[first..invoke].iter().any(|op| match op {
        Op::Dynamic(site) => {
            let desc = &unit.call_sites[usize::from(*site)];
            desc.operation == Operation::SetProp && desc.name.as_deref() == Some("s")
        }
        _ => false,
    }));

    let mut interp = Interpreter::new(&units);
    assert_eq!(interp.run_main().unwrap(), Value::Int(27));
    assert_eq!(interp.global("s"), Some(Value::Int(3)));
}

/// `var f = function (a, b, c) { return a * 100 + b * 10 + c; }; return f(1, 2, 3);`
#[test]
fn arguments_over_the_limit_travel_as_one_array() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let fbody = pb.block_id();
    let f = scope_var(&mut pb, body, "f", Type::Object);
    let params: Vec<SymbolId> = ["a", "b", "c"]
        .into_iter()
        .map(|name| pb.declare(fbody, name, Storage::Slot, Type::Int, SymbolFlags::PARAM))
        .collect();

    let digits = Expr::binary(
        BinaryOp::Add,
        Expr::binary(
            BinaryOp::Add,
            Expr::binary(BinaryOp::Mul, pb.ident(params[0]), Expr::int(100), Type::Int),
            Expr::binary(BinaryOp::Mul, pb.ident(params[1]), Expr::int(10), Type::Int),
            Type::Int,
        ),
        pb.ident(params[2]),
        Type::Int,
    );
    let fid = pb.function_id();
    let callee = pb.function(
        fid,
        "f",
        params,
        pb.block(fbody, false, vec![ret(digits)]),
        Type::Int,
        FunctionFlags::empty(),
    );

    let call = Expr::call(pb.ident(f), vec![Expr::int(1), Expr::int(2), Expr::int(3)], Type::Int);
    let program = program(pb, body, vec![var(f, function_expr(callee)), ret(call)], Type::Int);

    let units = compile(&program, CompilerConfig::default().with_arg_limit(2));
    let (unit, main) = function(&units, "main");

    let call_site = unit
        .call_sites
        .iter()
        .find(|d| d.operation == Operation::Call)
        .unwrap();
    assert!(call_site.flags.contains(CallSiteFlags::SPREAD_ARGS));
    assert_eq!(call_site.params.len(), 3);
    assert!(call_site.params.iter().all(|&t| t == Type::Object));

    let ops = ops(main);
    assert!(ops.contains(&Op::Runtime(RuntimeCall::NewRawArray)));
    assert!(ops.contains(&Op::Runtime(RuntimeCall::AllocateArray)));
    // the callee keeps its own signature
    assert_eq!(function(&units, "f").1.signature.params.len(), 5);

    assert_eq!(run(&units), Value::Int(123));
}

/// `var eval = function (x) { return x + 1; }; return eval(41);`
#[test]
fn eval_checks_the_callee_before_calling_it() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let fbody = pb.block_id();
    let eval = scope_var(&mut pb, body, "eval", Type::Object);
    let x = pb.declare(fbody, "x", Storage::Slot, Type::Int, SymbolFlags::PARAM);

    let fid = pb.function_id();
    let shadow = pb.function(
        fid,
        "shadow",
        vec![x],
        pb.block(fbody, false, vec![ret(Expr::binary(BinaryOp::Add, pb.ident(x), Expr::int(1), Type::Int))]),
        Type::Int,
        FunctionFlags::empty(),
    );
    let call = Expr::new(
        ExprKind::Call(CallExpr {
            callee: Box::new(pb.ident(eval)),
            args: vec![Expr::int(41)],
            is_new: false,
            is_eval: true,
        }),
        Type::Int,
    );
    let program = program(pb, body, vec![var(eval, function_expr(shadow)), ret(call)], Type::Int);

    let units = compile(&program, CompilerConfig::default());
    let (unit, main) = function(&units, "main");
    let ops = ops(main);

    let check = ops.iter().position(|op| *op == Op::Runtime(RuntimeCall::IsEval)).unwrap();
    assert!(matches!(ops[check + 1], Op::IfFalse(_)));
    let direct = ops.iter().position(|op| *op == Op::Runtime(RuntimeCall::DirectEval)).unwrap();
    assert!(direct > check);

    // the fallback is an ordinary scope call
    let fallback = unit
        .call_sites
        .iter()
        .find(|d| d.operation == Operation::Call)
        .unwrap();
    assert!(fallback.flags.contains(CallSiteFlags::SCOPE));
    let site = ops[direct..]
        .iter()
        .find_map(|op| match op {
            Op::Dynamic(id) if unit.call_sites[usize::from(*id)].operation == Operation::Call => Some(*id),
            _ => None,
        })
        .unwrap();
    assert_eq!(&unit.call_sites[usize::from(site)], fallback);

    assert_eq!(run(&units), Value::Int(42));
}

/// `var v = 1; try { { var w = 2; throw w; } } catch (e) {} return v;`
#[test]
fn throwing_out_of_a_scope_restores_the_enclosing_one() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let try_body = pb.block_id();
    let inner = pb.block_id();
    let catch_body = pb.block_id();
    let v = scope_var(&mut pb, body, "v", Type::Int);
    let w = scope_var(&mut pb, inner, "w", Type::Int);
    let e = pb.declare(catch_body, "e", Storage::Slot, Type::Object, SymbolFlags::VAR);

    let scoped = pb.block(
        inner,
        true,
        vec![var(w, Expr::int(2)), stmt(StatementKind::Throw(pb.ident(w)))],
    );
    let try_catch = stmt(StatementKind::Try(TryCatch {
        body: pb.block(try_body, false, vec![block(scoped)]),
        catches: vec![CatchClause {
            exception: e,
            condition: None,
            body: pb.block(catch_body, false, Vec::new()),
        }],
    }));
    let result = pb.ident(v);
    let program = program(pb, body, vec![var(v, Expr::int(1)), try_catch, ret(result)], Type::Int);

    let units = compile(&program, CompilerConfig::default());
    let (_, main) = function(&units, "main");

    // the innermost region belongs to the scoped block: its handler pops the record and rethrows
    let region = main
        .try_regions
        .iter()
        .min_by_key(|r| r.end - r.start)
        .unwrap();
    let handler = ops_from(main, region.handler);
    assert!(matches!(
        &handler[..4],
        [Op::LdLocal(a), Op::Runtime(RuntimeCall::GetProto), Op::StoreLocal(b), Op::Throw] if a == b
    ));

    assert_eq!(run(&units), Value::Int(1));
}

/// `var r = 0; try { throw 5; } catch (e if false) { r = 1; } catch (e2) { r = 2; } return r;`
#[test]
fn unmatched_conditional_catch_falls_through_to_the_next() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let try_body = pb.block_id();
    let first = pb.block_id();
    let second = pb.block_id();
    let r = scope_var(&mut pb, body, "r", Type::Int);
    let e = scope_var(&mut pb, first, "e", Type::Object);
    let e2 = pb.declare(second, "e2", Storage::Slot, Type::Object, SymbolFlags::VAR);

    let try_catch = stmt(StatementKind::Try(TryCatch {
        body: pb.block(try_body, false, vec![stmt(StatementKind::Throw(Expr::int(5)))]),
        catches: vec![
            CatchClause {
                exception: e,
                condition: Some(Expr::boolean(false)),
                body: pb.block(first, true, vec![assign(&pb, r, Expr::int(1))]),
            },
            CatchClause {
                exception: e2,
                condition: None,
                body: pb.block(second, false, vec![assign(&pb, r, Expr::int(2))]),
            },
        ],
    }));
    let result = pb.ident(r);
    let program = program(pb, body, vec![var(r, Expr::int(0)), try_catch, ret(result)], Type::Int);

    let units = compile(&program, CompilerConfig::default());
    let ops = ops(function(&units, "main").1);

    // a rejected clause pops its own scope record before trying the next one
    assert!(ops.windows(6).any(|w| matches!(
        w,
        [
            Op::False,
            Op::IfTrue(_),
            Op::LdLocal(a),
            Op::Runtime(RuntimeCall::GetProto),
            Op::StoreLocal(b),
            Op::Goto(_)
        ] if a == b
    )));

    assert_eq!(run(&units), Value::Int(2));
}

/// `var s = 2; var t = 3; return s + <rhs>;` with `s` untyped
fn object_sum(rhs: impl FnOnce(&ProgramBuilder, SymbolId) -> Expr) -> Program {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let s = scope_var(&mut pb, body, "s", Type::Object);
    let t = scope_var(&mut pb, body, "t", Type::Int);
    let sum = Expr::binary(BinaryOp::Add, pb.ident(s), rhs(&pb, t), Type::Double);
    program(pb, body, vec![var(s, Expr::int(2)), var(t, Expr::int(3)), ret(sum)], Type::Double)
}

#[test]
fn object_left_operand_converts_after_the_right_is_evaluated() {
    let units = compile(&object_sum(|pb, t| pb.ident(t)), CompilerConfig::default());
    let first = ops(function(&units, "main").1);
    assert!(first.windows(4).any(|w| matches!(
        w,
        [
            Op::Swap,
            Op::Runtime(RuntimeCall::ToNumber),
            Op::Swap,
            Op::Convert(Type::Int, Type::Double)
        ]
    )));
    assert_eq!(run(&units), Value::Double(5.0));

    // a literal right operand cannot observe the conversion
    let units = compile(&object_sum(|_, _| Expr::int(1)), CompilerConfig::default());
    let ops = ops(function(&units, "main").1);
    assert!(!ops.contains(&Op::Swap));
    assert!(ops.contains(&Op::Runtime(RuntimeCall::ToNumber)));
    assert_eq!(run(&units), Value::Double(3.0));
}

/// `var o = {a: 1, b: 2, c: 3}; for (k in o) n = n + 1; for each (v in o) s = s + v; return s * 10 + n;`
#[test]
fn for_in_walks_keys_and_for_each_walks_values() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let keys_body = pb.block_id();
    let values_body = pb.block_id();
    let o = scope_var(&mut pb, body, "o", Type::Object);
    let n = scope_var(&mut pb, body, "n", Type::Int);
    let s = scope_var(&mut pb, body, "s", Type::Int);
    let k = pb.declare(body, "k", Storage::Slot, Type::Object, SymbolFlags::VAR);
    let v = pb.declare(body, "v", Storage::Slot, Type::Int, SymbolFlags::VAR);

    let object = Expr::new(
        ExprKind::Object(vec![
            (Arc::from("a"), Expr::int(1)),
            (Arc::from("b"), Expr::int(2)),
            (Arc::from("c"), Expr::int(3)),
        ]),
        Type::Object,
    );
    let count = Expr::binary(BinaryOp::Add, pb.ident(n), Expr::int(1), Type::Int);
    let keys = stmt(StatementKind::ForIn(ForInLoop {
        target: pb.ident(k),
        object: pb.ident(o),
        body: pb.block(keys_body, false, vec![assign(&pb, n, count)]),
        each: false,
    }));
    let total = Expr::binary(BinaryOp::Add, pb.ident(s), pb.ident(v), Type::Int);
    let values = stmt(StatementKind::ForIn(ForInLoop {
        target: pb.ident(v),
        object: pb.ident(o),
        body: pb.block(values_body, false, vec![assign(&pb, s, total)]),
        each: true,
    }));
    let result = Expr::binary(
        BinaryOp::Add,
        Expr::binary(BinaryOp::Mul, pb.ident(s), Expr::int(10), Type::Int),
        pb.ident(n),
        Type::Int,
    );
    let statements = vec![
        var(o, object),
        var(n, Expr::int(0)),
        var(s, Expr::int(0)),
        keys,
        values,
        ret(result),
    ];
    let program = program(pb, body, statements, Type::Int);

    let units = compile(&program, CompilerConfig::default());
    let ops = ops(function(&units, "main").1);
    let properties = ops.iter().position(|op| *op == Op::Runtime(RuntimeCall::PropertyIterator)).unwrap();
    let values = ops.iter().position(|op| *op == Op::Runtime(RuntimeCall::ValueIterator)).unwrap();
    assert!(properties < values);
    assert_eq!(ops.iter().filter(|op| **op == Op::Runtime(RuntimeCall::HasNext)).count(), 2);
    // each value is narrowed to the slot's type as it is stored
    assert!(ops.windows(2).any(|w| matches!(
        w,
        [Op::Runtime(RuntimeCall::Next), Op::Runtime(RuntimeCall::ToInt32)]
    )));

    assert_eq!(run(&units), Value::Int(63));
}

/// `outer: for (i = 0; i < 3; i++) for (j = 0; j < 3; j++) { var t = j; if (t == 1) continue outer; n++; }`
#[test]
fn labeled_continue_leaves_the_inner_scope() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let outer_body = pb.block_id();
    let inner_body = pb.block_id();
    let skip = pb.block_id();
    let n = scope_var(&mut pb, body, "n", Type::Int);
    let i = pb.declare(body, "i", Storage::Slot, Type::Int, SymbolFlags::VAR);
    let j = pb.declare(body, "j", Storage::Slot, Type::Int, SymbolFlags::VAR);
    let t = scope_var(&mut pb, inner_body, "t", Type::Int);

    let skip_if = stmt(StatementKind::If(IfStatement {
        test: Expr::binary(BinaryOp::Eq, pb.ident(t), Expr::int(1), Type::Boolean),
        pass: pb.block(skip, false, vec![stmt(StatementKind::Continue(Some(Arc::from("outer"))))]),
        fail: None,
    }));
    let count = Expr::binary(BinaryOp::Add, pb.ident(n), Expr::int(1), Type::Int);
    let inner = stmt(StatementKind::For(ForLoop {
        init: Some(Expr::assign(pb.ident(j), Expr::int(0))),
        test: Some(Expr::binary(BinaryOp::Lt, pb.ident(j), Expr::int(3), Type::Boolean)),
        modify: Some(increment(&pb, j)),
        body: pb.block(
            inner_body,
            true,
            vec![var(t, pb.ident(j)), skip_if, assign(&pb, n, count)],
        ),
    }));
    let outer = stmt(StatementKind::For(ForLoop {
        init: Some(Expr::assign(pb.ident(i), Expr::int(0))),
        test: Some(Expr::binary(BinaryOp::Lt, pb.ident(i), Expr::int(3), Type::Boolean)),
        modify: Some(increment(&pb, i)),
        body: pb.block(outer_body, false, vec![inner]),
    }));
    let labeled = stmt(StatementKind::Labeled(LabeledStatement {
        label: Arc::from("outer"),
        body: Box::new(outer),
    }));
    let result = pb.ident(n);
    let program = program(pb, body, vec![var(n, Expr::int(0)), labeled, ret(result)], Type::Int);

    let units = compile(&program, CompilerConfig::default());
    let ops = ops(function(&units, "main").1);
    // the continue and the normal end of the scoped body
    assert_eq!(unwinding_jumps(&ops), 2);

    assert_eq!(run(&units), Value::Int(3));
}

/// `var n = 5; done: { var t = 1; n = t; if (t == 1) break done; n = 2; } return n;`
#[test]
fn labeled_break_leaves_a_scoped_block() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let labeled_body = pb.block_id();
    let leave = pb.block_id();
    let n = scope_var(&mut pb, body, "n", Type::Int);
    let t = scope_var(&mut pb, labeled_body, "t", Type::Int);

    let leave_if = stmt(StatementKind::If(IfStatement {
        test: Expr::binary(BinaryOp::Eq, pb.ident(t), Expr::int(1), Type::Boolean),
        pass: pb.block(leave, false, vec![stmt(StatementKind::Break(Some(Arc::from("done"))))]),
        fail: None,
    }));
    let scoped = pb.block(
        labeled_body,
        true,
        vec![
            var(t, Expr::int(1)),
            assign(&pb, n, pb.ident(t)),
            leave_if,
            assign(&pb, n, Expr::int(2)),
        ],
    );
    let labeled = stmt(StatementKind::Labeled(LabeledStatement {
        label: Arc::from("done"),
        body: Box::new(block(scoped)),
    }));
    let result = pb.ident(n);
    let program = program(pb, body, vec![var(n, Expr::int(5)), labeled, ret(result)], Type::Int);

    let units = compile(&program, CompilerConfig::default());
    let ops = ops(function(&units, "main").1);
    assert_eq!(unwinding_jumps(&ops), 2);

    assert_eq!(run(&units), Value::Int(1));
}

/// `var a = 1; var b = 2; var c = 3; return [a, b, c];`
#[test]
fn computed_array_elements_are_stored_by_sub_units() {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let vars: Vec<SymbolId> = ["a", "b", "c"]
        .into_iter()
        .map(|name| scope_var(&mut pb, body, name, Type::Int))
        .collect();

    let array = Expr::literal(Literal::Array(vars.iter().map(|&v| Some(pb.ident(v))).collect()));
    let mut statements: Vec<Statement> = vars
        .iter()
        .zip(1..)
        .map(|(&v, value)| var(v, Expr::int(value)))
        .collect();
    statements.push(ret(array));
    let program = program(pb, body, statements, Type::Object);

    let units = compile(&program, CompilerConfig::default().with_array_split_threshold(1));
    let (unit, main) = function(&units, "main");

    let array_units: Vec<_> = units
        .iter()
        .flat_map(|u| u.functions.iter())
        .filter(|f| f.kind == MethodKind::ArrayUnit)
        .collect();
    assert_eq!(array_units.len(), 3);
    let calls = ops(main)
        .into_iter()
        .filter(|op| match op {
            Op::InvokeStatic(id) => unit
                .constant(*id)
                .and_then(Constant::as_method)
                .is_some_and(|m| array_units.iter().any(|f| f.name == m.name)),
            _ => false,
        })
        .count();
    assert_eq!(calls, 3);
    assert!(array_units.iter().all(|f| ops(f).contains(&Op::ArrayStore(Type::Int))));

    assert_eq!(run(&units), Value::array([Value::Int(1), Value::Int(2), Value::Int(3)]));
}

/// `return /ab+c/g;`
fn regex_program() -> Program {
    let mut pb = ProgramBuilder::new();
    let body = pb.block_id();
    let regex = Expr::literal(Literal::Regex {
        pattern: Arc::from("ab+c"),
        flags: Arc::from("g"),
    });
    program(pb, body, vec![ret(regex)], Type::Object)
}

#[test]
fn regex_is_built_from_constants_when_the_literal_pool_is_full() {
    let units = compile(&regex_program(), CompilerConfig::default());
    let (unit, main) = function(&units, "main");
    assert_eq!(unit.literals.len(), 1);
    let first = ops(main);
    assert!(first.windows(2).any(|w| matches!(w, [Op::Literal(_), Op::Runtime(RuntimeCall::CopyRegExp)])));
    assert_eq!(run(&units), Value::string("ab+c"));

    let units = compile(&regex_program(), CompilerConfig::default().with_literal_pool_ceiling(0));
    let (unit, main) = function(&units, "main");
    assert!(unit.literals.is_empty());
    assert!(unit.constants.iter().any(|c| *c == Constant::String(Arc::from("g"))));
    let ops = ops(main);
    assert!(ops.contains(&Op::Runtime(RuntimeCall::NewRegExp)));
    assert!(!ops.contains(&Op::Runtime(RuntimeCall::CopyRegExp)));
    assert_eq!(run(&units), Value::string("ab+c"));
}
