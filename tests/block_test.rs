mod common;

use callgen::ast::{Block, BlockParam, Expr, ExprKind, Param, TargetDef, Type, TypeTable};
use callgen::backend::recording::Op;
use callgen::backend::recording::RecordingBackend;
use callgen::backend::{Constant, IrType, ValueId};
use callgen::errors::ErrorCategory;

use common::*;

fn yield_with(args: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Yield { args, scope: None }, Type::Nil)
}

fn block(params: Vec<BlockParam>, body: Expr) -> Block {
    Block {
        params,
        body,
        break_ty: None,
        captures: vec![],
    }
}

fn param(name: &str, ty: Type) -> BlockParam {
    BlockParam {
        name: name.to_string(),
        ty,
    }
}

/// `def once; yield 2; end`
fn once() -> TargetDef {
    TargetDef::new("once", Type::Program, vec![], int32())
        .with_body(Expr::new(
            ExprKind::Yield {
                args: vec![int(2)],
                scope: None,
            },
            int32(),
        ))
}

/// Constants stored into `slot` inside `main`, in order.
fn stores_to(backend: &RecordingBackend, slot: ValueId) -> Vec<Constant> {
    ops(backend, "main")
        .iter()
        .filter_map(|op| match op {
            Op::Store { value, ptr } if *ptr == slot => backend.constant_of(*value).cloned(),
            _ => None,
        })
        .collect()
}

#[test]
fn yielding_definitions_are_never_standalone_functions() {
    let main = TargetDef::new("main", Type::Program, vec![], int32()).with_body(call_expr(
        call("once", &["once"]).with_block(block(vec![param("x", int32())], var("x", int32()))),
        int32(),
    ));
    let backend = compile(&program(TypeTable::new(), vec![once(), main]));
    assert!(backend.function_named("once").is_none());
    assert!(backend.callees(func(&backend, "main")).is_empty());
}

#[test]
fn block_parameter_shadows_outer_variable() {
    // x = 1; once { |x| x }; x
    let main = TargetDef::new("main", Type::Program, vec![], int32()).with_body(seq(vec![
        assign("x", int(1)),
        call_expr(
            call("once", &["once"]).with_block(block(vec![param("x", int32())], var("x", int32()))),
            int32(),
        ),
        var("x", int32()),
    ]));
    let backend = compile(&program(TypeTable::new(), vec![once(), main]));

    let slots = allocas(&backend, "main", "x");
    assert_eq!(slots.len(), 2, "the block parameter gets its own slot");
    let (outer, inner) = (slots[0], slots[1]);

    let ops = ops(&backend, "main");
    assert_eq!(stores_to(&backend, outer), vec![Constant::Int { bits: 32, value: 1 }]);
    assert_eq!(stores_to(&backend, inner), vec![Constant::Int { bits: 32, value: 2 }]);

    // The block body read its own slot; the trailing `x` reads the outer one.
    assert!(ops.contains(&Op::Load {
        ty: IrType::Int(32),
        ptr: inner,
    }));
    let ret = returned_value(&backend, "main");
    assert_eq!(
        backend.defining_op(ret),
        Some(&Op::Load {
            ty: IrType::Int(32),
            ptr: outer,
        })
    );
}

#[test]
fn break_leaves_the_whole_call_with_its_value() {
    // def loop_once; yield; 0; end
    let loop_once = TargetDef::new("loop_once", Type::Program, vec![], int32())
        .with_body(seq(vec![yield_with(vec![]), int(0)]));
    let breaking = Block {
        break_ty: Some(int32()),
        ..block(
            vec![],
            Expr::new(ExprKind::Break(Some(Box::new(int(7)))), Type::NoReturn),
        )
    };
    let main = TargetDef::new("main", Type::Program, vec![], int32()).with_body(call_expr(
        call("loop_once", &["loop_once"]).with_block(breaking),
        int32(),
    ));
    let backend = compile(&program(TypeTable::new(), vec![loop_once, main]));

    let ret = returned_value(&backend, "main");
    let Some(Op::Phi { incoming, .. }) = backend.defining_op(ret) else {
        panic!("expected the call's join point:\n{}", backend);
    };
    assert_eq!(incoming.len(), 1, "the fallthrough path is dead after break");
    assert_eq!(
        constant(&backend, incoming[0].0),
        Constant::Int { bits: 32, value: 7 }
    );
}

#[test]
fn next_leaves_only_the_block() {
    let twice = TargetDef::new("twice", Type::Program, vec![], int32())
        .with_body(Expr::new(ExprKind::Yield { args: vec![], scope: None }, int32()));
    let body = seq(vec![
        Expr::new(ExprKind::Next(Some(Box::new(int(3)))), Type::NoReturn),
        int(4),
    ]);
    let main = TargetDef::new("main", Type::Program, vec![], int32()).with_body(call_expr(
        call("twice", &["twice"]).with_block(block(vec![], body)),
        int32(),
    ));
    let backend = compile(&program(TypeTable::new(), vec![twice, main]));

    let ret = returned_value(&backend, "main");
    let Some(Op::Phi { incoming, .. }) = backend.defining_op(ret) else {
        panic!("expected the call's join point:\n{}", backend);
    };
    let Some(Op::Phi { incoming: inner, .. }) = backend.defining_op(incoming[0].0) else {
        panic!("expected the block's join point:\n{}", backend);
    };
    assert_eq!(inner.len(), 1);
    assert_eq!(
        constant(&backend, inner[0].0),
        Constant::Int { bits: 32, value: 3 }
    );
}

#[test]
fn block_consumed_as_value_becomes_a_closure() {
    let each_cb = TargetDef {
        block_arg: true,
        ..TargetDef::new("each_cb", Type::Program, vec![], Type::Nil)
            .with_body(Expr::new(ExprKind::Nop, Type::Nil))
    };
    let accumulate = Block {
        captures: vec!["total".into()],
        ..block(
            vec![param("i", int32())],
            assign("total", var("i", int32())),
        )
    };
    let main = TargetDef::new("main", Type::Program, vec![], Type::Nil).with_body(seq(vec![
        assign("total", int(0)),
        call_expr(call("each_cb", &["each_cb"]).with_block(accumulate), Type::Nil),
    ]));
    let backend = compile(&program(TypeTable::new(), vec![each_cb, main]));

    let total = allocas(&backend, "main", "total")[0];
    let record = allocas(&backend, "main", "closure_data")[0];
    let args = &call_args(&backend, "main", "each_cb")[0];
    let Some(Op::MakeClosure { func: closure, data }) = backend.defining_op(args[0]) else {
        panic!("expected a closure argument:\n{}", backend);
    };
    assert_eq!(*data, record);
    assert_eq!(backend.func_name(*closure), "main$block0");

    // The record holds the address of `total`.
    let main_ops = ops(&backend, "main");
    assert!(main_ops.iter().any(|op| matches!(
        op,
        Op::Store { value, ptr } if *value == total
            && matches!(backend.defining_op(*ptr), Some(Op::FieldPtr { index: 0, .. }))
    )));

    // Inside the closure, assignments go through the captured pointer.
    let closure_ops = ops(&backend, "main$block0");
    assert!(closure_ops.iter().any(|op| matches!(
        op,
        Op::Store { ptr, .. } if matches!(backend.defining_op(*ptr), Some(Op::Load { ty: IrType::Ptr, .. }))
    )));
    assert_eq!(
        backend.function(*closure).decl.params,
        vec![IrType::Ptr, IrType::Int(32)]
    );
    assert_eq!(
        backend.function(func(&backend, "each_cb")).decl.params,
        vec![IrType::Struct(vec![IrType::Ptr, IrType::Ptr])]
    );
}

#[test]
fn block_parameters_bind_from_yield_arguments_in_order() {
    // def pair; yield 1, 2; end
    let pair = TargetDef::new("pair", Type::Program, vec![], int32()).with_body(Expr::new(
        ExprKind::Yield {
            args: vec![int(1), int(2)],
            scope: None,
        },
        int32(),
    ));
    let main = TargetDef::new("main", Type::Program, vec![], int32()).with_body(call_expr(
        call("pair", &["pair"]).with_block(block(
            vec![param("a", int32()), param("b", int32())],
            var("b", int32()),
        )),
        int32(),
    ));
    let backend = compile(&program(TypeTable::new(), vec![pair, main]));

    let b = allocas(&backend, "main", "b")[0];
    assert_eq!(
        stores_to(&backend, b),
        vec![Constant::Int { bits: 32, value: 2 }]
    );
}

#[test]
fn inlined_callee_formals_bind_from_call_arguments() {
    // def apply(n); yield n; end
    let apply = TargetDef::new("apply", Type::Program, vec![Param::new("n", int32())], int32())
        .with_body(Expr::new(
            ExprKind::Yield {
                args: vec![var("n", int32())],
                scope: None,
            },
            int32(),
        ));
    let main = TargetDef::new("main", Type::Program, vec![], int32()).with_body(call_expr(
        call("apply", &["apply"])
            .with_args(vec![int(5)])
            .with_block(block(vec![param("v", int32())], var("v", int32()))),
        int32(),
    ));
    let backend = compile(&program(TypeTable::new(), vec![apply, main]));

    let n = allocas(&backend, "main", "n")[0];
    assert_eq!(
        stores_to(&backend, n),
        vec![Constant::Int { bits: 32, value: 5 }]
    );
}

#[test]
fn yield_outside_a_block_call_is_an_internal_error() {
    let main = TargetDef::new("main", Type::Program, vec![], Type::Nil)
        .with_body(yield_with(vec![]));
    // `main` yields, so it is inline-only; lower it through a caller without a block.
    let caller = TargetDef::new("caller", Type::Program, vec![], Type::Nil)
        .with_body(call_expr(call("main", &["main"]), Type::Nil));
    let (category, message) = compile_error(&program(TypeTable::new(), vec![main, caller]));
    assert_eq!(category, ErrorCategory::InternalError);
    assert!(message.contains("passes no block"), "{}", message);
}
