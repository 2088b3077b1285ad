mod common;

use callgen::ast::{Block, ExprKind, Param, Program, TargetDef, Type, TypeTable};
use callgen::backend::cfg::{PathWalker, TraceEnd};
use callgen::backend::recording::{Op, RecordingBackend};
use callgen::backend::{Backend, FnDecl, IrType, TargetArch};
use callgen::codegen::{Codegen, CodegenOptions};

use common::*;

fn int_or_string() -> Type {
    Type::Union(vec![int32(), Type::String])
}

/// `show(Int32)` and `show(String)`, each returning its argument.
fn show_defs() -> Vec<TargetDef> {
    vec![
        TargetDef::new("show$Int", Type::Program, vec![Param::new("x", int32())], int32())
            .with_body(var("x", int32())),
        TargetDef::new(
            "show$String",
            Type::Program,
            vec![Param::new("x", Type::String)],
            Type::String,
        )
        .with_body(var("x", Type::String)),
    ]
}

fn dispatch_program() -> Program {
    let mut defs = show_defs();
    let call = call("show", &["show$Int", "show$String"])
        .with_args(vec![var("v", int_or_string())]);
    defs.push(
        TargetDef::new(
            "main",
            Type::Program,
            vec![Param::new("v", int_or_string())],
            int_or_string(),
        )
        .with_body(call_expr(call, int_or_string())),
    );
    program(TypeTable::new(), defs)
}

fn has_type_tests(ops: &[Op]) -> bool {
    ops.iter()
        .any(|op| matches!(op, Op::TypeId { .. } | Op::MatchTypeTag { .. }))
}

#[test]
fn single_candidate_emits_no_type_tests() {
    let mut types = TypeTable::new();
    types.add_class("Foo", None, vec![]);
    let foo = Type::Class("Foo".into());
    let bar = TargetDef::new("Foo#bar", foo.clone(), vec![Param::new("x", int32())], int32())
        .with_body(var("x", int32()));
    let main = TargetDef::new("main", Type::Program, vec![Param::new("f", foo.clone())], int32())
        .with_body(call_expr(
            call("bar", &["Foo#bar"])
                .with_obj(var("f", foo))
                .with_args(vec![int(1)]),
            int32(),
        ));
    let backend = compile(&program(types, vec![bar, main]));

    assert!(!has_type_tests(&ops(&backend, "main")));
    assert_eq!(backend.count_calls(func(&backend, "main"), "Foo#bar"), 1);
}

#[test]
fn guards_follow_candidate_order() {
    let backend = compile(&dispatch_program());
    let trace = PathWalker::new(&backend)
        .assume([Type::String])
        .run(func(&backend, "main"))
        .unwrap();

    assert_eq!(
        trace.guards,
        vec![(int32(), false), (Type::String, true)],
        "String must be the second guard tested"
    );
    assert_eq!(trace.calls, vec!["show$String".to_string()]);
    assert_eq!(trace.end, TraceEnd::Return);
}

#[test]
fn exactly_one_branch_runs_per_input() {
    let backend = compile(&dispatch_program());
    let main = func(&backend, "main");

    let trace = PathWalker::new(&backend).assume([int32()]).run(main).unwrap();
    assert_eq!(trace.guards, vec![(int32(), true)]);
    assert_eq!(trace.calls, vec!["show$Int".to_string()]);

    // Each candidate is called exactly once in the emitted code.
    assert_eq!(backend.count_calls(main, "show$Int"), 1);
    assert_eq!(backend.count_calls(main, "show$String"), 1);
}

#[test]
fn unmatched_input_falls_into_unreachable() {
    let backend = compile(&dispatch_program());
    let trace = PathWalker::new(&backend)
        .assume([Type::Nil])
        .run(func(&backend, "main"))
        .unwrap();
    assert!(trace.calls.is_empty());
    assert_eq!(trace.end, TraceEnd::Unreachable);
}

#[test]
fn dispatch_result_feeds_one_phi() {
    let backend = compile(&dispatch_program());
    let phis: Vec<Op> = ops(&backend, "main")
        .into_iter()
        .filter(|op| matches!(op, Op::Phi { .. }))
        .collect();
    assert_eq!(phis.len(), 1);
    let Op::Phi { ty, incoming } = &phis[0] else {
        unreachable!()
    };
    assert_eq!(*ty, IrType::Ptr);
    assert_eq!(incoming.len(), 2);
}

fn lower_in_scratch_function(program: &Program, body: impl FnOnce(&mut Codegen<'_, RecordingBackend>)) {
    let mut backend = RecordingBackend::new(TargetArch::X86_64, program.types.clone());
    let scratch = backend.declare_function(&FnDecl {
        name: "scratch".into(),
        params: vec![],
        ret: IrType::Void,
        conv: None,
        variadic: false,
    });
    backend.begin_function(scratch).unwrap();
    let mut codegen = Codegen::new(program, backend, CodegenOptions::default());
    body(&mut codegen);
}

#[test]
fn merged_type_is_union_of_candidate_returns() {
    let program = program(TypeTable::new(), show_defs());
    let call = call("show", &["show$Int", "show$String"]).with_args(vec![string("s")]);
    lower_in_scratch_function(&program, |cg| {
        let outcome = cg.lower_call(&call).unwrap();
        assert_eq!(outcome.ty, int_or_string());
    });
}

#[test]
fn block_break_type_widens_merged_type() {
    let program = program(TypeTable::new(), show_defs());
    let block = Block {
        params: vec![],
        body: callgen::ast::Expr::nil(),
        break_ty: Some(Type::Nil),
        captures: vec![],
    };
    let call = call("show", &["show$Int", "show$String"])
        .with_args(vec![string("s")])
        .with_block(block);
    lower_in_scratch_function(&program, |cg| {
        let outcome = cg.lower_call(&call).unwrap();
        assert_eq!(
            outcome.ty,
            Type::Union(vec![int32(), Type::String, Type::Nil])
        );
    });
}

#[test]
fn autocast_literals_are_not_tested() {
    let defs = vec![
        TargetDef::new("inc$i32", Type::Program, vec![Param::new("x", int32())], int32())
            .with_body(var("x", int32())),
        TargetDef::new(
            "inc$i64",
            Type::Program,
            vec![Param::new("x", Type::int(64))],
            Type::int(64),
        )
        .with_body(var("x", Type::int(64))),
        TargetDef::new(
            "main",
            Type::Program,
            vec![],
            Type::Union(vec![int32(), Type::int(64)]),
        )
        .with_body(call_expr(
            call("inc", &["inc$i32", "inc$i64"]).with_args(vec![int(1)]),
            Type::Union(vec![int32(), Type::int(64)]),
        )),
    ];
    let backend = compile(&program(TypeTable::new(), defs));

    assert!(!has_type_tests(&ops(&backend, "main")));
    let trace = PathWalker::new(&backend).run(func(&backend, "main")).unwrap();
    assert_eq!(trace.calls, vec!["inc$i32".to_string()]);
}

fn super_program(is_super: bool) -> Program {
    let mut types = TypeTable::new();
    types.add_class("Animal", None, vec![]);
    types.add_class("Dog", Some("Animal"), vec![]);
    let animal = Type::Class("Animal".into());
    let dog = Type::Class("Dog".into());

    let mut super_call = call("greet", &["Animal#greet$Int", "Animal#greet$String"])
        .with_args(vec![var("v", int_or_string())]);
    super_call.is_super = is_super;

    let defs = vec![
        TargetDef::new(
            "Animal#greet$Int",
            animal.clone(),
            vec![Param::new("x", int32())],
            int32(),
        )
        .with_body(var("x", int32())),
        TargetDef::new(
            "Animal#greet$String",
            animal,
            vec![Param::new("x", Type::String)],
            Type::String,
        )
        .with_body(var("x", Type::String)),
        TargetDef::new(
            "Dog#greet",
            dog,
            vec![Param::new("v", int_or_string())],
            int_or_string(),
        )
        .with_body(call_expr(super_call, int_or_string())),
    ];
    program(types, defs)
}

fn tested_candidates(backend: &RecordingBackend, name: &str) -> Vec<Type> {
    ops(backend, name)
        .into_iter()
        .filter_map(|op| match op {
            Op::MatchTypeTag { candidate, .. } => Some(candidate),
            _ => None,
        })
        .collect()
}

#[test]
fn super_call_skips_receiver_test() {
    let backend = compile(&super_program(true));
    assert_eq!(
        tested_candidates(&backend, "Dog#greet"),
        vec![int32(), Type::String]
    );

    let backend = compile(&super_program(false));
    let candidates = tested_candidates(&backend, "Dog#greet");
    assert_eq!(candidates.len(), 4);
    assert_eq!(candidates[0], Type::Class("Animal".into()));
}

#[test]
fn out_arguments_are_never_tested() {
    let mut defs = vec![
        TargetDef::new(
            "read$Int",
            Type::Program,
            vec![
                Param::new("x", int32()),
                Param::new("slot", Type::pointer(int32())),
            ],
            Type::Nil,
        )
        .foreign("read_int", Default::default()),
        TargetDef::new(
            "read$String",
            Type::Program,
            vec![
                Param::new("x", Type::String),
                Param::new("slot", Type::pointer(int32())),
            ],
            Type::Nil,
        )
        .foreign("read_string", Default::default()),
    ];
    let out = callgen::ast::Expr::new(
        ExprKind::Out(Box::new(var("n", int32()))),
        Type::pointer(int32()),
    );
    defs.push(
        TargetDef::new(
            "main",
            Type::Program,
            vec![Param::new("v", int_or_string())],
            int32(),
        )
        .with_body(seq(vec![
            call_expr(
                call("read", &["read$Int", "read$String"])
                    .with_args(vec![var("v", int_or_string()), out]),
                Type::Nil,
            ),
            var("n", int32()),
        ])),
    );
    let backend = compile(&program(TypeTable::new(), defs));

    assert_eq!(tested_candidates(&backend, "main"), vec![int32(), Type::String]);
    // Both branches write through the same slot, which the caller reads after.
    let slots = allocas(&backend, "main", "n");
    assert_eq!(slots.len(), 1);
    assert_eq!(call_args(&backend, "main", "read_int")[0][1], slots[0]);
    assert_eq!(call_args(&backend, "main", "read_string")[0][1], slots[0]);
}
