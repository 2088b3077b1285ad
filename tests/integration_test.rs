mod common;

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use callgen::ast::{Field, Param, Program, ResolvedCall, TargetDef, Type, TypeTable};
use callgen::backend::CallConv;
use predicates::prelude::*;
use tempfile::TempDir;

use common::*;

/// `main` prints a string through libc and returns a struct built by C.
fn sample_program() -> Program {
    let mut types = TypeTable::new();
    types.add_struct(
        "Point",
        vec![
            Field {
                name: "x".into(),
                ty: int32(),
            },
            Field {
                name: "y".into(),
                ty: int32(),
            },
        ],
    );
    let point = Type::Struct("Point".into());
    let defs = vec![
        TargetDef::new("puts", Type::Program, vec![Param::new("s", Type::String)], int32())
            .foreign("puts", CallConv::C),
        TargetDef::new("origin", Type::Program, vec![], point.clone())
            .foreign("make_origin", CallConv::C),
        TargetDef::new("main", Type::Program, vec![], point.clone()).with_body(seq(vec![
            call_expr(
                call("puts", &["puts"]).with_args(vec![string("hello")]),
                int32(),
            ),
            call_expr(call("origin", &["origin"]), point),
        ])),
    ];
    program(types, defs)
}

fn write_program(dir: &TempDir, program: &Program) -> PathBuf {
    let path = dir.path().join("program.json");
    let json = serde_json::to_string_pretty(program).expect("program serializes");
    std::fs::write(&path, json).expect("write program");
    path
}

fn run(input: &Path) -> assert_cmd::assert::Assert {
    cargo_bin_cmd!("callgen").arg(input).assert()
}

#[test]
fn prints_recorded_ir() {
    let dir = TempDir::new().unwrap();
    let input = write_program(&dir, &sample_program());

    run(&input)
        .success()
        .stdout(predicate::str::contains("define"))
        .stdout(predicate::str::contains("@main"))
        .stdout(predicate::str::contains("declare"))
        .stdout(predicate::str::contains("@make_origin"));
}

#[test]
fn prints_control_flow_summary() {
    let dir = TempDir::new().unwrap();
    let input = write_program(&dir, &sample_program());

    cargo_bin_cmd!("callgen")
        .arg(&input)
        .args(["--emit", "cfg"])
        .assert()
        .success()
        .stdout(predicate::str::contains("main:"))
        .stdout(predicate::str::contains("entry"));
}

#[test]
fn writes_output_file() {
    let dir = TempDir::new().unwrap();
    let input = write_program(&dir, &sample_program());
    let output = dir.path().join("program.ir");

    cargo_bin_cmd!("callgen")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let text = std::fs::read_to_string(&output).unwrap();
    assert!(text.contains("@main"), "{}", text);
}

#[test]
fn aarch64_target_is_accepted() {
    let dir = TempDir::new().unwrap();
    let input = write_program(&dir, &sample_program());

    cargo_bin_cmd!("callgen")
        .arg(&input)
        .args(["--target", "aarch64", "--no-abi-cache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("@main"));
}

#[test]
fn unresolved_call_reports_internal_error() {
    let dir = TempDir::new().unwrap();
    let broken = program(
        TypeTable::new(),
        vec![TargetDef::new("main", Type::Program, vec![], Type::Nil)
            .with_body(call_expr(ResolvedCall::new("missing", &[]), Type::Nil))],
    );
    let input = write_program(&dir, &broken);

    run(&input)
        .failure()
        .code(1)
        .stderr(predicate::str::contains("InternalError"))
        .stderr(predicate::str::contains("unresolved call to `missing`"))
        .stderr(predicate::str::contains("program.json"));
}

#[test]
fn malformed_input_is_rejected() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("broken.json");
    std::fs::write(&input, "{ \"defs\": 3 }").unwrap();

    run(&input)
        .failure()
        .stderr(predicate::str::contains("broken.json"));
}
