#![allow(dead_code)]

use callgen::ast::{Expr, ExprKind, Location, Program, ResolvedCall, TargetDef, Type, TypeTable};
use callgen::backend::recording::{Op, RecordingBackend};
use callgen::backend::{BlockId, Constant, FuncId, ValueId};
use callgen::codegen::CodegenOptions;
use callgen::compiler::Compiler;
use callgen::errors::{CodegenError, ErrorCategory};

pub fn int32() -> Type {
    Type::int(32)
}

pub fn int(n: i64) -> Expr {
    Expr::new(ExprKind::Int(n), int32())
}

pub fn string(s: &str) -> Expr {
    Expr::new(ExprKind::String(s.to_string()), Type::String)
}

pub fn var(name: &str, ty: Type) -> Expr {
    Expr::var(name, ty)
}

pub fn seq(exprs: Vec<Expr>) -> Expr {
    let ty = exprs.last().map(|e| e.ty.clone()).unwrap_or(Type::Nil);
    Expr::new(ExprKind::Seq(exprs), ty)
}

pub fn assign(target: &str, value: Expr) -> Expr {
    let ty = value.ty.clone();
    Expr::new(
        ExprKind::Assign {
            target: target.to_string(),
            value: Box::new(value),
        },
        ty,
    )
}

pub fn call_expr(call: ResolvedCall, ty: Type) -> Expr {
    Expr::call(call, ty)
}

/// Call of `name` resolved to `targets`, at line `line`.
pub fn call(name: &str, targets: &[&str]) -> ResolvedCall {
    ResolvedCall::new(name, targets).at(Location::new(1, 1))
}

pub fn program(types: TypeTable, defs: Vec<TargetDef>) -> Program {
    Program {
        file: "src/app.cr".to_string(),
        types,
        defs,
    }
}

pub fn compile(program: &Program) -> RecordingBackend {
    Compiler::new(CodegenOptions::default())
        .compile_recorded(program)
        .unwrap_or_else(|err| panic!("compilation failed: {:#}", err))
}

pub fn compile_error(program: &Program) -> (ErrorCategory, String) {
    let err = match Compiler::new(CodegenOptions::default()).compile_recorded(program) {
        Ok(backend) => panic!("expected an error, got:\n{}", backend),
        Err(err) => err,
    };
    let ce = err
        .chain()
        .find_map(|e| e.downcast_ref::<CodegenError>())
        .unwrap_or_else(|| panic!("not a codegen error: {:#}", err));
    (ce.category(), ce.message())
}

pub fn func(backend: &RecordingBackend, name: &str) -> FuncId {
    backend
        .function_named(name)
        .unwrap_or_else(|| panic!("no function @{} in:\n{}", name, backend))
}

pub fn ops(backend: &RecordingBackend, name: &str) -> Vec<Op> {
    backend
        .insts(func(backend, name))
        .map(|inst| inst.op.clone())
        .collect()
}

pub fn block_ops(backend: &RecordingBackend, block: BlockId) -> Vec<Op> {
    backend
        .block(block)
        .insts
        .iter()
        .map(|inst| inst.op.clone())
        .collect()
}

/// Argument lists of every call or invoke of `callee` inside `caller`.
pub fn call_args(backend: &RecordingBackend, caller: &str, callee: &str) -> Vec<Vec<ValueId>> {
    ops(backend, caller)
        .into_iter()
        .filter_map(|op| match op {
            Op::Call { func, args, .. } | Op::Invoke { func, args, .. }
                if backend.func_name(func) == callee =>
            {
                Some(args)
            }
            _ => None,
        })
        .collect()
}

/// Results of the allocas named `name` inside `caller`, in order.
pub fn allocas(backend: &RecordingBackend, caller: &str, name: &str) -> Vec<ValueId> {
    backend
        .insts(func(backend, caller))
        .filter(|inst| matches!(&inst.op, Op::Alloca { name: n, .. } if n == name))
        .filter_map(|inst| inst.result)
        .collect()
}

pub fn returned_value(backend: &RecordingBackend, caller: &str) -> ValueId {
    ops(backend, caller)
        .into_iter()
        .find_map(|op| match op {
            Op::Ret(Some(value)) => Some(value),
            _ => None,
        })
        .unwrap_or_else(|| panic!("@{} returns no value:\n{}", caller, backend))
}

pub fn constant(backend: &RecordingBackend, value: ValueId) -> Constant {
    backend
        .constant_of(value)
        .cloned()
        .unwrap_or_else(|| panic!("%{} is not a constant", value.0))
}
