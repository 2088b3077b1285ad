use std::rc::Rc;

use crate::ast::{Block, Type};
use crate::backend::BlockId;

use super::scope::{Binding, Scope};

/// Where a `yield` inside an inlined callee body transfers control.
pub struct YieldTarget {
    pub block: Rc<Block>,
    /// Context of the call site; the block body runs in it.
    pub caller: CodegenContext,
    /// Join point of the call, reached by `break` inside the block.
    pub break_merge: usize,
}

/// Per-position lowering state, threaded through every component.
///
/// Components that temporarily override a field go through
/// `Codegen::with_context`/`Codegen::with_needs_value`, which restore the
/// previous state on every exit path.
#[derive(Clone)]
pub struct CodegenContext {
    pub fn_name: String,
    pub file: Rc<str>,
    pub scope: Rc<Scope>,

    /// Root scope of the native function being emitted. Inlined callees
    /// get a fresh `scope` but keep this one.
    pub function_scope: Rc<Scope>,
    pub self_binding: Option<Binding>,
    pub self_type: Type,

    /// Receiver for implicit calls inside a `with ... yield` block.
    pub with_scope: Option<Binding>,

    /// Whether the value of the expression being lowered is used.
    pub needs_value: bool,

    /// Active exception handlers, innermost last.
    pub handlers: Vec<BlockId>,
    pub yield_target: Option<Rc<YieldTarget>>,
    pub break_merge: Option<usize>,
    pub next_merge: Option<usize>,
}

impl CodegenContext {
    pub fn new(fn_name: &str, file: &str) -> Self {
        let scope = Scope::root();
        Self {
            fn_name: fn_name.to_string(),
            file: Rc::from(file),
            function_scope: Rc::clone(&scope),
            scope,
            self_binding: None,
            self_type: Type::Program,
            with_scope: None,
            needs_value: true,
            handlers: Vec::new(),
            yield_target: None,
            break_merge: None,
            next_merge: None,
        }
    }

    pub fn handler(&self) -> Option<BlockId> {
        self.handlers.last().copied()
    }
}
