//! The call pipeline.
//!
//! `lower_call` is the entry point: single-candidate calls go straight to
//! the single-target emitter (`emit.rs`), everything else through the
//! dispatch compiler (`dispatch.rs`). Block-carrying calls are handled in
//! `block.rs`, foreign calls in `native.rs`.

mod abi;
mod args;
mod block;
mod dispatch;
mod emit;
mod inline;
mod native;

use crate::ast::{ResolvedCall, Type};
use crate::backend::{Backend, ValueId};
use crate::errors::CodegenError;

use super::{CallOutcome, Codegen, Result};

/// Flat argument list of a uniform-convention call.
#[derive(Debug, Default)]
pub(crate) struct CallArgs {
    pub values: Vec<ValueId>,
    /// Value passed as `self` and the owner type it was converted to.
    pub receiver: Option<(ValueId, Type)>,
}

impl<'p, B: Backend> Codegen<'p, B> {
    /// Lower a resolved call. The outcome carries the type the value was
    /// produced at, which callers convert to the expression type.
    pub fn lower_call(&mut self, call: &ResolvedCall) -> Result<CallOutcome> {
        match call.target_defs.as_slice() {
            [] => Err(CodegenError::ice(
                call.location,
                format!("unresolved call to `{}` reached codegen", call.name),
            )),
            [single] => {
                let def = self.def(single, call.location)?;
                self.lower_single(call, def)
            }
            _ => self.lower_dispatch(call),
        }
    }
}
