//! Lowering of resolved calls (and the expressions around them) into
//! backend instructions.
//!
//! `Codegen` is split across files by concern, all as `impl` blocks on the
//! same struct: `expr.rs` lowers expressions, `function.rs` lowers whole
//! definitions, and `call/` holds the call pipeline (ABI adapter, argument
//! builder, inliner, single-target emitter, dispatch and block calls).

pub mod call;
pub mod context;
pub mod expr;
pub mod function;
pub mod merge;
pub mod scope;

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::{Location, Program, TargetDef, Type};
use crate::backend::layout::Layout;
use crate::backend::{AbiInfo, AbiSignature, Backend, Constant, IrType, TargetArch, ValueId};
use crate::errors::CodegenError;

use context::CodegenContext;
use merge::ReturnMerge;
use scope::Binding;

pub type Result<T> = std::result::Result<T, CodegenError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    pub target: TargetArch,
    /// Cache ABI classifications per distinct foreign signature.
    pub memoize_abi: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            target: TargetArch::default(),
            memoize_abi: true,
        }
    }
}

/// Result of lowering one call: its value and the type it was produced at.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub value: ValueId,
    pub ty: Type,
}

pub struct Codegen<'p, B: Backend> {
    pub(crate) backend: B,
    program: &'p Program,
    defs: HashMap<&'p str, &'p TargetDef>,
    options: CodegenOptions,
    abi_cache: HashMap<AbiSignature, Rc<AbiInfo>>,
    pub(crate) ctx: CodegenContext,
    merges: Vec<ReturnMerge>,
    closure_count: usize,
    dispatch_count: usize,
}

impl<'p, B: Backend> Codegen<'p, B> {
    pub fn new(program: &'p Program, backend: B, options: CodegenOptions) -> Self {
        let defs = program
            .defs
            .iter()
            .map(|def| (def.name.as_str(), def))
            .collect();
        Self {
            backend,
            program,
            defs,
            options,
            abi_cache: HashMap::new(),
            ctx: CodegenContext::new("", &program.file),
            merges: Vec::new(),
            closure_count: 0,
            dispatch_count: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn options(&self) -> &CodegenOptions {
        &self.options
    }

    pub(crate) fn program(&self) -> &'p Program {
        self.program
    }

    pub(crate) fn layout(&self) -> Layout<'p> {
        Layout::new(&self.program.types)
    }

    pub(crate) fn def(&self, name: &str, loc: Location) -> Result<&'p TargetDef> {
        self.defs
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::ice(loc, format!("unknown target definition `{}`", name)))
    }

    // ── Context save/restore ───────────────────────────────────────

    /// Run `f` under `ctx`, restoring the current context afterwards
    /// whether `f` succeeds or not.
    pub(crate) fn with_context<T>(
        &mut self,
        ctx: CodegenContext,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = std::mem::replace(&mut self.ctx, ctx);
        let result = f(self);
        self.ctx = saved;
        result
    }

    pub(crate) fn with_needs_value<T>(
        &mut self,
        needs_value: bool,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = std::mem::replace(&mut self.ctx.needs_value, needs_value);
        let result = f(self);
        self.ctx.needs_value = saved;
        result
    }

    // ── Join points ────────────────────────────────────────────────

    pub(crate) fn open_merge(&mut self, ty: Type) -> usize {
        let ir_ty = self.value_ir_type(&ty);
        let needs_value = self.ctx.needs_value;
        self.merges.push(ReturnMerge::new(ty, ir_ty, needs_value));
        self.merges.len() - 1
    }

    pub(crate) fn add_to_merge(&mut self, index: usize, value: ValueId, ty: &Type) -> Result<()> {
        let merge = self
            .merges
            .get_mut(index)
            .ok_or_else(|| CodegenError::backend(format!("no join point #{}", index)))?;
        merge.add(&mut self.backend, value, ty)
    }

    /// Close the innermost join point, which must be `index`.
    pub(crate) fn close_merge(&mut self, index: usize) -> Result<Option<ValueId>> {
        if index + 1 != self.merges.len() {
            return Err(CodegenError::backend(format!(
                "join point #{} closed out of order",
                index
            )));
        }
        match self.merges.pop() {
            Some(merge) => merge.close(&mut self.backend),
            None => Err(CodegenError::backend("join point stack is empty")),
        }
    }

    // ── Value representation ───────────────────────────────────────

    pub(crate) fn nil(&mut self) -> ValueId {
        self.backend.constant(Constant::Nil)
    }

    /// IR type of a value of `ty` as it flows through expressions.
    /// Aggregates flow as pointers to their storage.
    pub(crate) fn value_ir_type(&self, ty: &Type) -> IrType {
        if ty.passed_by_value() {
            IrType::Ptr
        } else {
            self.layout().ir_type(ty)
        }
    }

    pub(crate) fn int_constant(&mut self, ty: &Type, value: i64) -> ValueId {
        let bits = match ty {
            Type::Int { bits, .. } => *bits,
            _ => 32,
        };
        self.backend.constant(Constant::Int { bits, value })
    }

    pub(crate) fn type_tag_value(&mut self, ty: &Type, loc: Location) -> Result<ValueId> {
        let tag = self
            .program
            .types
            .type_tag(ty)
            .ok_or_else(|| CodegenError::ice(loc, format!("type `{}` has no runtime tag", ty)))?;
        Ok(self.backend.constant(Constant::TypeTag(tag)))
    }

    /// Representation change from `from` to `to`; a no-op when nothing
    /// needs converting or control already left the block.
    pub(crate) fn coerce(&mut self, value: ValueId, from: &Type, to: &Type) -> Result<ValueId> {
        if from == to
            || self.backend.is_terminated()
            || from.is_no_return()
            || !to.has_value()
            || to.is_nil()
        {
            return Ok(value);
        }
        self.backend.convert(value, from, to)
    }

    pub(crate) fn read_binding(&mut self, binding: &Binding) -> Result<ValueId> {
        match binding {
            Binding::Value { value, .. } => Ok(*value),
            Binding::Slot { ptr, ty } => self.load_slot(*ptr, ty),
        }
    }

    pub(crate) fn load_slot(&mut self, ptr: ValueId, ty: &Type) -> Result<ValueId> {
        if ty.passed_by_value() {
            Ok(ptr)
        } else if ty.is_nil() {
            Ok(self.nil())
        } else {
            let ir = self.layout().ir_type(ty);
            self.backend.load(&ir, ptr)
        }
    }

    pub(crate) fn store_slot(&mut self, value: ValueId, ptr: ValueId, ty: &Type) -> Result<()> {
        if ty.passed_by_value() {
            let layout = self.layout();
            let ir = layout.ir_type(ty);
            let (size, align) = (layout.ir_size(&ir), layout.ir_align(&ir));
            self.backend.copy(ptr, value, size, align)
        } else if ty.is_nil() {
            Ok(())
        } else {
            self.backend.store(value, ptr)
        }
    }

    /// Fresh stack slot for `ty` holding `value`.
    pub(crate) fn spill(&mut self, value: ValueId, ty: &Type, name: &str) -> Result<ValueId> {
        let ir = self.layout().ir_type(ty);
        let slot = self.backend.alloca(&ir, name)?;
        self.store_slot(value, slot, ty)?;
        Ok(slot)
    }

    /// Address of field `name` of the instance at `ptr`.
    pub(crate) fn field_address(
        &mut self,
        owner: &Type,
        ptr: ValueId,
        name: &str,
        loc: Location,
    ) -> Result<(ValueId, Type)> {
        let (index, field) = self.program.types.field_index(owner, name).ok_or_else(|| {
            CodegenError::ice(loc, format!("type `{}` has no field `{}`", owner, name))
        })?;
        let layout = self.layout();
        let (instance, slot) = (layout.instance_ir_type(owner), layout.field_slot(owner, index));
        let address = self.backend.field_ptr(&instance, ptr, slot)?;
        Ok((address, field.ty))
    }

    pub(crate) fn load_field(
        &mut self,
        owner: &Type,
        ptr: ValueId,
        name: &str,
        loc: Location,
    ) -> Result<(ValueId, Type)> {
        let (address, ty) = self.field_address(owner, ptr, name, loc)?;
        let value = self.load_slot(address, &ty)?;
        Ok((value, ty))
    }
}
