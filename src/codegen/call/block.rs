//! Calls carrying a block: inlined `yield` bodies and blocks materialised
//! as closures.

use std::rc::Rc;

use crate::ast::{Block, Expr, Location, ResolvedCall, TargetDef, Type};
use crate::backend::{Backend, Constant, FnDecl, IrType, ValueId};
use crate::errors::CodegenError;

use super::super::context::{CodegenContext, YieldTarget};
use super::super::scope::{Binding, Scope};
use super::super::{CallOutcome, Codegen, Result};

impl<'p, B: Backend> Codegen<'p, B> {
    /// Inline the target body at the call site. `yield` inside it runs the
    /// block in the caller's context; `break` inside the block leaves the
    /// whole call through its join point.
    pub(crate) fn lower_inlined_block_call(
        &mut self,
        call: &ResolvedCall,
        def: &'p TargetDef,
    ) -> Result<CallOutcome> {
        let (Some(block), Some(body)) = (&call.block, &def.body) else {
            return Err(CodegenError::ice(
                call.location,
                format!("`{}` cannot inline a block: no block or no body", def.name),
            ));
        };
        if def.is_foreign() {
            return Err(CodegenError::ice(
                call.location,
                format!("foreign function `{}` called with a block", def.name),
            ));
        }
        log::debug!("inlining {} with its block", def.name);

        let args = self.build_uniform_args(call, def)?;
        let ty = Type::merge([def.ret.clone()].into_iter().chain(block.break_ty.clone()));
        let merge = self.open_merge(ty.clone());

        let mut callee = CodegenContext::new(&self.ctx.fn_name, &self.program().file);
        callee.needs_value = self.ctx.needs_value;
        callee.handlers = self.ctx.handlers.clone();
        callee.self_type = def.owner.clone();
        callee.function_scope = Rc::clone(&self.ctx.function_scope);
        callee.yield_target = Some(Rc::new(YieldTarget {
            block: Rc::new(block.clone()),
            caller: self.ctx.clone(),
            break_merge: merge,
        }));

        let mut values = args.values.iter().copied();
        if let Some((value, owner)) = &args.receiver {
            values.next();
            callee.self_binding = Some(Binding::Value {
                value: *value,
                ty: owner.clone(),
            });
        }
        self.with_context(callee, |cg| {
            let fixed = def.fixed_arity();
            for param in &def.params[..fixed] {
                cg.bind_param(&param.name, &param.ty, values.next(), def.primitive, call.location)?;
            }
            for special in &def.special_vars {
                let ptr = values.next().ok_or_else(|| {
                    CodegenError::ice(call.location, "special variable missing from arguments")
                })?;
                cg.ctx.scope.declare(
                    &special.name,
                    Binding::Slot {
                        ptr,
                        ty: special.ty.clone(),
                    },
                );
            }
            for param in &def.params[fixed..] {
                cg.bind_param(&param.name, &param.ty, values.next(), def.primitive, call.location)?;
            }
            let value = cg.lower_expr(body)?;
            cg.add_to_merge(merge, value, &body.ty)
        })?;

        let value = match self.close_merge(merge)? {
            Some(value) => value,
            None => self.nil(),
        };
        let ty = if self.backend.is_terminated() {
            Type::NoReturn
        } else {
            ty
        };
        Ok(CallOutcome { value, ty })
    }

    /// Bind a formal of an inlined or lowered definition to a stack slot
    /// holding its argument value.
    pub(crate) fn bind_param(
        &mut self,
        name: &str,
        ty: &Type,
        value: Option<ValueId>,
        primitive: bool,
        loc: Location,
    ) -> Result<()> {
        let value = value.ok_or_else(|| {
            CodegenError::ice(loc, format!("no argument value for parameter `{}`", name))
        })?;
        let binding = if ty.passed_by_value() && primitive {
            Binding::Value {
                value,
                ty: ty.clone(),
            }
        } else {
            let ir = self.layout().ir_type(ty);
            let slot = self.backend.alloca(&ir, name)?;
            if !ty.is_nil() {
                self.backend.store(value, slot)?;
            }
            Binding::Slot {
                ptr: slot,
                ty: ty.clone(),
            }
        };
        self.ctx.scope.declare(name, binding);
        Ok(())
    }

    /// Run the block of the innermost inlined call. Returns the block's
    /// value together with its type.
    pub(crate) fn lower_yield(
        &mut self,
        args: &[Expr],
        scope: Option<&Expr>,
        loc: Location,
    ) -> Result<(ValueId, Type)> {
        let target = self
            .ctx
            .yield_target
            .clone()
            .ok_or_else(|| CodegenError::ice(loc, "`yield` outside of a block call"))?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.with_needs_value(true, |cg| cg.lower_expr(arg))?;
            values.push((value, arg.ty.clone()));
        }
        let with_scope = match scope {
            Some(expr) => {
                let value = self.with_needs_value(true, |cg| cg.lower_expr(expr))?;
                Some(Binding::Value {
                    value,
                    ty: expr.ty.clone(),
                })
            }
            None => None,
        };

        let block = Rc::clone(&target.block);
        let mut ctx = target.caller.clone();
        ctx.scope = Scope::child(&target.caller.scope);
        ctx.handlers = self.ctx.handlers.clone();
        ctx.needs_value = self.ctx.needs_value;
        ctx.break_merge = Some(target.break_merge);
        if with_scope.is_some() {
            ctx.with_scope = with_scope;
        }

        self.with_context(ctx, |cg| {
            for (index, param) in block.params.iter().enumerate() {
                let (value, ty) = match values.get(index) {
                    Some((value, ty)) => (*value, ty.clone()),
                    None => (cg.nil(), Type::Nil),
                };
                let value = cg.coerce(value, &ty, &param.ty)?;
                // Declared in the block's own scope: shadows, never reuses,
                // an outer variable of the same name.
                let slot = cg.spill(value, &param.ty, &param.name)?;
                cg.ctx.scope.declare(
                    &param.name,
                    Binding::Slot {
                        ptr: slot,
                        ty: param.ty.clone(),
                    },
                );
            }

            let next = cg.open_merge(block.body.ty.clone());
            cg.ctx.next_merge = Some(next);
            let value = cg.lower_expr(&block.body)?;
            cg.add_to_merge(next, value, &block.body.ty)?;
            match cg.close_merge(next)? {
                Some(value) => Ok((value, block.body.ty.clone())),
                None => Ok((cg.nil(), Type::NoReturn)),
            }
        })
    }

    /// `break` / `next`: leave through the given join point.
    pub(crate) fn lower_jump(
        &mut self,
        merge: Option<usize>,
        value: Option<&Expr>,
        keyword: &str,
        loc: Location,
    ) -> Result<ValueId> {
        let merge = merge
            .ok_or_else(|| CodegenError::ice(loc, format!("`{}` outside of a block", keyword)))?;
        let (value, ty) = match value {
            Some(expr) => {
                let value = self.with_needs_value(true, |cg| cg.lower_expr(expr))?;
                (value, expr.ty.clone())
            }
            None => (self.nil(), Type::Nil),
        };
        self.add_to_merge(merge, value, &ty)?;
        Ok(self.nil())
    }

    /// Compile `block` into its own function and return a callable value
    /// pairing it with a record of the captured variables.
    pub(crate) fn materialize_block(&mut self, block: &Block) -> Result<ValueId> {
        let name = format!("{}$block{}", self.ctx.fn_name, self.closure_count);
        self.closure_count += 1;
        let loc = block.body.loc;

        // Record layout: one pointer per captured slot, then `self`.
        let mut fields = Vec::new();
        let mut captured = Vec::new();
        for var in &block.captures {
            let binding = self.ctx.scope.lookup(var).ok_or_else(|| {
                CodegenError::ice(loc, format!("captured variable `{}` is not in scope", var))
            })?;
            let (ptr, ty) = match binding {
                Binding::Slot { ptr, ty } => (ptr, ty),
                Binding::Value { value, ty } => (self.spill(value, &ty, var)?, ty),
            };
            fields.push(IrType::Ptr);
            captured.push((var.clone(), ptr, ty));
        }
        let self_capture = match self.ctx.self_binding.clone() {
            Some(binding) if binding.ty().has_value() => {
                let value = self.read_binding(&binding)?;
                let ty = binding.ty().clone();
                fields.push(self.value_ir_type(&ty));
                Some((value, ty))
            }
            _ => None,
        };
        let record_ty = IrType::Struct(fields);

        let data = if captured.is_empty() && self_capture.is_none() {
            self.backend.constant(Constant::Null)
        } else {
            let record = self.backend.alloca(&record_ty, "closure_data")?;
            for (index, (_, ptr, _)) in captured.iter().enumerate() {
                let field = self.backend.field_ptr(&record_ty, record, index as u32)?;
                self.backend.store(*ptr, field)?;
            }
            if let Some((value, _)) = &self_capture {
                let field = self
                    .backend
                    .field_ptr(&record_ty, record, captured.len() as u32)?;
                self.backend.store(*value, field)?;
            }
            record
        };

        let layout = self.layout();
        let mut params = vec![IrType::Ptr];
        params.extend(block.params.iter().map(|param| layout.ir_type(&param.ty)));
        let func = self.backend.declare_function(&FnDecl {
            name: name.clone(),
            params,
            ret: layout.ret_ir_type(&block.body.ty),
            conv: None,
            variadic: false,
        });

        let resume = self.backend.insert_block();
        let values = self.backend.begin_function(func)?;

        // The closure sees enclosing variables only through its record.
        let ctx = CodegenContext::new(&name, &self.program().file);
        let result = self.with_context(ctx, |cg| {
            let data_param = values.first().copied().ok_or_else(|| {
                CodegenError::backend(format!("closure @{} has no data parameter", name))
            })?;
            for (index, (var, _, ty)) in captured.iter().enumerate() {
                let field = cg.backend.field_ptr(&record_ty, data_param, index as u32)?;
                let ptr = cg.backend.load(&IrType::Ptr, field)?;
                cg.ctx.scope.declare(
                    var,
                    Binding::Slot {
                        ptr,
                        ty: ty.clone(),
                    },
                );
            }
            if let Some((_, ty)) = &self_capture {
                let field = cg
                    .backend
                    .field_ptr(&record_ty, data_param, captured.len() as u32)?;
                let ir = cg.value_ir_type(ty);
                let value = cg.backend.load(&ir, field)?;
                cg.ctx.self_type = ty.clone();
                cg.ctx.self_binding = Some(Binding::Value {
                    value,
                    ty: ty.clone(),
                });
            }

            cg.ctx.scope = Scope::child(&cg.ctx.scope);
            for (param, value) in block.params.iter().zip(values.iter().skip(1)) {
                cg.bind_param(&param.name, &param.ty, Some(*value), false, loc)?;
            }

            // `next` inside a proc returns from it.
            let next = cg.open_merge(block.body.ty.clone());
            cg.ctx.next_merge = Some(next);
            let value = cg.lower_expr(&block.body)?;
            cg.add_to_merge(next, value, &block.body.ty)?;
            if let Some(value) = cg.close_merge(next)? {
                cg.emit_return(value, &block.body.ty, &block.body.ty)?;
            }
            Ok(())
        });
        if let Some(resume) = resume {
            self.backend.position_at_end(resume);
        }
        result?;

        log::debug!("materialized block as closure @{}", name);
        self.backend.make_closure(func, data)
    }
}
