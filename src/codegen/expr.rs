use crate::ast::{Expr, ExprKind, Type};
use crate::backend::{Backend, Constant, FnDecl, IrType, ValueId};
use crate::errors::CodegenError;

use super::scope::Binding;
use super::{Codegen, Result};

impl<'p, B: Backend> Codegen<'p, B> {
    /// Lower one expression at the cursor and return its value. Once the
    /// current block is terminated (after `break`, a `NoReturn` call, ...)
    /// the rest of the expression is dead and produces nil.
    pub fn lower_expr(&mut self, expr: &Expr) -> Result<ValueId> {
        if self.backend.is_terminated() {
            return Ok(self.nil());
        }

        match &expr.kind {
            ExprKind::Nop | ExprKind::Nil => Ok(self.nil()),
            ExprKind::Bool(b) => Ok(self.backend.constant(Constant::bool(*b))),
            ExprKind::Char(c) => Ok(self.backend.constant(Constant::Int {
                bits: 32,
                value: i64::from(u32::from(*c)),
            })),
            ExprKind::String(s) => Ok(self.backend.constant(Constant::Str(s.clone()))),
            ExprKind::Int(n) => Ok(self.int_constant(&expr.ty, *n)),
            ExprKind::Float(x) => {
                let bits = match expr.ty {
                    Type::Float { bits } => bits,
                    _ => 64,
                };
                Ok(self.backend.constant(Constant::Float { bits, value: *x }))
            }
            ExprKind::Symbol(s) => Ok(self.backend.constant(Constant::Symbol(s.clone()))),

            ExprKind::Var(name) => {
                let binding = self.ctx.scope.lookup(name).ok_or_else(|| {
                    CodegenError::ice(expr.loc, format!("undefined variable `{}`", name))
                })?;
                let value = self.read_binding(&binding)?;
                self.coerce(value, binding.ty(), &expr.ty)
            }
            ExprKind::SelfRef => {
                let binding = self
                    .ctx
                    .self_binding
                    .clone()
                    .ok_or_else(|| CodegenError::ice(expr.loc, "no `self` in scope"))?;
                self.read_binding(&binding)
            }
            ExprKind::Field(name) => {
                let (owner, instance) = self.self_instance(expr.loc)?;
                let (value, ty) = self.load_field(&owner, instance, name, expr.loc)?;
                self.coerce(value, &ty, &expr.ty)
            }
            ExprKind::Assign { target, value } => self.lower_assign(target, value),
            ExprKind::Const { name, initializer } => self.lower_const(expr, name, *initializer),

            ExprKind::Call(call) => {
                let outcome = self.lower_call(call)?;
                self.coerce(outcome.value, &outcome.ty, &expr.ty)
            }
            ExprKind::Yield { args, scope } => {
                let (value, ty) = self.lower_yield(args, scope.as_deref(), expr.loc)?;
                self.coerce(value, &ty, &expr.ty)
            }
            ExprKind::Break(value) => {
                let merge = self.ctx.break_merge;
                self.lower_jump(merge, value.as_deref(), "break", expr.loc)
            }
            ExprKind::Next(value) => {
                let merge = self.ctx.next_merge;
                self.lower_jump(merge, value.as_deref(), "next", expr.loc)
            }
            ExprKind::Out(_) | ExprKind::Discard => Err(CodegenError::ice(
                expr.loc,
                "out argument outside of a foreign call",
            )),
            ExprKind::ProcLiteral(block) => self.materialize_block(block),

            ExprKind::Seq(exprs) => {
                let Some((last, init)) = exprs.split_last() else {
                    return Ok(self.nil());
                };
                for expr in init {
                    self.with_needs_value(false, |cg| cg.lower_expr(expr))?;
                }
                self.lower_expr(last)
            }
            ExprKind::Rescue { body, handler } => self.lower_rescue(expr, body, handler),
        }
    }

    /// Assignment updates the nearest binding of `target`; a new name is
    /// declared in the current scope.
    fn lower_assign(&mut self, target: &str, value: &Expr) -> Result<ValueId> {
        let result = self.with_needs_value(true, |cg| cg.lower_expr(value))?;
        if self.backend.is_terminated() {
            return Ok(result);
        }
        match self.ctx.scope.lookup(target) {
            Some(Binding::Slot { ptr, ty }) => {
                let converted = self.coerce(result, &value.ty, &ty)?;
                self.store_slot(converted, ptr, &ty)?;
            }
            Some(Binding::Value { .. }) => {
                return Err(CodegenError::ice(
                    value.loc,
                    format!("cannot assign to `{}`", target),
                ));
            }
            None => {
                let slot = self.spill(result, &value.ty, target)?;
                self.ctx.scope.declare(
                    target,
                    Binding::Slot {
                        ptr: slot,
                        ty: value.ty.clone(),
                    },
                );
            }
        }
        Ok(result)
    }

    /// Constants live in globals; one with an initializer runs it first.
    fn lower_const(&mut self, expr: &Expr, name: &str, initializer: bool) -> Result<ValueId> {
        if let Type::Metaclass(_) = expr.ty {
            return self.type_tag_value(&expr.ty, expr.loc);
        }
        if initializer {
            let init = self.backend.declare_function(&FnDecl {
                name: format!("~{}:init", name),
                params: Vec::new(),
                ret: IrType::Void,
                conv: None,
                variadic: false,
            });
            self.backend.emit_call(init, &[], None)?;
        }
        let ir = self.layout().ir_type(&expr.ty);
        let global = self.backend.global(name, &ir);
        self.load_slot(global, &expr.ty)
    }

    /// Calls to raising targets inside `body` unwind to the handler block.
    fn lower_rescue(&mut self, expr: &Expr, body: &Expr, handler: &Expr) -> Result<ValueId> {
        let rescue = self.backend.new_block("rescue")?;
        let merge = self.open_merge(expr.ty.clone());

        self.ctx.handlers.push(rescue);
        let value = self.lower_expr(body);
        self.ctx.handlers.pop();
        let value = value?;
        self.add_to_merge(merge, value, &body.ty)?;

        self.backend.position_at_end(rescue);
        self.backend.landing_pad()?;
        let value = self.lower_expr(handler)?;
        self.add_to_merge(merge, value, &handler.ty)?;

        match self.close_merge(merge)? {
            Some(value) => Ok(value),
            None => Ok(self.nil()),
        }
    }
}
