//! Runtime selection among several resolved target definitions.
//!
//! The receiver and arguments are evaluated once and bound to hidden
//! per-dispatch names, which a template call reads back as variables.
//! Each candidate gets a guard testing the runtime type tags, in resolver
//! order, and the first passing guard runs that candidate through the
//! single-target emitter. All candidates feed one join point.

use crate::ast::{Expr, ExprKind, ResolvedCall, TargetDef, Type};
use crate::backend::{Backend, Constant, ValueId};
use crate::errors::CodegenError;

use super::super::scope::Binding;
use super::super::{CallOutcome, Codegen, Result};

struct DispatchReceiver {
    name: String,
    ty: Type,
    tag: Option<ValueId>,
}

impl<'p, B: Backend> Codegen<'p, B> {
    pub(crate) fn lower_dispatch(&mut self, call: &ResolvedCall) -> Result<CallOutcome> {
        let defs = call
            .target_defs
            .iter()
            .map(|name| self.def(name, call.location))
            .collect::<Result<Vec<&'p TargetDef>>>()?;
        log::debug!(
            "dispatch {} over [{}]",
            call.name,
            call.target_defs.join(", ")
        );

        self.dispatch_count += 1;
        let id = self.dispatch_count;
        let receiver = self.bind_dispatch_receiver(call, &defs, id)?;

        let mut template = ResolvedCall {
            obj: receiver
                .as_ref()
                .map(|r| Expr::var(&r.name, r.ty.clone()).at(call.location)),
            args: Vec::with_capacity(call.args.len()),
            target_defs: Vec::new(),
            uses_with_scope: false,
            ..call.clone()
        };
        let mut arg_tags = Vec::with_capacity(call.args.len());
        for (index, arg) in call.args.iter().enumerate() {
            if matches!(arg.kind, ExprKind::Out(_) | ExprKind::ProcLiteral(_)) {
                // Evaluated by the emitter itself, never tested.
                template.args.push(arg.clone());
                arg_tags.push(None);
                continue;
            }
            let value = self.with_needs_value(true, |cg| cg.lower_expr(arg))?;
            let name = format!("%arg{}.{}", id, index);
            self.ctx.scope.declare(
                &name,
                Binding::Value {
                    value,
                    ty: arg.ty.clone(),
                },
            );
            template.args.push(Expr::var(&name, arg.ty.clone()).at(arg.loc));
            let tag = if arg.supports_autocast() {
                None
            } else {
                Some(self.backend.type_id(value, &arg.ty)?)
            };
            arg_tags.push(tag);
        }

        let break_ty = call.block.as_ref().and_then(|block| block.break_ty.clone());
        let merged = Type::merge(
            defs.iter()
                .map(|def| def.ret.clone())
                .chain(break_ty.iter().cloned()),
        );
        let merge = self.open_merge(merged.clone());

        for def in defs.iter().copied() {
            let mut cond = match &receiver {
                Some(DispatchReceiver {
                    ty, tag: Some(tag), ..
                }) if !call.is_super => {
                    Some(self.backend.match_type_tag(ty, &def.owner, *tag)?)
                }
                _ => None,
            };
            for (index, tag) in arg_tags.iter().enumerate() {
                let Some(tag) = tag else { continue };
                let param = def.params.get(index).ok_or_else(|| {
                    CodegenError::ice(
                        call.location,
                        format!("`{}` has no parameter #{}", def.name, index),
                    )
                })?;
                let test = self
                    .backend
                    .match_type_tag(&call.args[index].ty, &param.ty, *tag)?;
                cond = Some(match cond {
                    Some(prev) => self.backend.and(prev, test)?,
                    None => test,
                });
            }
            let cond = match cond {
                Some(cond) => cond,
                None => self.backend.constant(Constant::bool(true)),
            };

            let current = self.backend.new_block("current_def")?;
            let next = self.backend.new_block("next_def")?;
            self.backend.cond_br(cond, current, next)?;
            self.backend.position_at_end(current);

            let sub = self.rebind_template(&template, def, &arg_tags);
            let outcome = self.lower_single(&sub, def)?;
            self.add_to_merge(merge, outcome.value, &outcome.ty)?;

            self.backend.position_at_end(next);
        }
        // Sound resolution never gets here.
        self.backend.unreachable()?;

        let value = match self.close_merge(merge)? {
            Some(value) => value,
            None => self.nil(),
        };
        Ok(CallOutcome { value, ty: merged })
    }

    /// Evaluate the dispatch receiver (explicit or implicit `self`) once
    /// and bind it for the template.
    fn bind_dispatch_receiver(
        &mut self,
        call: &ResolvedCall,
        defs: &[&'p TargetDef],
        id: usize,
    ) -> Result<Option<DispatchReceiver>> {
        let (value, ty) = match &call.obj {
            Some(obj) => {
                let value = self.with_needs_value(true, |cg| cg.lower_expr(obj))?;
                (value, obj.ty.clone())
            }
            None if defs.iter().any(|def| def.takes_receiver()) => {
                let binding = if call.uses_with_scope {
                    self.ctx.with_scope.clone()
                } else {
                    self.ctx.self_binding.clone()
                };
                let binding = binding.ok_or_else(|| {
                    CodegenError::ice(
                        call.location,
                        format!("`{}` needs a receiver but no `self` is in scope", call.name),
                    )
                })?;
                let value = self.read_binding(&binding)?;
                (value, binding.ty().clone())
            }
            None => return Ok(None),
        };

        let name = format!("%self.{}", id);
        self.ctx.scope.declare(
            &name,
            Binding::Value {
                value,
                ty: ty.clone(),
            },
        );
        let tag = if ty.passed_as_self() {
            Some(self.backend.type_id(value, &ty)?)
        } else {
            None
        };
        Ok(Some(DispatchReceiver { name, ty, tag }))
    }

    /// Specialize the template to one candidate: the hidden receiver and
    /// tested arguments are read back at the candidate's own types.
    fn rebind_template(
        &self,
        template: &ResolvedCall,
        def: &TargetDef,
        tested: &[Option<ValueId>],
    ) -> ResolvedCall {
        let mut sub = template.clone();
        sub.target_defs = vec![def.name.clone()];
        if let Some(obj) = &mut sub.obj {
            if def.takes_receiver() {
                obj.ty = def.owner.clone();
            }
        }
        for ((arg, param), tag) in sub.args.iter_mut().zip(&def.params).zip(tested) {
            if tag.is_some() {
                arg.ty = param.ty.clone();
            }
        }
        sub
    }
}
