use crate::ast::{ResolvedCall, TargetDef, Type};
use crate::backend::{Backend, CallConv, FnDecl, FuncId, IrType, ValueId};
use crate::errors::CodegenError;

use super::super::{CallOutcome, Codegen, Result};

impl<'p, B: Backend> Codegen<'p, B> {
    /// Emit the call of one resolved target definition.
    pub(crate) fn lower_single(
        &mut self,
        call: &ResolvedCall,
        def: &'p TargetDef,
    ) -> Result<CallOutcome> {
        if call.block.is_some() && !def.block_arg {
            return self.lower_inlined_block_call(call, def);
        }
        if def.is_foreign() {
            return self.lower_foreign_call(call, def);
        }
        if def.is_inline_only() {
            return Err(CodegenError::ice(
                call.location,
                format!("`{}` yields but the call passes no block", def.name),
            ));
        }

        let mut args = self.build_uniform_args(call, def)?;
        if let Some(value) = self.try_inline(def, &args)? {
            return Ok(CallOutcome {
                value,
                ty: def.ret.clone(),
            });
        }

        if def.block_arg {
            let closure = match &call.block {
                Some(block) => self.materialize_block(block)?,
                None => self.nil(),
            };
            args.values.push(closure);
        }

        let func = self.declare_def(def);
        log::trace!("call {} ({} args)", def.name, args.values.len());
        let result = self.call_or_invoke(func, &args.values, def, None)?;
        self.uniform_return(def, result)
    }

    /// Plain call, or an invoke edge when the target may raise inside an
    /// exception-handling scope.
    pub(crate) fn call_or_invoke(
        &mut self,
        func: FuncId,
        args: &[ValueId],
        def: &TargetDef,
        conv: Option<CallConv>,
    ) -> Result<ValueId> {
        match self.ctx.handler() {
            Some(handler) if def.raises => {
                let normal = self.backend.new_block("invoke_out")?;
                let value = self.backend.emit_invoke(func, args, normal, handler, conv)?;
                self.backend.position_at_end(normal);
                Ok(value)
            }
            _ => self.backend.emit_call(func, args, conv),
        }
    }

    fn uniform_return(&mut self, def: &TargetDef, result: ValueId) -> Result<CallOutcome> {
        if def.ret.is_no_return() {
            self.backend.unreachable()?;
            return Ok(CallOutcome {
                value: self.nil(),
                ty: Type::NoReturn,
            });
        }
        let value = if def.ret.passed_by_value() {
            if self.ctx.needs_value {
                let ir = self.layout().ir_type(&def.ret);
                let slot = self.backend.alloca(&ir, "ret")?;
                self.backend.store(result, slot)?;
                slot
            } else {
                self.nil()
            }
        } else if def.ret.is_nil() {
            self.nil()
        } else {
            result
        };
        Ok(CallOutcome {
            value,
            ty: def.ret.clone(),
        })
    }

    /// Native signature of a uniform-convention definition; parameter
    /// order matches `build_uniform_args`.
    pub(crate) fn declare_def(&mut self, def: &TargetDef) -> FuncId {
        let layout = self.layout();
        let mut params = Vec::new();
        if def.takes_receiver() {
            params.push(self.value_ir_type(&def.owner));
        }
        let param_ir = |ty: &Type| {
            if ty.passed_by_value() && def.primitive {
                IrType::Ptr
            } else {
                layout.ir_type(ty)
            }
        };
        let fixed = def.fixed_arity();
        params.extend(def.params[..fixed].iter().map(|param| param_ir(&param.ty)));
        params.extend(def.special_vars.iter().map(|_| IrType::Ptr));
        params.extend(def.params[fixed..].iter().map(|param| param_ir(&param.ty)));
        if def.block_arg {
            params.push(IrType::Struct(vec![IrType::Ptr, IrType::Ptr]));
        }
        self.backend.declare_function(&FnDecl {
            name: def.name.clone(),
            params,
            ret: layout.ret_ir_type(&def.ret),
            conv: None,
            variadic: false,
        })
    }
}
