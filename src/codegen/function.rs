use crate::ast::{TargetDef, Type};
use crate::backend::{Backend, FuncId, IrType, ValueId};
use crate::errors::CodegenError;

use super::context::CodegenContext;
use super::scope::Binding;
use super::{Codegen, Result};

impl<'p, B: Backend> Codegen<'p, B> {
    /// Lower a definition into a standalone function: declare it, bind its
    /// parameters to stack slots and return the value of its body.
    pub fn lower_function(&mut self, def: &'p TargetDef) -> Result<FuncId> {
        let body = def.body.as_ref().ok_or_else(|| {
            CodegenError::ice(def.location, format!("`{}` has no body to lower", def.name))
        })?;
        log::info!("Lowering function {}", def.name);

        let func = self.declare_def(def);
        let params = self.backend.begin_function(func)?;

        let mut ctx = CodegenContext::new(&def.name, &self.program().file);
        ctx.self_type = def.owner.clone();
        self.closure_count = 0;

        self.with_context(ctx, |cg| {
            let mut values = params.iter().copied();
            if def.takes_receiver() {
                cg.ctx.self_binding = values.next().map(|value| Binding::Value {
                    value,
                    ty: def.owner.clone(),
                });
            }

            // Allocate space for parameters
            let fixed = def.fixed_arity();
            for param in &def.params[..fixed] {
                cg.bind_param(&param.name, &param.ty, values.next(), def.primitive, def.location)?;
            }
            for special in &def.special_vars {
                let ptr = values.next().ok_or_else(|| {
                    CodegenError::ice(def.location, "special variable missing from parameters")
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
                cg.bind_param(&param.name, &param.ty, values.next(), def.primitive, def.location)?;
            }

            let value = cg.lower_expr(body)?;
            cg.emit_return(value, &body.ty, &def.ret)
        })?;
        Ok(func)
    }

    /// Return `value` (of type `from`) from the current function declared
    /// to return `ret`.
    pub(crate) fn emit_return(&mut self, value: ValueId, from: &Type, ret: &Type) -> Result<()> {
        if self.backend.is_terminated() {
            return Ok(());
        }
        if ret.is_no_return() {
            return self.backend.unreachable();
        }
        if self.layout().ret_ir_type(ret) == IrType::Void {
            return self.backend.ret(None);
        }
        let value = self.coerce(value, from, ret)?;
        let value = if ret.passed_by_value() {
            let ir = self.layout().ir_type(ret);
            self.backend.load(&ir, value)?
        } else {
            value
        };
        self.backend.ret(Some(value))
    }
}
