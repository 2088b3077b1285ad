use std::path::Path;

use crate::ast::{DefaultValue, Location, Param, ResolvedCall, TargetDef, Type};
use crate::backend::{Backend, Constant, ValueId};
use crate::errors::CodegenError;

use super::super::scope::Binding;
use super::super::{Codegen, Result};
use super::CallArgs;

impl<'p, B: Backend> Codegen<'p, B> {
    /// Arguments of a call in the uniform convention: receiver, leading
    /// formals, special variables, then trailing magic formals.
    pub(crate) fn build_uniform_args(
        &mut self,
        call: &ResolvedCall,
        def: &'p TargetDef,
    ) -> Result<CallArgs> {
        let mut args = CallArgs::default();

        if let Some((value, ty)) = self.lower_receiver(call, def)? {
            args.values.push(value);
            args.receiver = Some((value, ty));
        }

        if call.args.len() > def.params.len() {
            return Err(CodegenError::ice(
                call.location,
                format!(
                    "`{}` takes {} arguments but the call passes {}",
                    def.name,
                    def.params.len(),
                    call.args.len()
                ),
            ));
        }

        let fixed = def.fixed_arity();
        for (index, param) in def.params[..fixed].iter().enumerate() {
            let value = self.uniform_arg(call, def, index, param)?;
            args.values.push(value);
        }

        for special in &def.special_vars {
            let ptr = self.special_var_address(special, call.location)?;
            args.values.push(ptr);
        }

        for (offset, param) in def.params[fixed..].iter().enumerate() {
            let value = self.uniform_arg(call, def, fixed + offset, param)?;
            args.values.push(value);
        }

        Ok(args)
    }

    /// Evaluate the receiver. Returns the value passed as `self`, if the
    /// target takes one.
    fn lower_receiver(
        &mut self,
        call: &ResolvedCall,
        def: &TargetDef,
    ) -> Result<Option<(ValueId, Type)>> {
        if !def.takes_receiver() {
            // Still evaluated for its side effects, e.g. a constant with
            // an initializer.
            if let Some(obj) = &call.obj {
                if !obj.is_side_effect_free() {
                    self.with_needs_value(false, |cg| cg.lower_expr(obj))?;
                }
            }
            return Ok(None);
        }

        let (value, ty) = match &call.obj {
            Some(obj) => {
                let value = self.with_needs_value(true, |cg| cg.lower_expr(obj))?;
                (value, obj.ty.clone())
            }
            None => {
                let binding = if call.uses_with_scope {
                    self.ctx.with_scope.clone().ok_or_else(|| {
                        CodegenError::ice(call.location, "call uses a `with` scope outside of one")
                    })?
                } else {
                    self.ctx.self_binding.clone().ok_or_else(|| {
                        CodegenError::ice(
                            call.location,
                            format!("`{}` needs a receiver but no `self` is in scope", call.name),
                        )
                    })?
                };
                let value = self.read_binding(&binding)?;
                (value, binding.ty().clone())
            }
        };

        let value = if ty.is_nil() {
            self.nil()
        } else if let Type::Metaclass(_) = &def.owner {
            value
        } else {
            self.coerce(value, &ty, &def.owner)?
        };
        Ok(Some((value, def.owner.clone())))
    }

    fn uniform_arg(
        &mut self,
        call: &ResolvedCall,
        def: &TargetDef,
        index: usize,
        param: &Param,
    ) -> Result<ValueId> {
        let (value, ty) = match call.args.get(index) {
            Some(arg) => {
                let value = self.with_needs_value(true, |cg| cg.lower_expr(arg))?;
                (value, arg.ty.clone())
            }
            None => match &param.default {
                Some(DefaultValue::Expr(default)) => {
                    let value = self.with_needs_value(true, |cg| cg.lower_expr(default))?;
                    (value, default.ty.clone())
                }
                Some(DefaultValue::Magic(name)) => {
                    let value = self.magic_constant(name, call, &param.ty)?;
                    return Ok(value);
                }
                None => {
                    return Err(CodegenError::ice(
                        call.location,
                        format!("missing argument `{}` for `{}`", param.name, def.name),
                    ));
                }
            },
        };

        let value = self.coerce(value, &ty, &param.ty)?;
        if param.ty.passed_by_value() && !def.primitive {
            let ir = self.layout().ir_type(&param.ty);
            return self.backend.load(&ir, value);
        }
        Ok(value)
    }

    /// Address of a special variable in the caller's scope. A variable the
    /// caller never touched gets a fresh slot in the scope of the native
    /// function being emitted, so inlined bodies share it with their caller.
    fn special_var_address(&mut self, special: &Param, loc: Location) -> Result<ValueId> {
        let found = self
            .ctx
            .scope
            .lookup(&special.name)
            .or_else(|| self.ctx.function_scope.lookup_local(&special.name));
        match found {
            Some(Binding::Slot { ptr, .. }) => Ok(ptr),
            Some(Binding::Value { .. }) => Err(CodegenError::ice(
                loc,
                format!("special variable `{}` is not addressable", special.name),
            )),
            None => {
                let ir = self.layout().ir_type(&special.ty);
                let ptr = self.backend.alloca(&ir, &special.name)?;
                self.ctx.function_scope.declare(
                    &special.name,
                    Binding::Slot {
                        ptr,
                        ty: special.ty.clone(),
                    },
                );
                Ok(ptr)
            }
        }
    }

    /// Compile-time constant for an omitted magic formal, taken from the
    /// call site.
    fn magic_constant(&mut self, name: &str, call: &ResolvedCall, ty: &Type) -> Result<ValueId> {
        let value = match name {
            "__LINE__" => self.int_constant(ty, i64::from(call.location.line)),
            "__END_LINE__" => {
                let end = call.end_location.unwrap_or(call.location);
                self.int_constant(ty, i64::from(end.line))
            }
            "__FILE__" => {
                let file = self.program().file.clone();
                self.backend.constant(Constant::Str(file))
            }
            "__DIR__" => {
                let dir = Path::new(&self.program().file)
                    .parent()
                    .map(|dir| dir.display().to_string())
                    .filter(|dir| !dir.is_empty())
                    .unwrap_or_else(|| ".".to_string());
                self.backend.constant(Constant::Str(dir))
            }
            other => {
                return Err(CodegenError::ice(
                    call.location,
                    format!("unknown magic constant `{}`", other),
                ));
            }
        };
        Ok(value)
    }
}
