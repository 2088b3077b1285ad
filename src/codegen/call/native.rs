//! Calls into foreign (C ABI) functions.

use crate::ast::{Expr, ExprKind, Location, ResolvedCall, TargetDef, Type};
use crate::backend::{ArgClass, ArgKind, Backend, Constant, FnDecl, IrType, ValueId};
use crate::errors::CodegenError;

use super::super::scope::Binding;
use super::super::{CallOutcome, Codegen, Result};
use super::abi::variadic_promotion;

impl<'p, B: Backend> Codegen<'p, B> {
    pub(crate) fn lower_foreign_call(
        &mut self,
        call: &ResolvedCall,
        def: &'p TargetDef,
    ) -> Result<CallOutcome> {
        let Some(foreign) = &def.foreign else {
            return Err(CodegenError::ice(
                call.location,
                format!("`{}` is not a foreign function", def.name),
            ));
        };

        // Foreign functions never take `self`; a receiver only matters for
        // its side effects.
        if let Some(obj) = &call.obj {
            if !obj.is_side_effect_free() {
                self.with_needs_value(false, |cg| cg.lower_expr(obj))?;
            }
        }

        let declared = def.params.len();
        if call.args.len() < declared || (call.args.len() > declared && !def.variadic) {
            return Err(CodegenError::ice(
                call.location,
                format!(
                    "`{}` takes {} arguments but the call passes {}",
                    def.name,
                    declared,
                    call.args.len()
                ),
            ));
        }
        let tail: Vec<Type> = call.args[declared..]
            .iter()
            .map(|arg| match variadic_promotion(&arg.ty) {
                Some((_, _, promoted)) => promoted,
                None => arg.ty.clone(),
            })
            .collect();
        let info = self.abi_info(def, &tail, call.location)?;

        let mut args = Vec::new();
        let sret = if info.ret.kind == ArgKind::Indirect {
            let slot = self.backend.alloca(&info.ret.ty, "sret")?;
            args.push(slot);
            Some(slot)
        } else {
            None
        };

        for (index, (arg, class)) in call.args.iter().zip(info.args.iter()).enumerate() {
            let formal = def.params.get(index).map(|param| &param.ty);
            let (value, ty) = self.foreign_arg(arg, formal)?;
            if let Some(value) = self.pass_by_class(value, &ty, class)? {
                args.push(value);
            }
        }

        let mut params = Vec::new();
        if sret.is_some() {
            params.push(IrType::Ptr);
        }
        params.extend(
            info.args[..declared]
                .iter()
                .filter(|class| class.kind != ArgKind::Ignore)
                .map(ArgClass::native_type),
        );
        let ret = match info.ret.kind {
            ArgKind::Indirect => IrType::Void,
            _ => info.ret.native_type(),
        };
        let func = self.backend.declare_function(&FnDecl {
            name: foreign.symbol.clone(),
            params,
            ret,
            conv: Some(foreign.conv),
            variadic: def.variadic,
        });

        log::trace!("call {} ({} args, {})", foreign.symbol, args.len(), foreign.conv);
        let result = self.call_or_invoke(func, &args, def, Some(foreign.conv))?;

        if def.ret.is_no_return() {
            self.backend.unreachable()?;
            return Ok(CallOutcome {
                value: self.nil(),
                ty: Type::NoReturn,
            });
        }
        let value = self.foreign_return(result, &info.ret, sret, &def.ret, call.location)?;
        Ok(CallOutcome {
            value,
            ty: def.ret.clone(),
        })
    }

    /// Evaluate one argument of a foreign call, before ABI adjustment.
    /// Returns the value with the type it is passed at.
    fn foreign_arg(&mut self, arg: &Expr, formal: Option<&Type>) -> Result<(ValueId, Type)> {
        match &arg.kind {
            ExprKind::Out(target) => {
                let address = self.out_address(target)?;
                return Ok((address, Type::pointer(target.ty.clone())));
            }
            _ => {}
        }

        let proc_typed = arg.ty.is_proc() || formal.is_some_and(Type::is_proc);
        if proc_typed && !arg.ty.is_nil() && !self.is_context_free(arg) {
            return Err(CodegenError::abi(
                arg.loc,
                "cannot pass a closure to a C function that expects a plain function pointer",
            ));
        }

        if arg.ty.is_nil() && formal.is_some_and(|ty| ty.is_pointer() || ty.is_proc()) {
            self.with_needs_value(false, |cg| cg.lower_expr(arg))?;
            let null = self.backend.constant(Constant::Null);
            return Ok((null, Type::pointer(Type::Nil)));
        }

        let value = self.with_needs_value(true, |cg| cg.lower_expr(arg))?;
        let (value, ty) = match formal {
            Some(formal) => (self.coerce(value, &arg.ty, formal)?, formal.clone()),
            None => match variadic_promotion(&arg.ty) {
                Some((kind, ir, promoted)) => (self.backend.cast(kind, value, &ir)?, promoted),
                None => (value, arg.ty.clone()),
            },
        };

        if ty.is_proc() {
            // Only the function pointer crosses the boundary.
            let ir = self.layout().ir_type(&ty);
            let func = self.backend.extract_value(&ir, value, 0)?;
            return Ok((func, Type::pointer(Type::Nil)));
        }
        Ok((value, ty))
    }

    /// Whether `arg` is known to need no closure data. Only a literal that
    /// captures nothing, not even `self`, qualifies; a proc read from a
    /// variable may carry any context.
    fn is_context_free(&self, arg: &Expr) -> bool {
        let ExprKind::ProcLiteral(block) = &arg.kind else {
            return false;
        };
        let captures_self = self
            .ctx
            .self_binding
            .as_ref()
            .is_some_and(|binding| binding.ty().has_value());
        block.captures.is_empty() && !captures_self
    }

    /// Raw address handed over for an `out` argument.
    fn out_address(&mut self, target: &Expr) -> Result<ValueId> {
        match &target.kind {
            ExprKind::Var(name) => match self.ctx.scope.lookup(name) {
                Some(Binding::Slot { ptr, .. }) => Ok(ptr),
                Some(Binding::Value { .. }) => Err(CodegenError::ice(
                    target.loc,
                    format!("out argument `{}` is not addressable", name),
                )),
                None => {
                    let ir = self.layout().ir_type(&target.ty);
                    let ptr = self.backend.alloca(&ir, name)?;
                    self.ctx.scope.declare(
                        name,
                        Binding::Slot {
                            ptr,
                            ty: target.ty.clone(),
                        },
                    );
                    Ok(ptr)
                }
            },
            ExprKind::Field(name) => {
                let (owner, instance) = self.self_instance(target.loc)?;
                let (address, _) = self.field_address(&owner, instance, name, target.loc)?;
                Ok(address)
            }
            ExprKind::Discard => {
                let ir = self.layout().ir_type(&target.ty);
                self.backend.alloca(&ir, "discard")
            }
            _ => Err(CodegenError::ice(
                target.loc,
                "out argument must be a variable, a field or `_`",
            )),
        }
    }

    /// Adjust an evaluated argument to its classification. `None` means
    /// the argument is dropped.
    fn pass_by_class(
        &mut self,
        value: ValueId,
        ty: &Type,
        class: &ArgClass,
    ) -> Result<Option<ValueId>> {
        let in_memory = ty.passed_by_value();
        match class.kind {
            ArgKind::Ignore => Ok(None),
            ArgKind::Indirect => {
                // The callee may write to its copy; the caller's value stays intact.
                let copy = self.backend.alloca(&class.ty, "byval")?;
                if in_memory {
                    self.backend.copy(copy, value, class.size, class.align)?;
                } else {
                    self.backend.store(value, copy)?;
                }
                Ok(Some(copy))
            }
            ArgKind::Direct => match &class.cast {
                Some(cast) => {
                    let buffer = self.backend.alloca(cast, "abi_cast")?;
                    if in_memory {
                        self.backend.copy(buffer, value, class.size, class.align)?;
                    } else {
                        self.backend.store(value, buffer)?;
                    }
                    self.backend.load(cast, buffer).map(Some)
                }
                None if in_memory => self.backend.load(&class.ty, value).map(Some),
                None => Ok(Some(value)),
            },
        }
    }

    /// Rebuild the language-level return value of a foreign call.
    fn foreign_return(
        &mut self,
        result: ValueId,
        class: &ArgClass,
        sret: Option<ValueId>,
        ret: &Type,
        loc: Location,
    ) -> Result<ValueId> {
        match class.kind {
            ArgKind::Indirect => {
                sret.ok_or_else(|| CodegenError::ice(loc, "indirect return without a return slot"))
            }
            ArgKind::Ignore => {
                if ret.has_value() && !ret.is_nil() && self.layout().size_of(ret) > 0 {
                    return Err(CodegenError::ice(
                        loc,
                        format!("unhandled return classification for `{}`", ret),
                    ));
                }
                Ok(self.nil())
            }
            ArgKind::Direct => match &class.cast {
                Some(cast) => {
                    let buffer = self.backend.alloca(cast, "abi_ret")?;
                    self.backend.store(result, buffer)?;
                    let value = self.backend.alloca(&class.ty, "ret")?;
                    self.backend.copy(value, buffer, class.size, class.align)?;
                    if ret.passed_by_value() {
                        Ok(value)
                    } else {
                        self.backend.load(&class.ty, value)
                    }
                }
                None if ret.passed_by_value() => {
                    let slot = self.backend.alloca(&class.ty, "ret")?;
                    self.backend.store(result, slot)?;
                    Ok(slot)
                }
                None => Ok(result),
            },
        }
    }

    /// Current `self` as an instance pointer together with its type.
    pub(crate) fn self_instance(&mut self, loc: Location) -> Result<(Type, ValueId)> {
        let binding = self
            .ctx
            .self_binding
            .clone()
            .ok_or_else(|| CodegenError::ice(loc, "no `self` in scope"))?;
        let value = self.read_binding(&binding)?;
        Ok((binding.ty().clone(), value))
    }
}
