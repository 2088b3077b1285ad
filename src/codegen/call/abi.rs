use std::rc::Rc;

use crate::ast::{Location, TargetDef, Type};
use crate::backend::{AbiInfo, AbiSignature, Backend, CastKind, IrType};
use crate::errors::CodegenError;

use super::super::{Codegen, Result};

/// C default argument promotion applied to variadic arguments.
pub(crate) fn variadic_promotion(ty: &Type) -> Option<(CastKind, IrType, Type)> {
    match ty {
        Type::Float { bits } if *bits < 64 => {
            Some((CastKind::FpExt, IrType::Float(64), Type::float(64)))
        }
        Type::Int { bits, signed } if *bits < 32 => {
            let kind = if *signed { CastKind::SExt } else { CastKind::ZExt };
            let promoted = Type::Int {
                bits: 32,
                signed: *signed,
            };
            Some((kind, IrType::Int(32), promoted))
        }
        Type::Bool => Some((CastKind::ZExt, IrType::Int(32), Type::int(32))),
        _ => None,
    }
}

impl<'p, B: Backend> Codegen<'p, B> {
    /// Classification of a foreign target for one call site. `tail` holds
    /// the promoted types of arguments past the declared formals.
    pub(crate) fn abi_info(
        &mut self,
        def: &TargetDef,
        tail: &[Type],
        loc: Location,
    ) -> Result<Rc<AbiInfo>> {
        let sig = AbiSignature {
            params: def
                .params
                .iter()
                .map(|param| param.ty.clone())
                .chain(tail.iter().cloned())
                .collect(),
            ret: def.ret.clone(),
        };
        if self.options().memoize_abi {
            if let Some(info) = self.abi_cache.get(&sig) {
                log::debug!("abi: memo hit for {}", def.name);
                return Ok(Rc::clone(info));
            }
        }

        let info = self.backend.classify(&sig)?;
        if info.args.len() != sig.params.len() {
            return Err(CodegenError::ice(
                loc,
                format!(
                    "missing ABI classification for `{}`: {} of {} arguments classified",
                    def.name,
                    info.args.len(),
                    sig.params.len()
                ),
            ));
        }
        let info = Rc::new(info);
        if self.options().memoize_abi {
            self.abi_cache.insert(sig, Rc::clone(&info));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_ints_promote_to_i32_keeping_signedness() {
        let (kind, ir, ty) = variadic_promotion(&Type::int(8)).unwrap();
        assert_eq!((kind, ir, ty), (CastKind::SExt, IrType::Int(32), Type::int(32)));
        let (kind, _, ty) = variadic_promotion(&Type::uint(16)).unwrap();
        assert_eq!((kind, ty), (CastKind::ZExt, Type::uint(32)));
    }

    #[test]
    fn float32_promotes_to_double() {
        let (kind, ir, _) = variadic_promotion(&Type::float(32)).unwrap();
        assert_eq!((kind, ir), (CastKind::FpExt, IrType::Float(64)));
    }

    #[test]
    fn wide_values_are_untouched() {
        assert!(variadic_promotion(&Type::int(64)).is_none());
        assert!(variadic_promotion(&Type::float(64)).is_none());
        assert!(variadic_promotion(&Type::String).is_none());
    }
}
