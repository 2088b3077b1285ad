use crate::ast::{ExprKind, TargetDef, Type};
use crate::backend::{Backend, Constant, ValueId};

use super::super::{Codegen, Result};
use super::CallArgs;

impl<'p, B: Backend> Codegen<'p, B> {
    /// Substitute the call when the target body is a literal, `self` or a
    /// field read. Runs after the arguments are built so the receiver has
    /// been evaluated exactly once either way.
    pub(crate) fn try_inline(
        &mut self,
        def: &TargetDef,
        args: &CallArgs,
    ) -> Result<Option<ValueId>> {
        if def.is_foreign() {
            return Ok(None);
        }
        let Some(body) = &def.body else {
            return Ok(None);
        };

        let (value, ty) = match &body.kind {
            _ if def.ret.is_nil() && body.is_literal() => (self.nil(), Type::Nil),
            ExprKind::Nil => (self.nil(), Type::Nil),
            ExprKind::Bool(b) => (self.backend.constant(Constant::bool(*b)), Type::Bool),
            ExprKind::Char(c) => (
                self.backend.constant(Constant::Int {
                    bits: 32,
                    value: i64::from(u32::from(*c)),
                }),
                Type::Char,
            ),
            ExprKind::String(s) => (self.backend.constant(Constant::Str(s.clone())), Type::String),
            ExprKind::Int(n) => (self.int_constant(&body.ty, *n), body.ty.clone()),
            ExprKind::Float(x) => {
                let bits = match body.ty {
                    Type::Float { bits } => bits,
                    _ => 64,
                };
                (
                    self.backend.constant(Constant::Float { bits, value: *x }),
                    body.ty.clone(),
                )
            }
            ExprKind::Symbol(s) => (self.backend.constant(Constant::Symbol(s.clone())), Type::Symbol),
            ExprKind::SelfRef => {
                let Some((receiver, owner)) = &args.receiver else {
                    return Ok(None);
                };
                if owner.has_value() {
                    (*receiver, owner.clone())
                } else {
                    (self.type_tag_value(owner, body.loc)?, owner.clone())
                }
            }
            ExprKind::Field(name) => {
                let Some((receiver, owner)) = &args.receiver else {
                    return Ok(None);
                };
                self.load_field(owner, *receiver, name, body.loc)?
            }
            _ => return Ok(None),
        };

        let shape = match &body.kind {
            ExprKind::SelfRef => "self",
            ExprKind::Field(_) => "field read",
            _ => "literal",
        };
        log::debug!("inlined {} ({})", def.name, shape);
        let value = self.coerce(value, &ty, &def.ret)?;
        Ok(Some(value))
    }
}
