//! Join point shared by every control-flow path of one construct.
//!
//! Each path hands its result to [`ReturnMerge::add`], which converts the
//! value to the merged type and branches to a common exit block. Closing
//! the merge positions the cursor in that exit block and yields a phi over
//! the incoming values, or the canonical nil when the value is unused.

use crate::ast::Type;
use crate::backend::{Backend, BlockId, Constant, IrType, Result, ValueId};
use crate::errors::CodegenError;

pub struct ReturnMerge {
    pub ty: Type,
    ir_ty: IrType,
    needs_value: bool,
    exit: Option<BlockId>,
    incoming: Vec<(ValueId, BlockId)>,
}

impl ReturnMerge {
    pub fn new(ty: Type, ir_ty: IrType, needs_value: bool) -> Self {
        Self {
            ty,
            ir_ty,
            needs_value,
            exit: None,
            incoming: Vec::new(),
        }
    }

    fn materializes(&self) -> bool {
        self.needs_value && self.ty.has_value() && !self.ty.is_nil()
    }

    /// Whether any path has reached the join point so far.
    pub fn is_reached(&self) -> bool {
        self.exit.is_some()
    }

    /// Feed the value of the path ending at the cursor. Paths that already
    /// left the block (or never produce a value) contribute nothing.
    pub fn add<B: Backend>(&mut self, backend: &mut B, value: ValueId, value_ty: &Type) -> Result<()> {
        if backend.is_terminated() || value_ty.is_no_return() {
            return Ok(());
        }
        if self.materializes() {
            let value = if *value_ty == self.ty {
                value
            } else {
                backend.convert(value, value_ty, &self.ty)?
            };
            let from = backend
                .insert_block()
                .ok_or_else(|| CodegenError::backend("no insertion point"))?;
            self.incoming.push((value, from));
        }
        let exit = match self.exit {
            Some(exit) => exit,
            None => {
                let exit = backend.new_block("merge")?;
                self.exit = Some(exit);
                exit
            }
        };
        backend.br(exit)
    }

    /// Seal the join point. Returns `None` when no path reached it; the
    /// cursor is then left in a block sealed as unreachable.
    pub fn close<B: Backend>(self, backend: &mut B) -> Result<Option<ValueId>> {
        let Some(exit) = self.exit else {
            if !backend.is_terminated() {
                backend.unreachable()?;
            }
            return Ok(None);
        };
        backend.position_at_end(exit);
        if self.materializes() {
            backend.phi(&self.ir_ty, &self.incoming).map(Some)
        } else {
            Ok(Some(backend.constant(Constant::Nil)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TypeTable;
    use crate::backend::recording::{Op, RecordingBackend};
    use crate::backend::{FnDecl, TargetArch};

    fn backend() -> RecordingBackend {
        let mut backend = RecordingBackend::new(TargetArch::X86_64, TypeTable::new());
        let func = backend.declare_function(&FnDecl {
            name: "f".into(),
            params: vec![],
            ret: IrType::Void,
            conv: None,
            variadic: false,
        });
        backend.begin_function(func).unwrap();
        backend
    }

    fn int(backend: &mut RecordingBackend, value: i64) -> ValueId {
        backend.constant(Constant::Int { bits: 32, value })
    }

    #[test]
    fn phi_collects_converted_values() {
        let mut backend = backend();
        let union = Type::Union(vec![Type::int(32), Type::String]);
        let mut merge = ReturnMerge::new(union.clone(), IrType::Ptr, true);

        let a = backend.new_block("a").unwrap();
        let b = backend.new_block("b").unwrap();
        let cond = backend.constant(Constant::bool(true));
        backend.cond_br(cond, a, b).unwrap();

        backend.position_at_end(a);
        let one = int(&mut backend, 1);
        merge.add(&mut backend, one, &Type::int(32)).unwrap();
        backend.position_at_end(b);
        let s = backend.constant(Constant::Str("s".into()));
        merge.add(&mut backend, s, &Type::String).unwrap();

        let value = merge.close(&mut backend).unwrap().unwrap();
        match backend.defining_op(value) {
            Some(Op::Phi { incoming, .. }) => {
                assert_eq!(incoming.len(), 2);
                assert_eq!(incoming[0].1, a);
                assert_eq!(incoming[1].1, b);
            }
            other => panic!("expected phi, got {:?}", other),
        }
        let converts = backend
            .insts(backend.function_named("f").unwrap())
            .filter(|inst| matches!(inst.op, Op::Convert { .. }))
            .count();
        assert_eq!(converts, 2);
    }

    #[test]
    fn unused_value_yields_nil_without_phi() {
        let mut backend = backend();
        let mut merge = ReturnMerge::new(Type::int(32), IrType::Int(32), false);
        let one = int(&mut backend, 1);
        merge.add(&mut backend, one, &Type::int(32)).unwrap();
        let value = merge.close(&mut backend).unwrap().unwrap();
        assert_eq!(backend.constant_of(value), Some(&Constant::Nil));
    }

    #[test]
    fn unreached_merge_seals_block() {
        let mut backend = backend();
        let merge = ReturnMerge::new(Type::int(32), IrType::Int(32), true);
        assert!(!merge.is_reached());
        assert_eq!(merge.close(&mut backend).unwrap(), None);
        assert!(backend.is_terminated());
    }

    #[test]
    fn terminated_paths_are_skipped() {
        let mut backend = backend();
        let mut merge = ReturnMerge::new(Type::int(32), IrType::Int(32), true);
        backend.unreachable().unwrap();
        let one = int(&mut backend, 1);
        merge.add(&mut backend, one, &Type::int(32)).unwrap();
        assert!(!merge.is_reached());
    }
}
