//! C ABI argument and return classification for the supported targets.
//!
//! This mirrors what a C compiler does for the same prototype: scalars go
//! direct, small aggregates are coerced to register-sized types, large
//! aggregates travel through memory and zero-sized values vanish.

use serde::{Deserialize, Serialize};

use crate::ast::Type;

use super::layout::Layout;
use super::IrType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetArch {
    #[default]
    X86_64,
    Aarch64,
}

impl std::fmt::Display for TargetArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetArch::X86_64 => write!(f, "x86_64"),
            TargetArch::Aarch64 => write!(f, "aarch64"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Passed as-is, possibly coerced through `cast`.
    Direct,
    /// Passed (or returned) through caller-owned memory.
    Indirect,
    /// Dropped from the native call.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgClass {
    pub kind: ArgKind,
    /// C-view representation of the value itself.
    pub ty: IrType,
    /// Register type the value must be reinterpreted as, if any.
    pub cast: Option<IrType>,
    pub size: u64,
    pub align: u32,
}

impl ArgClass {
    /// Type the value has in the native call instruction.
    pub fn native_type(&self) -> IrType {
        match self.kind {
            ArgKind::Indirect => IrType::Ptr,
            ArgKind::Ignore => IrType::Void,
            ArgKind::Direct => self.cast.clone().unwrap_or_else(|| self.ty.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiInfo {
    pub args: Vec<ArgClass>,
    pub ret: ArgClass,
}

/// Foreign prototype as seen at one call site: declared formals followed by
/// the (already promoted) types of any variadic arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbiSignature {
    pub params: Vec<Type>,
    pub ret: Type,
}

pub fn classify(arch: TargetArch, layout: &Layout<'_>, sig: &AbiSignature) -> AbiInfo {
    AbiInfo {
        args: sig
            .params
            .iter()
            .map(|ty| classify_value(arch, layout, ty))
            .collect(),
        ret: classify_value(arch, layout, &sig.ret),
    }
}

fn classify_value(arch: TargetArch, layout: &Layout<'_>, ty: &Type) -> ArgClass {
    let ir = layout.c_ir_type(ty);
    let size = layout.ir_size(&ir);
    let align = layout.ir_align(&ir);
    let class = |kind, cast| ArgClass {
        kind,
        ty: ir.clone(),
        cast,
        size,
        align,
    };

    if size == 0 {
        return class(ArgKind::Ignore, None);
    }
    if !matches!(ir, IrType::Struct(_) | IrType::Array(..)) {
        return class(ArgKind::Direct, None);
    }

    let scalars = layout.scalars(ty);
    // An HFA travels in FP registers whatever its size.
    if arch == TargetArch::Aarch64 {
        if let Some(hfa) = aapcs_hfa(&scalars) {
            return class(ArgKind::Direct, Some(hfa));
        }
    }
    if size > 16 {
        return class(ArgKind::Indirect, None);
    }

    let cast = match arch {
        TargetArch::X86_64 => sysv_coerce(&scalars, size),
        TargetArch::Aarch64 => aapcs_coerce(size),
    };
    class(ArgKind::Direct, Some(cast))
}

/// x86-64 System V: each eightbyte is SSE when it only holds floats,
/// INTEGER otherwise.
fn sysv_coerce(scalars: &[(u64, IrType)], size: u64) -> IrType {
    let mut parts = Vec::new();
    let mut start = 0;
    while start < size {
        let end = (start + 8).min(size);
        let members: Vec<&IrType> = scalars
            .iter()
            .filter(|(offset, _)| *offset >= start && *offset < end)
            .map(|(_, ty)| ty)
            .collect();
        let all_float = !members.is_empty() && members.iter().all(|ty| matches!(ty, IrType::Float(_)));
        let part = if all_float {
            match members.as_slice() {
                [IrType::Float(32)] => IrType::Float(32),
                [IrType::Float(32), IrType::Float(32)] => {
                    IrType::Vector(Box::new(IrType::Float(32)), 2)
                }
                _ => IrType::Float(64),
            }
        } else {
            IrType::Int(((end - start) * 8) as u32)
        };
        parts.push(part);
        start = end;
    }
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        IrType::Struct(parts)
    }
}

/// AArch64 AAPCS64: homogeneous float aggregates of up to four members go
/// in FP registers.
fn aapcs_hfa(scalars: &[(u64, IrType)]) -> Option<IrType> {
    let (_, first @ IrType::Float(_)) = scalars.first()? else {
        return None;
    };
    if scalars.len() <= 4 && scalars.iter().all(|(_, ty)| ty == first) {
        Some(IrType::Array(Box::new(first.clone()), scalars.len() as u64))
    } else {
        None
    }
}

/// Non-HFA aggregates up to 16 bytes go in one or two general registers.
fn aapcs_coerce(size: u64) -> IrType {
    if size <= 8 {
        IrType::Int(64)
    } else {
        IrType::Array(Box::new(IrType::Int(64)), 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Field, TypeTable};

    fn table() -> TypeTable {
        let mut types = TypeTable::new();
        let field = |name: &str, ty: Type| Field {
            name: name.to_string(),
            ty,
        };
        types.add_struct(
            "Pair",
            vec![field("a", Type::int(32)), field("b", Type::int(32))],
        );
        types.add_struct(
            "Vec2",
            vec![field("x", Type::float(32)), field("y", Type::float(32))],
        );
        types.add_struct(
            "Vec2d",
            vec![field("x", Type::float(64)), field("y", Type::float(64))],
        );
        types.add_struct(
            "Triple",
            vec![
                field("a", Type::int(64)),
                field("b", Type::int(64)),
                field("c", Type::int(64)),
            ],
        );
        types.add_struct(
            "Quad",
            vec![
                field("a", Type::float(64)),
                field("b", Type::float(64)),
                field("c", Type::float(64)),
                field("d", Type::float(64)),
            ],
        );
        types.add_struct(
            "Mixed",
            vec![field("n", Type::int(32)), field("f", Type::float(32)), field("d", Type::float(64))],
        );
        types
    }

    fn classify_one(arch: TargetArch, ty: Type) -> ArgClass {
        let types = table();
        let layout = Layout::new(&types);
        let info = classify(
            arch,
            &layout,
            &AbiSignature {
                params: vec![ty],
                ret: Type::Nil,
            },
        );
        assert_eq!(info.ret.kind, ArgKind::Ignore);
        info.args.into_iter().next().unwrap()
    }

    #[test]
    fn scalars_are_direct_without_cast() {
        let class = classify_one(TargetArch::X86_64, Type::int(8));
        assert_eq!(class.kind, ArgKind::Direct);
        assert_eq!(class.cast, None);
        assert_eq!(class.ty, IrType::Int(8));
    }

    #[test]
    fn sysv_packs_two_ints_into_one_eightbyte() {
        let class = classify_one(TargetArch::X86_64, Type::Struct("Pair".into()));
        assert_eq!(class.kind, ArgKind::Direct);
        assert_eq!(class.cast, Some(IrType::Int(64)));
        assert_eq!((class.size, class.align), (8, 4));
    }

    #[test]
    fn sysv_float_pairs_use_sse_classes() {
        let vec2 = classify_one(TargetArch::X86_64, Type::Struct("Vec2".into()));
        assert_eq!(
            vec2.cast,
            Some(IrType::Vector(Box::new(IrType::Float(32)), 2))
        );
        assert_eq!(vec2.native_type().to_string(), "<2 x float>");
        let vec2d = classify_one(TargetArch::X86_64, Type::Struct("Vec2d".into()));
        assert_eq!(
            vec2d.cast,
            Some(IrType::Struct(vec![IrType::Float(64), IrType::Float(64)]))
        );
        let mixed = classify_one(TargetArch::X86_64, Type::Struct("Mixed".into()));
        assert_eq!(
            mixed.cast,
            Some(IrType::Struct(vec![IrType::Int(64), IrType::Float(64)]))
        );
    }

    #[test]
    fn large_aggregates_are_indirect() {
        for arch in [TargetArch::X86_64, TargetArch::Aarch64] {
            let class = classify_one(arch, Type::Struct("Triple".into()));
            assert_eq!(class.kind, ArgKind::Indirect);
            assert_eq!(class.native_type(), IrType::Ptr);
            assert_eq!(class.size, 24);
        }
    }

    #[test]
    fn aapcs_homogeneous_float_aggregate() {
        let class = classify_one(TargetArch::Aarch64, Type::Struct("Vec2d".into()));
        assert_eq!(
            class.cast,
            Some(IrType::Array(Box::new(IrType::Float(64)), 2))
        );
        let pair = classify_one(TargetArch::Aarch64, Type::Struct("Pair".into()));
        assert_eq!(pair.cast, Some(IrType::Int(64)));
    }

    #[test]
    fn aapcs_large_hfa_stays_in_registers() {
        let quad = classify_one(TargetArch::Aarch64, Type::Struct("Quad".into()));
        assert_eq!(quad.kind, ArgKind::Direct);
        assert_eq!(quad.size, 32);
        assert_eq!(
            quad.cast,
            Some(IrType::Array(Box::new(IrType::Float(64)), 4))
        );

        let sysv = classify_one(TargetArch::X86_64, Type::Struct("Quad".into()));
        assert_eq!(sysv.kind, ArgKind::Indirect);
    }

    #[test]
    fn procs_cross_as_function_pointers() {
        let class = classify_one(
            TargetArch::X86_64,
            Type::Proc {
                params: vec![],
                ret: Box::new(Type::Nil),
            },
        );
        assert_eq!(class.kind, ArgKind::Direct);
        assert_eq!(class.ty, IrType::Ptr);
    }
}
