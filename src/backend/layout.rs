use crate::ast::{Type, TypeTable};

use super::IrType;

pub const POINTER_SIZE: u64 = 8;

/// Class instances start with an `i32` holding the concrete type tag.
pub const TYPE_HEADER: IrType = IrType::Int(32);

/// Machine representation of language types. Both supported targets are
/// LP64, so sizes do not depend on the architecture.
pub struct Layout<'t> {
    types: &'t TypeTable,
}

impl<'t> Layout<'t> {
    pub fn new(types: &'t TypeTable) -> Self {
        Self { types }
    }

    pub fn types(&self) -> &'t TypeTable {
        self.types
    }

    /// Representation in the uniform (internal) convention.
    pub fn ir_type(&self, ty: &Type) -> IrType {
        match ty {
            Type::Nil => IrType::Struct(Vec::new()),
            Type::Bool => IrType::Int(1),
            Type::Char | Type::Symbol | Type::Metaclass(_) => IrType::Int(32),
            Type::Int { bits, .. } => IrType::Int(*bits),
            Type::Float { bits } => IrType::Float(*bits),
            Type::String | Type::Class(_) | Type::Pointer(_) => IrType::Ptr,
            Type::Proc { .. } => IrType::Struct(vec![IrType::Ptr, IrType::Ptr]),
            Type::Struct(_) => self.instance_ir_type(ty),
            Type::Union(members) => {
                let payload = members
                    .iter()
                    .map(|m| self.ir_size(&self.ir_type(m)))
                    .max()
                    .unwrap_or(0);
                IrType::Struct(vec![
                    IrType::Int(32),
                    IrType::Array(Box::new(IrType::Int(64)), payload.div_ceil(8)),
                ])
            }
            Type::Program | Type::NoReturn => IrType::Void,
        }
    }

    /// Storage layout of a struct value or of a class instance. Instances
    /// put [`TYPE_HEADER`] ahead of their fields.
    pub fn instance_ir_type(&self, ty: &Type) -> IrType {
        let fields = self.types.fields_of(ty).unwrap_or_default();
        let header = matches!(ty, Type::Class(_)).then_some(TYPE_HEADER);
        IrType::Struct(
            header
                .into_iter()
                .chain(fields.iter().map(|f| self.ir_type(&f.ty)))
                .collect(),
        )
    }

    /// Position of the `index`th declared field inside [`Self::instance_ir_type`].
    pub fn field_slot(&self, owner: &Type, index: usize) -> u32 {
        match owner {
            Type::Class(_) => index as u32 + 1,
            _ => index as u32,
        }
    }

    /// Return representation: types without a value return `void`.
    pub fn ret_ir_type(&self, ty: &Type) -> IrType {
        match ty {
            Type::Nil | Type::NoReturn | Type::Program => IrType::Void,
            other => self.ir_type(other),
        }
    }

    /// Representation when crossing a foreign boundary: procs travel as a
    /// bare function pointer and `nil` has no representation at all.
    pub fn c_ir_type(&self, ty: &Type) -> IrType {
        match ty {
            Type::Proc { .. } => IrType::Ptr,
            Type::Nil | Type::NoReturn | Type::Program => IrType::Void,
            other => self.ir_type(other),
        }
    }

    pub fn size_of(&self, ty: &Type) -> u64 {
        self.ir_size(&self.c_ir_type(ty))
    }

    pub fn align_of(&self, ty: &Type) -> u32 {
        self.ir_align(&self.c_ir_type(ty))
    }

    pub fn ir_size(&self, ty: &IrType) -> u64 {
        match ty {
            IrType::Void => 0,
            IrType::Int(bits) => (u64::from(*bits).div_ceil(8)).next_power_of_two(),
            IrType::Float(bits) => u64::from(*bits) / 8,
            IrType::Ptr => POINTER_SIZE,
            IrType::Struct(fields) => {
                let mut offset = 0;
                for field in fields {
                    offset = align_to(offset, self.ir_align(field)) + self.ir_size(field);
                }
                align_to(offset, self.ir_align(ty))
            }
            IrType::Array(elem, len) | IrType::Vector(elem, len) => self.ir_size(elem) * len,
        }
    }

    pub fn ir_align(&self, ty: &IrType) -> u32 {
        match ty {
            IrType::Void => 1,
            IrType::Int(_) | IrType::Float(_) | IrType::Ptr => self.ir_size(ty).clamp(1, 16) as u32,
            IrType::Struct(fields) => fields.iter().map(|f| self.ir_align(f)).max().unwrap_or(1),
            IrType::Array(elem, _) => self.ir_align(elem),
            IrType::Vector(..) => self.ir_size(ty).clamp(1, 16) as u32,
        }
    }

    /// Scalar leaves of a C-view type with their byte offsets.
    pub fn scalars(&self, ty: &Type) -> Vec<(u64, IrType)> {
        let mut out = Vec::new();
        self.collect_scalars(&self.c_ir_type(ty), 0, &mut out);
        out
    }

    fn collect_scalars(&self, ty: &IrType, base: u64, out: &mut Vec<(u64, IrType)>) {
        match ty {
            IrType::Void => {}
            IrType::Struct(fields) => {
                let mut offset = 0;
                for field in fields {
                    offset = align_to(offset, self.ir_align(field));
                    self.collect_scalars(field, base + offset, out);
                    offset += self.ir_size(field);
                }
            }
            IrType::Array(elem, len) | IrType::Vector(elem, len) => {
                let size = self.ir_size(elem);
                for i in 0..*len {
                    self.collect_scalars(elem, base + i * size, out);
                }
            }
            scalar => out.push((base, scalar.clone())),
        }
    }
}

fn align_to(offset: u64, align: u32) -> u64 {
    offset.div_ceil(u64::from(align)) * u64::from(align)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Field;

    #[test]
    fn struct_layout_pads_fields() {
        let mut types = TypeTable::new();
        types.add_struct(
            "Mixed",
            vec![
                Field {
                    name: "flag".into(),
                    ty: Type::Bool,
                },
                Field {
                    name: "value".into(),
                    ty: Type::float(64),
                },
            ],
        );
        let layout = Layout::new(&types);
        let mixed = Type::Struct("Mixed".into());
        assert_eq!(layout.size_of(&mixed), 16);
        assert_eq!(layout.align_of(&mixed), 8);
        assert_eq!(
            layout.scalars(&mixed),
            vec![(0, IrType::Int(1)), (8, IrType::Float(64))]
        );
    }

    #[test]
    fn class_instances_lead_with_a_type_header() {
        let mut types = TypeTable::new();
        types.add_class(
            "Animal",
            None,
            vec![Field {
                name: "legs".into(),
                ty: Type::int(64),
            }],
        );
        types.add_class(
            "Dog",
            Some("Animal"),
            vec![Field {
                name: "bark".into(),
                ty: Type::Bool,
            }],
        );
        let layout = Layout::new(&types);
        let dog = Type::Class("Dog".into());
        assert_eq!(
            layout.instance_ir_type(&dog),
            IrType::Struct(vec![TYPE_HEADER, IrType::Int(64), IrType::Int(1)])
        );
        let (index, _) = types.field_index(&dog, "bark").unwrap();
        assert_eq!(layout.field_slot(&dog, index), 2);

        let point = Type::Struct("Point".into());
        assert_eq!(layout.field_slot(&point, 0), 0);
    }

    #[test]
    fn vectors_align_to_their_size() {
        let types = TypeTable::new();
        let layout = Layout::new(&types);
        let pair = IrType::Vector(Box::new(IrType::Float(32)), 2);
        assert_eq!((layout.ir_size(&pair), layout.ir_align(&pair)), (8, 8));
    }

    #[test]
    fn union_reserves_tag_and_payload() {
        let types = TypeTable::new();
        let layout = Layout::new(&types);
        let union = Type::Union(vec![Type::int(32), Type::String]);
        assert_eq!(
            layout.ir_type(&union),
            IrType::Struct(vec![
                IrType::Int(32),
                IrType::Array(Box::new(IrType::Int(64)), 1)
            ])
        );
        assert_eq!(layout.size_of(&union), 16);
    }
}
