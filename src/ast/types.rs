use serde::{Deserialize, Serialize};

/// Resolved static type of an expression, parameter or definition owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Nil,
    Bool,
    Char,
    Symbol,
    String,
    Int {
        bits: u32,
        signed: bool,
    },
    Float {
        bits: u32,
    },
    Pointer(Box<Type>),

    /// First-class callable: a function pointer plus closure data.
    Proc {
        params: Vec<Type>,
        ret: Box<Type>,
    },

    /// Value type, passed by value.
    Struct(String),

    /// Reference type, passed as a pointer to the instance.
    Class(String),

    /// The type of a type; carries no runtime value, only its tag.
    Metaclass(String),

    /// Mixed union, stored as `{ tag, payload }` and passed by value.
    Union(Vec<Type>),

    /// Owner of top-level definitions. Never passed as a receiver.
    Program,

    NoReturn,
}

impl Type {
    pub fn int(bits: u32) -> Self {
        Type::Int { bits, signed: true }
    }

    pub fn uint(bits: u32) -> Self {
        Type::Int {
            bits,
            signed: false,
        }
    }

    pub fn float(bits: u32) -> Self {
        Type::Float { bits }
    }

    pub fn pointer(pointee: Type) -> Self {
        Type::Pointer(Box::new(pointee))
    }

    /// Merge several types into one: unions are flattened, duplicates dropped
    /// (first occurrence wins the position) and `NoReturn` members vanish.
    pub fn merge<I>(types: I) -> Type
    where
        I: IntoIterator<Item = Type>,
    {
        let mut members: Vec<Type> = Vec::new();
        for ty in types {
            match ty {
                Type::NoReturn => {}
                Type::Union(inner) => {
                    for member in inner {
                        if !members.contains(&member) {
                            members.push(member);
                        }
                    }
                }
                other => {
                    if !members.contains(&other) {
                        members.push(other);
                    }
                }
            }
        }
        match members.len() {
            0 => Type::NoReturn,
            1 => members.pop().unwrap_or(Type::NoReturn),
            _ => Type::Union(members),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Type::Nil)
    }

    pub fn is_no_return(&self) -> bool {
        matches!(self, Type::NoReturn)
    }

    pub fn is_union(&self) -> bool {
        matches!(self, Type::Union(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_proc(&self) -> bool {
        matches!(self, Type::Proc { .. })
    }

    pub fn is_float32(&self) -> bool {
        matches!(self, Type::Float { bits: 32 })
    }

    /// Aggregates live in stack storage and are loaded when passed by value.
    pub fn passed_by_value(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Union(_))
    }

    /// Whether a definition owned by this type receives `self`.
    pub fn passed_as_self(&self) -> bool {
        !matches!(self, Type::Program)
    }

    /// Whether values of this type exist at run time at all.
    pub fn has_value(&self) -> bool {
        !matches!(self, Type::Program | Type::NoReturn | Type::Metaclass(_))
    }

    pub fn union_members(&self) -> &[Type] {
        match self {
            Type::Union(members) => members,
            other => std::slice::from_ref(other),
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Nil => write!(f, "Nil"),
            Type::Bool => write!(f, "Bool"),
            Type::Char => write!(f, "Char"),
            Type::Symbol => write!(f, "Symbol"),
            Type::String => write!(f, "String"),
            Type::Int { bits, signed: true } => write!(f, "Int{}", bits),
            Type::Int {
                bits,
                signed: false,
            } => write!(f, "UInt{}", bits),
            Type::Float { bits } => write!(f, "Float{}", bits),
            Type::Pointer(pointee) => write!(f, "Pointer({})", pointee),
            Type::Proc { params, ret } => {
                write!(f, "Proc(")?;
                for param in params {
                    write!(f, "{}, ", param)?;
                }
                write!(f, "{})", ret)
            }
            Type::Struct(name) | Type::Class(name) => write!(f, "{}", name),
            Type::Metaclass(name) => write!(f, "{}.class", name),
            Type::Union(members) => {
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", member)?;
                }
                Ok(())
            }
            Type::Program => write!(f, "<Program>"),
            Type::NoReturn => write!(f, "NoReturn"),
        }
    }
}

// ── Type declarations ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// Struct and class declarations of a resolved program, plus the
/// numbering of runtime type tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTable {
    #[serde(default)]
    pub structs: Vec<TypeDecl>,
    #[serde(default)]
    pub classes: Vec<TypeDecl>,
}

/// First tag handed out to user-declared structs and classes.
const FIRST_DECLARED_TAG: u32 = 64;

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_struct(&mut self, name: &str, fields: Vec<Field>) {
        self.structs.push(TypeDecl {
            name: name.to_string(),
            parent: None,
            fields,
        });
    }

    pub fn add_class(&mut self, name: &str, parent: Option<&str>, fields: Vec<Field>) {
        self.classes.push(TypeDecl {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            fields,
        });
    }

    pub fn struct_decl(&self, name: &str) -> Option<&TypeDecl> {
        self.structs.iter().find(|decl| decl.name == name)
    }

    pub fn class_decl(&self, name: &str) -> Option<&TypeDecl> {
        self.classes.iter().find(|decl| decl.name == name)
    }

    /// Fields in layout order. A class instance starts with its
    /// ancestors' fields.
    pub fn fields_of(&self, ty: &Type) -> Option<Vec<Field>> {
        match ty {
            Type::Struct(name) => self.struct_decl(name).map(|decl| decl.fields.clone()),
            Type::Class(name) => {
                let decl = self.class_decl(name)?;
                let mut fields = match &decl.parent {
                    Some(parent) => self.fields_of(&Type::Class(parent.clone()))?,
                    None => Vec::new(),
                };
                fields.extend(decl.fields.iter().cloned());
                Some(fields)
            }
            _ => None,
        }
    }

    pub fn field_index(&self, owner: &Type, field: &str) -> Option<(usize, Field)> {
        self.fields_of(owner)?
            .into_iter()
            .enumerate()
            .find(|(_, f)| f.name == field)
    }

    fn class_parent(&self, name: &str) -> Option<&str> {
        self.class_decl(name).and_then(|decl| decl.parent.as_deref())
    }

    /// Whether a value whose concrete type is `concrete` may flow where
    /// `declared` is expected.
    pub fn is_subtype(&self, concrete: &Type, declared: &Type) -> bool {
        if concrete == declared || concrete.is_no_return() {
            return true;
        }
        match (concrete, declared) {
            (Type::Union(members), _) => members.iter().all(|m| self.is_subtype(m, declared)),
            (_, Type::Union(members)) => members.iter().any(|m| self.is_subtype(concrete, m)),
            (Type::Class(name), Type::Class(target)) => {
                let mut current = self.class_parent(name);
                while let Some(parent) = current {
                    if parent == target {
                        return true;
                    }
                    current = self.class_parent(parent);
                }
                false
            }
            _ => false,
        }
    }

    /// Runtime tag identifying a concrete type. Unions have no tag of
    /// their own; their members do.
    pub fn type_tag(&self, ty: &Type) -> Option<u32> {
        let tag = match ty {
            Type::Nil => 0,
            Type::Bool => 1,
            Type::Char => 2,
            Type::Symbol => 3,
            Type::String => 4,
            Type::Int { bits, signed } => {
                let base = if *signed { 8 } else { 16 };
                base + bits.trailing_zeros()
            }
            Type::Float { bits } => 24 + bits.trailing_zeros(),
            Type::Pointer(_) => 32,
            Type::Proc { .. } => 33,
            Type::Struct(name) => {
                let index = self.structs.iter().position(|d| &d.name == name)?;
                FIRST_DECLARED_TAG + index as u32
            }
            Type::Class(name) | Type::Metaclass(name) => {
                let index = self.classes.iter().position(|d| &d.name == name)?;
                let tag = FIRST_DECLARED_TAG + (self.structs.len() + index) as u32;
                if matches!(ty, Type::Metaclass(_)) {
                    tag | 0x8000_0000
                } else {
                    tag
                }
            }
            Type::Union(_) | Type::Program | Type::NoReturn => return None,
        };
        Some(tag)
    }

    /// Every concrete tag a value of `declared` type may carry that is also
    /// acceptable for `candidate`.
    pub fn matching_tags(&self, declared: &Type, candidate: &Type) -> Vec<u32> {
        let mut tags = Vec::new();
        for member in declared.union_members() {
            if self.is_subtype(member, candidate) {
                tags.extend(self.type_tag(member));
            }
            if let Type::Class(name) = member {
                for decl in &self.classes {
                    let sub = Type::Class(decl.name.clone());
                    if decl.name != *name
                        && self.is_subtype(&sub, member)
                        && self.is_subtype(&sub, candidate)
                    {
                        tags.extend(self.type_tag(&sub));
                    }
                }
            }
        }
        tags.sort_unstable();
        tags.dedup();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_flattens_and_keeps_first_order() {
        let merged = Type::merge(vec![
            Type::int(32),
            Type::Union(vec![Type::String, Type::int(32)]),
            Type::NoReturn,
        ]);
        assert_eq!(merged, Type::Union(vec![Type::int(32), Type::String]));
    }

    #[test]
    fn merge_of_only_no_return_is_no_return() {
        assert_eq!(Type::merge(vec![Type::NoReturn]), Type::NoReturn);
        assert_eq!(Type::merge(vec![Type::Nil, Type::NoReturn]), Type::Nil);
    }

    #[test]
    fn class_subtyping_walks_parents() {
        let mut table = TypeTable::new();
        table.add_class("Animal", None, vec![]);
        table.add_class("Dog", Some("Animal"), vec![]);
        let dog = Type::Class("Dog".into());
        let animal = Type::Class("Animal".into());
        assert!(table.is_subtype(&dog, &animal));
        assert!(!table.is_subtype(&animal, &dog));
        assert!(table.is_subtype(&dog, &Type::Union(vec![Type::Nil, animal])));
    }

    #[test]
    fn subclass_fields_follow_parent_fields() {
        let mut table = TypeTable::new();
        table.add_class(
            "Base",
            None,
            vec![Field {
                name: "a".into(),
                ty: Type::int(32),
            }],
        );
        table.add_class(
            "Derived",
            Some("Base"),
            vec![Field {
                name: "b".into(),
                ty: Type::Bool,
            }],
        );
        let (index, field) = table
            .field_index(&Type::Class("Derived".into()), "b")
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(field.ty, Type::Bool);
    }

    #[test]
    fn tags_are_distinct_for_int_widths() {
        let table = TypeTable::new();
        assert_ne!(table.type_tag(&Type::int(8)), table.type_tag(&Type::int(32)));
        assert_ne!(table.type_tag(&Type::int(32)), table.type_tag(&Type::uint(32)));
        assert_eq!(table.type_tag(&Type::Union(vec![Type::Nil])), None);
    }
}
