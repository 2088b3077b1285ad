//! Native backend abstraction.
//!
//! The call-lowering core only talks to the backend through [`Backend`]:
//! it allocates stack slots, appends instructions at a single cursor,
//! queries per-target ABI classification and materializes constants.
//! Values, blocks and functions are opaque handles owned by the backend.

pub mod abi;
pub mod cfg;
pub mod layout;
#[cfg(feature = "llvm")]
pub mod llvm;
pub mod recording;

use serde::{Deserialize, Serialize};

use crate::ast::Type;
use crate::errors::CodegenError;

pub use abi::{AbiInfo, AbiSignature, ArgClass, ArgKind, TargetArch};

pub type Result<T> = std::result::Result<T, CodegenError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

/// Machine-level type of a backend value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    Int(u32),
    Float(u32),
    Ptr,
    Struct(Vec<IrType>),
    Array(Box<IrType>, u64),

    /// SIMD vector, used for SSE eightbytes packing two floats.
    Vector(Box<IrType>, u64),
}

impl std::fmt::Display for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Int(bits) => write!(f, "i{}", bits),
            IrType::Float(32) => write!(f, "float"),
            IrType::Float(_) => write!(f, "double"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}", field)?;
                }
                write!(f, " }}")
            }
            IrType::Array(elem, len) => write!(f, "[{} x {}]", len, elem),
            IrType::Vector(elem, len) => write!(f, "<{} x {}>", len, elem),
        }
    }
}

/// Calling convention tag applied to foreign calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallConv {
    #[default]
    C,
    Fast,
    StdCall,
    X86_64SysV,
    Win64,
}

impl CallConv {
    /// LLVM calling-convention number.
    pub fn llvm_id(self) -> u32 {
        match self {
            CallConv::C => 0,
            CallConv::Fast => 8,
            CallConv::StdCall => 64,
            CallConv::X86_64SysV => 78,
            CallConv::Win64 => 79,
        }
    }
}

impl std::fmt::Display for CallConv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallConv::C => write!(f, "ccc"),
            CallConv::Fast => write!(f, "fastcc"),
            CallConv::StdCall => write!(f, "x86_stdcallcc"),
            CallConv::X86_64SysV => write!(f, "x86_64_sysvcc"),
            CallConv::Win64 => write!(f, "win64cc"),
        }
    }
}

/// Function declaration handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
    pub conv: Option<CallConv>,
    pub variadic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    SExt,
    ZExt,
    FpExt,
}

impl std::fmt::Display for CastKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CastKind::SExt => write!(f, "sext"),
            CastKind::ZExt => write!(f, "zext"),
            CastKind::FpExt => write!(f, "fpext"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int { bits: u32, value: i64 },
    Float { bits: u32, value: f64 },
    Str(String),
    Symbol(String),
    /// Typed null pointer.
    Null,
    /// Canonical `nil` placeholder.
    Nil,
    TypeTag(u32),
}

impl Constant {
    pub fn bool(value: bool) -> Self {
        Constant::Int {
            bits: 1,
            value: value as i64,
        }
    }
}

/// Primitives the call-lowering core needs from a native backend.
///
/// Instructions are appended at one cursor; appending to a block that
/// already has a terminator is a backend error.
pub trait Backend {
    fn target(&self) -> TargetArch;

    /// ABI classification of a foreign signature whose variadic tail is
    /// already replaced by the concrete (promoted) argument types.
    fn classify(&self, sig: &AbiSignature) -> Result<AbiInfo>;

    /// Declare `decl`, or return the existing function with that name.
    fn declare_function(&mut self, decl: &FnDecl) -> FuncId;

    /// Give `func` a body: create its entry block, move the cursor there and
    /// return its parameter values.
    fn begin_function(&mut self, func: FuncId) -> Result<Vec<ValueId>>;

    fn new_block(&mut self, label: &str) -> Result<BlockId>;
    fn position_at_end(&mut self, block: BlockId);
    fn insert_block(&self) -> Option<BlockId>;

    /// Whether the block at the cursor already ends in a terminator.
    fn is_terminated(&self) -> bool;

    fn constant(&mut self, constant: Constant) -> ValueId;

    /// Address of a module-level variable.
    fn global(&mut self, name: &str, ty: &IrType) -> ValueId;

    fn alloca(&mut self, ty: &IrType, name: &str) -> Result<ValueId>;
    fn load(&mut self, ty: &IrType, ptr: ValueId) -> Result<ValueId>;
    fn store(&mut self, value: ValueId, ptr: ValueId) -> Result<()>;

    /// Byte copy of `size` bytes between two addresses aligned to `align`.
    fn copy(&mut self, dst: ValueId, src: ValueId, size: u64, align: u32) -> Result<()>;

    fn field_ptr(&mut self, aggregate: &IrType, ptr: ValueId, index: u32) -> Result<ValueId>;
    fn extract_value(&mut self, aggregate: &IrType, value: ValueId, index: u32) -> Result<ValueId>;
    fn cast(&mut self, kind: CastKind, value: ValueId, to: &IrType) -> Result<ValueId>;

    /// Representation change between two language types: widening into a
    /// union, narrowing out of one, or a class upcast.
    fn convert(&mut self, value: ValueId, from: &Type, to: &Type) -> Result<ValueId>;

    fn type_id(&mut self, value: ValueId, ty: &Type) -> Result<ValueId>;

    /// `i1` telling whether `tag` (of a value statically typed `declared`)
    /// names a type acceptable as `candidate`.
    fn match_type_tag(&mut self, declared: &Type, candidate: &Type, tag: ValueId)
        -> Result<ValueId>;

    fn and(&mut self, lhs: ValueId, rhs: ValueId) -> Result<ValueId>;
    fn phi(&mut self, ty: &IrType, incoming: &[(ValueId, BlockId)]) -> Result<ValueId>;

    fn emit_call(&mut self, func: FuncId, args: &[ValueId], conv: Option<CallConv>)
        -> Result<ValueId>;

    fn emit_invoke(
        &mut self,
        func: FuncId,
        args: &[ValueId],
        normal: BlockId,
        handler: BlockId,
        conv: Option<CallConv>,
    ) -> Result<ValueId>;

    /// Catch-all landing pad at the start of a handler block.
    fn landing_pad(&mut self) -> Result<ValueId>;

    /// Callable value pairing `func` with its closure data pointer.
    fn make_closure(&mut self, func: FuncId, data: ValueId) -> Result<ValueId>;

    fn br(&mut self, target: BlockId) -> Result<()>;
    fn cond_br(&mut self, cond: ValueId, then: BlockId, otherwise: BlockId) -> Result<()>;
    fn unreachable(&mut self) -> Result<()>;
    fn ret(&mut self, value: Option<ValueId>) -> Result<()>;
}
