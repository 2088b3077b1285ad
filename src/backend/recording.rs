//! In-memory backend that records every primitive the core issues.
//!
//! Used by the test suite and by `callgen --emit ir`; the recorded
//! functions can be printed as text or analysed with [`super::cfg`].

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::ast::{Type, TypeTable};
use crate::errors::CodegenError;

use super::abi::{self, AbiInfo, AbiSignature, TargetArch};
use super::layout::Layout;
use super::{
    Backend, BlockId, CallConv, CastKind, Constant, FnDecl, FuncId, IrType, Result, ValueId,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Alloca {
        ty: IrType,
        name: String,
    },
    Load {
        ty: IrType,
        ptr: ValueId,
    },
    Store {
        value: ValueId,
        ptr: ValueId,
    },
    Copy {
        dst: ValueId,
        src: ValueId,
        size: u64,
        align: u32,
    },
    FieldPtr {
        ty: IrType,
        ptr: ValueId,
        index: u32,
    },
    ExtractValue {
        ty: IrType,
        value: ValueId,
        index: u32,
    },
    Cast {
        kind: CastKind,
        value: ValueId,
        to: IrType,
    },
    Convert {
        value: ValueId,
        from: Type,
        to: Type,
    },
    TypeId {
        value: ValueId,
        ty: Type,
    },
    MatchTypeTag {
        declared: Type,
        candidate: Type,
        tag: ValueId,
    },
    And {
        lhs: ValueId,
        rhs: ValueId,
    },
    Phi {
        ty: IrType,
        incoming: Vec<(ValueId, BlockId)>,
    },
    Call {
        func: FuncId,
        args: Vec<ValueId>,
        conv: Option<CallConv>,
    },
    Invoke {
        func: FuncId,
        args: Vec<ValueId>,
        normal: BlockId,
        handler: BlockId,
        conv: Option<CallConv>,
    },
    LandingPad,
    MakeClosure {
        func: FuncId,
        data: ValueId,
    },
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then: BlockId,
        otherwise: BlockId,
    },
    Unreachable,
    Ret(Option<ValueId>),
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Invoke { .. } | Op::Br(_) | Op::CondBr { .. } | Op::Unreachable | Op::Ret(_)
        )
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Op::Invoke {
                normal, handler, ..
            } => vec![*normal, *handler],
            Op::Br(target) => vec![*target],
            Op::CondBr {
                then, otherwise, ..
            } => vec![*then, *otherwise],
            _ => Vec::new(),
        }
    }

    pub fn callee(&self) -> Option<FuncId> {
        match self {
            Op::Call { func, .. } | Op::Invoke { func, .. } => Some(*func),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub result: Option<ValueId>,
    pub op: Op,
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub label: String,
    pub func: FuncId,
    pub insts: Vec<Inst>,
}

impl BlockData {
    pub fn terminator(&self) -> Option<&Op> {
        self.insts.last().map(|inst| &inst.op).filter(|op| op.is_terminator())
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub decl: FnDecl,
    pub blocks: Vec<BlockId>,
    pub params: Vec<ValueId>,
}

impl Function {
    pub fn is_defined(&self) -> bool {
        !self.blocks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Const(Constant),
    Param { func: FuncId, index: u32 },
    Global(String),
    Inst(BlockId),
}

pub struct RecordingBackend {
    arch: TargetArch,
    types: TypeTable,
    functions: Vec<Function>,
    by_name: HashMap<String, FuncId>,
    blocks: Vec<BlockData>,
    values: Vec<ValueKind>,
    globals: HashMap<String, ValueId>,
    cursor: Option<BlockId>,
}

impl RecordingBackend {
    pub fn new(arch: TargetArch, types: TypeTable) -> Self {
        Self {
            arch,
            types,
            functions: Vec::new(),
            by_name: HashMap::new(),
            blocks: Vec::new(),
            values: Vec::new(),
            globals: HashMap::new(),
            cursor: None,
        }
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    pub fn function_named(&self, name: &str) -> Option<FuncId> {
        self.by_name.get(name).copied()
    }

    pub fn function(&self, func: FuncId) -> &Function {
        &self.functions[func.0 as usize]
    }

    pub fn func_name(&self, func: FuncId) -> &str {
        &self.function(func).decl.name
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        &self.blocks[block.0 as usize]
    }

    pub fn block_label(&self, block: BlockId) -> &str {
        &self.block(block).label
    }

    pub fn value(&self, value: ValueId) -> &ValueKind {
        &self.values[value.0 as usize]
    }

    pub fn constant_of(&self, value: ValueId) -> Option<&Constant> {
        match self.value(value) {
            ValueKind::Const(constant) => Some(constant),
            _ => None,
        }
    }

    /// The instruction that produced `value`, if it is an instruction result.
    pub fn defining_op(&self, value: ValueId) -> Option<&Op> {
        let ValueKind::Inst(block) = self.value(value) else {
            return None;
        };
        self.block(*block)
            .insts
            .iter()
            .find(|inst| inst.result == Some(value))
            .map(|inst| &inst.op)
    }

    /// Every instruction of `func`, in block creation order.
    pub fn insts(&self, func: FuncId) -> impl Iterator<Item = &Inst> {
        self.function(func)
            .blocks
            .iter()
            .flat_map(move |block| self.block(*block).insts.iter())
    }

    /// Names of the functions called or invoked by `func`, in block order.
    pub fn callees(&self, func: FuncId) -> Vec<&str> {
        self.insts(func)
            .filter_map(|inst| inst.op.callee())
            .map(|callee| self.func_name(callee))
            .collect()
    }

    pub fn count_calls(&self, func: FuncId, callee: &str) -> usize {
        self.callees(func).iter().filter(|name| **name == callee).count()
    }

    fn current_func(&self) -> Result<FuncId> {
        self.cursor
            .map(|block| self.block(block).func)
            .ok_or_else(|| CodegenError::backend("no insertion point"))
    }

    fn new_value(&mut self, kind: ValueKind) -> ValueId {
        self.values.push(kind);
        ValueId(self.values.len() as u32 - 1)
    }

    fn push(&mut self, op: Op, has_result: bool) -> Result<Option<ValueId>> {
        let block = self
            .cursor
            .ok_or_else(|| CodegenError::backend("no insertion point"))?;
        if let Some(term) = self.block(block).terminator() {
            return Err(CodegenError::backend(format!(
                "instruction {:?} appended after terminator {:?} in block {}",
                op,
                term,
                self.block_label(block)
            )));
        }
        let result = has_result.then(|| self.new_value(ValueKind::Inst(block)));
        self.blocks[block.0 as usize].insts.push(Inst { result, op });
        Ok(result)
    }

    fn push_value(&mut self, op: Op) -> Result<ValueId> {
        self.push(op, true)?
            .ok_or_else(|| CodegenError::backend("instruction produced no value"))
    }

    fn push_void(&mut self, op: Op) -> Result<()> {
        self.push(op, false).map(|_| ())
    }

    fn fmt_value(&self, value: ValueId) -> String {
        match self.value(value) {
            ValueKind::Const(Constant::Int { bits, value }) => format!("i{} {}", bits, value),
            ValueKind::Const(Constant::Float { bits, value }) => format!("f{} {}", bits, value),
            ValueKind::Const(Constant::Str(s)) => format!("{:?}", s),
            ValueKind::Const(Constant::Symbol(s)) => format!(":{}", s),
            ValueKind::Const(Constant::Null) => "null".to_string(),
            ValueKind::Const(Constant::Nil) => "nil".to_string(),
            ValueKind::Const(Constant::TypeTag(tag)) => format!("tag {}", tag),
            ValueKind::Global(name) => format!("@{}", name),
            ValueKind::Param { .. } | ValueKind::Inst(_) => format!("%{}", value.0),
        }
    }

    fn fmt_args(&self, args: &[ValueId]) -> String {
        args.iter()
            .map(|arg| self.fmt_value(*arg))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn fmt_block(&self, block: BlockId) -> String {
        format!("%{}.{}", self.block_label(block), block.0)
    }

    fn fmt_op(&self, op: &Op) -> String {
        match op {
            Op::Alloca { ty, name } => format!("alloca {} ; {}", ty, name),
            Op::Load { ty, ptr } => format!("load {}, {}", ty, self.fmt_value(*ptr)),
            Op::Store { value, ptr } => {
                format!("store {}, {}", self.fmt_value(*value), self.fmt_value(*ptr))
            }
            Op::Copy {
                dst,
                src,
                size,
                align,
            } => format!(
                "copy {}, {}, size {}, align {}",
                self.fmt_value(*dst),
                self.fmt_value(*src),
                size,
                align
            ),
            Op::FieldPtr { ty, ptr, index } => {
                format!("field_ptr {}, {}, {}", ty, self.fmt_value(*ptr), index)
            }
            Op::ExtractValue { ty, value, index } => {
                format!("extractvalue {} {}, {}", ty, self.fmt_value(*value), index)
            }
            Op::Cast { kind, value, to } => {
                format!("{} {} to {}", kind, self.fmt_value(*value), to)
            }
            Op::Convert { value, from, to } => {
                format!("convert {} from {} to {}", self.fmt_value(*value), from, to)
            }
            Op::TypeId { value, ty } => format!("type_id {} : {}", self.fmt_value(*value), ty),
            Op::MatchTypeTag {
                declared,
                candidate,
                tag,
            } => format!(
                "match_type_tag {} : {} is {}",
                self.fmt_value(*tag),
                declared,
                candidate
            ),
            Op::And { lhs, rhs } => format!("and {}, {}", self.fmt_value(*lhs), self.fmt_value(*rhs)),
            Op::Phi { ty, incoming } => {
                let arms: Vec<String> = incoming
                    .iter()
                    .map(|(v, b)| format!("[{}, {}]", self.fmt_value(*v), self.fmt_block(*b)))
                    .collect();
                format!("phi {} {}", ty, arms.join(", "))
            }
            Op::Call { func, args, conv } => format!(
                "call {}@{}({})",
                conv.map(|c| format!("{} ", c)).unwrap_or_default(),
                self.func_name(*func),
                self.fmt_args(args)
            ),
            Op::Invoke {
                func,
                args,
                normal,
                handler,
                conv,
            } => format!(
                "invoke {}@{}({}) to {} unwind {}",
                conv.map(|c| format!("{} ", c)).unwrap_or_default(),
                self.func_name(*func),
                self.fmt_args(args),
                self.fmt_block(*normal),
                self.fmt_block(*handler)
            ),
            Op::LandingPad => "landingpad catch-all".to_string(),
            Op::MakeClosure { func, data } => format!(
                "closure @{}, {}",
                self.func_name(*func),
                self.fmt_value(*data)
            ),
            Op::Br(target) => format!("br {}", self.fmt_block(*target)),
            Op::CondBr {
                cond,
                then,
                otherwise,
            } => format!(
                "br {}, {}, {}",
                self.fmt_value(*cond),
                self.fmt_block(*then),
                self.fmt_block(*otherwise)
            ),
            Op::Unreachable => "unreachable".to_string(),
            Op::Ret(Some(value)) => format!("ret {}", self.fmt_value(*value)),
            Op::Ret(None) => "ret void".to_string(),
        }
    }

    /// Textual dump of one function.
    pub fn print_function(&self, func: FuncId) -> String {
        let function = self.function(func);
        let decl = &function.decl;
        let mut out = String::new();
        let params: Vec<String> = decl.params.iter().map(ToString::to_string).collect();
        let keyword = if function.is_defined() { "define" } else { "declare" };
        let _ = write!(
            out,
            "{} {}{} @{}({}{})",
            keyword,
            decl.conv.map(|c| format!("{} ", c)).unwrap_or_default(),
            decl.ret,
            decl.name,
            params.join(", "),
            if decl.variadic { ", ..." } else { "" }
        );
        if !function.is_defined() {
            out.push('\n');
            return out;
        }
        out.push_str(" {\n");
        for block in &function.blocks {
            let _ = writeln!(out, "{}.{}:", self.block_label(*block), block.0);
            for inst in &self.block(*block).insts {
                match inst.result {
                    Some(result) => {
                        let _ = writeln!(out, "  %{} = {}", result.0, self.fmt_op(&inst.op));
                    }
                    None => {
                        let _ = writeln!(out, "  {}", self.fmt_op(&inst.op));
                    }
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

impl std::fmt::Display for RecordingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (func, _)) in self.functions().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", self.print_function(func))?;
        }
        Ok(())
    }
}

impl Backend for RecordingBackend {
    fn target(&self) -> TargetArch {
        self.arch
    }

    fn classify(&self, sig: &AbiSignature) -> Result<AbiInfo> {
        Ok(abi::classify(self.arch, &Layout::new(&self.types), sig))
    }

    fn declare_function(&mut self, decl: &FnDecl) -> FuncId {
        if let Some(existing) = self.by_name.get(&decl.name) {
            return *existing;
        }
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Function {
            decl: decl.clone(),
            blocks: Vec::new(),
            params: Vec::new(),
        });
        self.by_name.insert(decl.name.clone(), id);
        id
    }

    fn begin_function(&mut self, func: FuncId) -> Result<Vec<ValueId>> {
        if self.function(func).is_defined() {
            return Err(CodegenError::backend(format!(
                "function @{} already has a body",
                self.func_name(func)
            )));
        }
        let params: Vec<ValueId> = (0..self.function(func).decl.params.len())
            .map(|index| {
                self.new_value(ValueKind::Param {
                    func,
                    index: index as u32,
                })
            })
            .collect();
        self.functions[func.0 as usize].params = params.clone();
        self.cursor = Some(self.append_block(func, "entry"));
        Ok(params)
    }

    fn new_block(&mut self, label: &str) -> Result<BlockId> {
        let func = self.current_func()?;
        Ok(self.append_block(func, label))
    }

    fn position_at_end(&mut self, block: BlockId) {
        self.cursor = Some(block);
    }

    fn insert_block(&self) -> Option<BlockId> {
        self.cursor
    }

    fn is_terminated(&self) -> bool {
        self.cursor
            .is_some_and(|block| self.block(block).terminator().is_some())
    }

    fn constant(&mut self, constant: Constant) -> ValueId {
        self.new_value(ValueKind::Const(constant))
    }

    fn global(&mut self, name: &str, _ty: &IrType) -> ValueId {
        if let Some(existing) = self.globals.get(name) {
            return *existing;
        }
        let value = self.new_value(ValueKind::Global(name.to_string()));
        self.globals.insert(name.to_string(), value);
        value
    }

    fn alloca(&mut self, ty: &IrType, name: &str) -> Result<ValueId> {
        self.push_value(Op::Alloca {
            ty: ty.clone(),
            name: name.to_string(),
        })
    }

    fn load(&mut self, ty: &IrType, ptr: ValueId) -> Result<ValueId> {
        self.push_value(Op::Load {
            ty: ty.clone(),
            ptr,
        })
    }

    fn store(&mut self, value: ValueId, ptr: ValueId) -> Result<()> {
        self.push_void(Op::Store { value, ptr })
    }

    fn copy(&mut self, dst: ValueId, src: ValueId, size: u64, align: u32) -> Result<()> {
        self.push_void(Op::Copy {
            dst,
            src,
            size,
            align,
        })
    }

    fn field_ptr(&mut self, aggregate: &IrType, ptr: ValueId, index: u32) -> Result<ValueId> {
        self.push_value(Op::FieldPtr {
            ty: aggregate.clone(),
            ptr,
            index,
        })
    }

    fn extract_value(&mut self, aggregate: &IrType, value: ValueId, index: u32) -> Result<ValueId> {
        self.push_value(Op::ExtractValue {
            ty: aggregate.clone(),
            value,
            index,
        })
    }

    fn cast(&mut self, kind: CastKind, value: ValueId, to: &IrType) -> Result<ValueId> {
        self.push_value(Op::Cast {
            kind,
            value,
            to: to.clone(),
        })
    }

    fn convert(&mut self, value: ValueId, from: &Type, to: &Type) -> Result<ValueId> {
        self.push_value(Op::Convert {
            value,
            from: from.clone(),
            to: to.clone(),
        })
    }

    fn type_id(&mut self, value: ValueId, ty: &Type) -> Result<ValueId> {
        self.push_value(Op::TypeId {
            value,
            ty: ty.clone(),
        })
    }

    fn match_type_tag(
        &mut self,
        declared: &Type,
        candidate: &Type,
        tag: ValueId,
    ) -> Result<ValueId> {
        self.push_value(Op::MatchTypeTag {
            declared: declared.clone(),
            candidate: candidate.clone(),
            tag,
        })
    }

    fn and(&mut self, lhs: ValueId, rhs: ValueId) -> Result<ValueId> {
        self.push_value(Op::And { lhs, rhs })
    }

    fn phi(&mut self, ty: &IrType, incoming: &[(ValueId, BlockId)]) -> Result<ValueId> {
        self.push_value(Op::Phi {
            ty: ty.clone(),
            incoming: incoming.to_vec(),
        })
    }

    fn emit_call(
        &mut self,
        func: FuncId,
        args: &[ValueId],
        conv: Option<CallConv>,
    ) -> Result<ValueId> {
        self.push_value(Op::Call {
            func,
            args: args.to_vec(),
            conv,
        })
    }

    fn emit_invoke(
        &mut self,
        func: FuncId,
        args: &[ValueId],
        normal: BlockId,
        handler: BlockId,
        conv: Option<CallConv>,
    ) -> Result<ValueId> {
        self.push_value(Op::Invoke {
            func,
            args: args.to_vec(),
            normal,
            handler,
            conv,
        })
    }

    fn landing_pad(&mut self) -> Result<ValueId> {
        self.push_value(Op::LandingPad)
    }

    fn make_closure(&mut self, func: FuncId, data: ValueId) -> Result<ValueId> {
        self.push_value(Op::MakeClosure { func, data })
    }

    fn br(&mut self, target: BlockId) -> Result<()> {
        self.push_void(Op::Br(target))
    }

    fn cond_br(&mut self, cond: ValueId, then: BlockId, otherwise: BlockId) -> Result<()> {
        self.push_void(Op::CondBr {
            cond,
            then,
            otherwise,
        })
    }

    fn unreachable(&mut self) -> Result<()> {
        self.push_void(Op::Unreachable)
    }

    fn ret(&mut self, value: Option<ValueId>) -> Result<()> {
        self.push_void(Op::Ret(value))
    }
}

impl RecordingBackend {
    fn append_block(&mut self, func: FuncId, label: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            label: label.to_string(),
            func,
            insts: Vec::new(),
        });
        self.functions[func.0 as usize].blocks.push(id);
        id
    }
}
