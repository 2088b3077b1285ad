//! LLVM implementation of [`Backend`] on top of inkwell.
//!
//! Handles are indices into tables of inkwell values, so the call-lowering
//! core stays independent of the `'ctx` lifetime.

use std::collections::HashMap;
use std::path::Path;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, StructType};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValue, BasicValueEnum, FunctionValue, IntValue, PointerValue,
    ValueKind as LlvmValueKind,
};
use inkwell::{AddressSpace, IntPredicate};

use crate::ast::{Type, TypeTable};
use crate::errors::CodegenError;

use super::abi::{self, AbiInfo, AbiSignature, TargetArch};
use super::layout::Layout;
use super::{
    Backend, BlockId, CallConv, CastKind, Constant, FnDecl, FuncId, IrType, Result, ValueId,
};

macro_rules! emit {
    ($s:ident . $method:ident ( $($arg:expr),* $(,)? )) => {
        $s.builder
            .$method( $($arg),* )
            .map_err(|e| CodegenError::backend(format!("{}: {:?}", stringify!($method), e)))?
    };
}

const PERSONALITY: &str = "__gxx_personality_v0";

pub struct LlvmBackend<'ctx> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,
    arch: TargetArch,
    types: TypeTable,
    values: Vec<BasicValueEnum<'ctx>>,
    blocks: Vec<BasicBlock<'ctx>>,
    functions: Vec<FunctionValue<'ctx>>,
    by_name: HashMap<String, FuncId>,
    symbols: HashMap<String, u64>,
}

impl<'ctx> LlvmBackend<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str, arch: TargetArch, types: TypeTable) -> Self {
        Self {
            context,
            module: context.create_module(module_name),
            builder: context.create_builder(),
            arch,
            types,
            values: Vec::new(),
            blocks: Vec::new(),
            functions: Vec::new(),
            by_name: HashMap::new(),
            symbols: HashMap::new(),
        }
    }

    pub fn verify(&self) -> Result<()> {
        self.module
            .verify()
            .map_err(|e| CodegenError::backend(format!("module failed verification: {}", e)))
    }

    pub fn print_to_string(&self) -> String {
        self.module.print_to_string().to_string()
    }

    pub fn emit_ir(&self, path: &Path) -> Result<()> {
        self.module
            .print_to_file(path)
            .map_err(|e| CodegenError::backend(format!("cannot write {}: {}", path.display(), e)))
    }

    // ── Handles ────────────────────────────────────────────────────

    fn push(&mut self, value: BasicValueEnum<'ctx>) -> ValueId {
        self.values.push(value);
        ValueId(self.values.len() as u32 - 1)
    }

    fn value(&self, value: ValueId) -> Result<BasicValueEnum<'ctx>> {
        self.values
            .get(value.0 as usize)
            .copied()
            .ok_or_else(|| CodegenError::backend(format!("unknown value %{}", value.0)))
    }

    fn pointer(&self, value: ValueId) -> Result<PointerValue<'ctx>> {
        match self.value(value)? {
            BasicValueEnum::PointerValue(ptr) => Ok(ptr),
            other => Err(CodegenError::backend(format!("expected a pointer, got {:?}", other))),
        }
    }

    fn int(&self, value: ValueId) -> Result<IntValue<'ctx>> {
        match self.value(value)? {
            BasicValueEnum::IntValue(int) => Ok(int),
            other => Err(CodegenError::backend(format!("expected an integer, got {:?}", other))),
        }
    }

    fn block(&self, block: BlockId) -> Result<BasicBlock<'ctx>> {
        self.blocks
            .get(block.0 as usize)
            .copied()
            .ok_or_else(|| CodegenError::backend(format!("unknown block #{}", block.0)))
    }

    fn function(&self, func: FuncId) -> Result<FunctionValue<'ctx>> {
        self.functions
            .get(func.0 as usize)
            .copied()
            .ok_or_else(|| CodegenError::backend(format!("unknown function #{}", func.0)))
    }

    fn current_function(&self) -> Result<FunctionValue<'ctx>> {
        self.builder
            .get_insert_block()
            .and_then(|block| block.get_parent())
            .ok_or_else(|| CodegenError::backend("no insertion point"))
    }

    // ── Types ──────────────────────────────────────────────────────

    fn nil_type(&self) -> StructType<'ctx> {
        self.context.struct_type(&[], false)
    }

    fn basic_type(&self, ty: &IrType) -> BasicTypeEnum<'ctx> {
        match ty {
            IrType::Void => self.nil_type().into(),
            IrType::Int(bits) => self.context.custom_width_int_type(*bits).into(),
            IrType::Float(32) => self.context.f32_type().into(),
            IrType::Float(_) => self.context.f64_type().into(),
            IrType::Ptr => self.context.ptr_type(AddressSpace::default()).into(),
            IrType::Struct(fields) => self.struct_type(fields).into(),
            IrType::Array(elem, len) => self.basic_type(elem).array_type(*len as u32).into(),
            IrType::Vector(elem, len) => match self.basic_type(elem) {
                BasicTypeEnum::FloatType(float) => float.vec_type(*len as u32).into(),
                BasicTypeEnum::IntType(int) => int.vec_type(*len as u32).into(),
                other => other.array_type(*len as u32).into(),
            },
        }
    }

    fn struct_type(&self, fields: &[IrType]) -> StructType<'ctx> {
        let fields: Vec<BasicTypeEnum> = fields.iter().map(|f| self.basic_type(f)).collect();
        self.context.struct_type(&fields, false)
    }

    fn layout(&self) -> Layout<'_> {
        Layout::new(&self.types)
    }

    fn nil_value(&mut self) -> ValueId {
        let nil = self.nil_type().const_zero();
        self.push(nil.into())
    }

    fn personality(&mut self) -> FunctionValue<'ctx> {
        if let Some(existing) = self.module.get_function(PERSONALITY) {
            return existing;
        }
        let fn_type = self.context.i32_type().fn_type(&[], true);
        self.module.add_function(PERSONALITY, fn_type, None)
    }

    /// Alloca at the top of the entry block, the way clang lays out locals.
    fn entry_alloca(&self, ty: BasicTypeEnum<'ctx>, name: &str) -> Result<PointerValue<'ctx>> {
        let function = self.current_function()?;
        let entry = function
            .get_first_basic_block()
            .ok_or_else(|| CodegenError::backend("function has no entry block"))?;
        let builder = self.context.create_builder();
        match entry.get_first_instruction() {
            Some(first) => builder.position_before(&first),
            None => builder.position_at_end(entry),
        }
        builder
            .build_alloca(ty, name)
            .map_err(|e| CodegenError::backend(format!("build_alloca: {:?}", e)))
    }

    fn tag_of_union(&mut self, ptr: PointerValue<'ctx>, union: &Type) -> Result<IntValue<'ctx>> {
        let union_ty = self.struct_for(union);
        let tag_ptr = emit!(self.build_struct_gep(union_ty, ptr, 0, "tag_ptr"));
        let tag = emit!(self.build_load(self.context.i32_type(), tag_ptr, "tag"));
        Ok(tag.into_int_value())
    }

    /// Concrete tag stored in the header of a class instance.
    fn tag_of_instance(&mut self, ptr: PointerValue<'ctx>, class: &Type) -> Result<IntValue<'ctx>> {
        let instance = match self.layout().instance_ir_type(class) {
            IrType::Struct(fields) => self.struct_type(&fields),
            other => return Err(CodegenError::backend(format!("instance of {} is {}", class, other))),
        };
        let header = emit!(self.build_struct_gep(instance, ptr, 0, "type_header"));
        let tag = emit!(self.build_load(self.context.i32_type(), header, "type_id"));
        Ok(tag.into_int_value())
    }

    fn struct_for(&self, ty: &Type) -> StructType<'ctx> {
        match self.layout().ir_type(ty) {
            IrType::Struct(fields) => self.struct_type(&fields),
            other => self.context.struct_type(&[self.basic_type(&other)], false),
        }
    }
}

impl<'ctx> Backend for LlvmBackend<'ctx> {
    fn target(&self) -> TargetArch {
        self.arch
    }

    fn classify(&self, sig: &AbiSignature) -> Result<AbiInfo> {
        Ok(abi::classify(self.arch, &self.layout(), sig))
    }

    fn declare_function(&mut self, decl: &FnDecl) -> FuncId {
        if let Some(existing) = self.by_name.get(&decl.name) {
            return *existing;
        }
        let params: Vec<BasicMetadataTypeEnum> =
            decl.params.iter().map(|p| self.basic_type(p).into()).collect();
        let fn_type = match &decl.ret {
            IrType::Void => self.context.void_type().fn_type(&params, decl.variadic),
            ret => self.basic_type(ret).fn_type(&params, decl.variadic),
        };
        let function = self.module.add_function(&decl.name, fn_type, None);
        if let Some(conv) = decl.conv {
            function.set_call_conventions(conv.llvm_id());
        }
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(function);
        self.by_name.insert(decl.name.clone(), id);
        id
    }

    fn begin_function(&mut self, func: FuncId) -> Result<Vec<ValueId>> {
        let function = self.function(func)?;
        if function.get_first_basic_block().is_some() {
            return Err(CodegenError::backend(format!(
                "function {:?} already has a body",
                function.get_name()
            )));
        }
        let entry = self.context.append_basic_block(function, "entry");
        self.blocks.push(entry);
        self.builder.position_at_end(entry);
        let params: Vec<BasicValueEnum> = function.get_param_iter().collect();
        Ok(params.into_iter().map(|p| self.push(p)).collect())
    }

    fn new_block(&mut self, label: &str) -> Result<BlockId> {
        let function = self.current_function()?;
        let block = self.context.append_basic_block(function, label);
        self.blocks.push(block);
        Ok(BlockId(self.blocks.len() as u32 - 1))
    }

    fn position_at_end(&mut self, block: BlockId) {
        if let Some(block) = self.blocks.get(block.0 as usize) {
            self.builder.position_at_end(*block);
        }
    }

    fn insert_block(&self) -> Option<BlockId> {
        let current = self.builder.get_insert_block()?;
        self.blocks
            .iter()
            .position(|block| *block == current)
            .map(|index| BlockId(index as u32))
    }

    fn is_terminated(&self) -> bool {
        self.builder
            .get_insert_block()
            .is_some_and(|block| block.get_terminator().is_some())
    }

    fn constant(&mut self, constant: Constant) -> ValueId {
        let value: BasicValueEnum = match constant {
            Constant::Int { bits, value } => self
                .context
                .custom_width_int_type(bits)
                .const_int(value as u64, true)
                .into(),
            Constant::Float { bits: 32, value } => self.context.f32_type().const_float(value).into(),
            Constant::Float { value, .. } => self.context.f64_type().const_float(value).into(),
            Constant::Str(s) => {
                let bytes = self.context.const_string(s.as_bytes(), true);
                let global = self.module.add_global(bytes.get_type(), None, "str");
                global.set_initializer(&bytes);
                global.set_constant(true);
                global.as_pointer_value().into()
            }
            Constant::Symbol(name) => {
                let next = self.symbols.len() as u64;
                let index = *self.symbols.entry(name).or_insert(next);
                self.context.i32_type().const_int(index, false).into()
            }
            Constant::Null => self.context.ptr_type(AddressSpace::default()).const_null().into(),
            Constant::Nil => self.nil_type().const_zero().into(),
            Constant::TypeTag(tag) => self.context.i32_type().const_int(u64::from(tag), false).into(),
        };
        self.push(value)
    }

    fn global(&mut self, name: &str, ty: &IrType) -> ValueId {
        let global = match self.module.get_global(name) {
            Some(global) => global,
            None => {
                let basic = self.basic_type(ty);
                let global = self.module.add_global(basic, None, name);
                global.set_initializer(&basic.const_zero());
                global
            }
        };
        self.push(global.as_pointer_value().into())
    }

    fn alloca(&mut self, ty: &IrType, name: &str) -> Result<ValueId> {
        let ptr = self.entry_alloca(self.basic_type(ty), name)?;
        Ok(self.push(ptr.into()))
    }

    fn load(&mut self, ty: &IrType, ptr: ValueId) -> Result<ValueId> {
        let ptr = self.pointer(ptr)?;
        let value = emit!(self.build_load(self.basic_type(ty), ptr, "load"));
        Ok(self.push(value))
    }

    fn store(&mut self, value: ValueId, ptr: ValueId) -> Result<()> {
        let (value, ptr) = (self.value(value)?, self.pointer(ptr)?);
        emit!(self.build_store(ptr, value));
        Ok(())
    }

    fn copy(&mut self, dst: ValueId, src: ValueId, size: u64, align: u32) -> Result<()> {
        let (dst, src) = (self.pointer(dst)?, self.pointer(src)?);
        let size = self.context.i64_type().const_int(size, false);
        emit!(self.build_memcpy(dst, align, src, align, size));
        Ok(())
    }

    fn field_ptr(&mut self, aggregate: &IrType, ptr: ValueId, index: u32) -> Result<ValueId> {
        let IrType::Struct(fields) = aggregate else {
            return Err(CodegenError::backend(format!("field of non-struct {}", aggregate)));
        };
        let struct_ty = self.struct_type(fields);
        let ptr = self.pointer(ptr)?;
        let field = emit!(self.build_struct_gep(struct_ty, ptr, index, "field_ptr"));
        Ok(self.push(field.into()))
    }

    fn extract_value(&mut self, _aggregate: &IrType, value: ValueId, index: u32) -> Result<ValueId> {
        let BasicValueEnum::StructValue(agg) = self.value(value)? else {
            return Err(CodegenError::backend("extract_value on a non-struct value"));
        };
        let field = emit!(self.build_extract_value(agg, index, "extract"));
        Ok(self.push(field))
    }

    fn cast(&mut self, kind: CastKind, value: ValueId, to: &IrType) -> Result<ValueId> {
        let result: BasicValueEnum = match (kind, to) {
            (CastKind::SExt, IrType::Int(bits)) => {
                let int = self.int(value)?;
                let ty = self.context.custom_width_int_type(*bits);
                emit!(self.build_int_s_extend(int, ty, "sext")).into()
            }
            (CastKind::ZExt, IrType::Int(bits)) => {
                let int = self.int(value)?;
                let ty = self.context.custom_width_int_type(*bits);
                emit!(self.build_int_z_extend(int, ty, "zext")).into()
            }
            (CastKind::FpExt, IrType::Float(_)) => {
                let BasicValueEnum::FloatValue(float) = self.value(value)? else {
                    return Err(CodegenError::backend("fpext of a non-float value"));
                };
                emit!(self.build_float_ext(float, self.context.f64_type(), "fpext")).into()
            }
            (kind, to) => {
                return Err(CodegenError::backend(format!("invalid cast {} to {}", kind, to)));
            }
        };
        Ok(self.push(result))
    }

    fn convert(&mut self, value: ValueId, from: &Type, to: &Type) -> Result<ValueId> {
        let from_size = Layout::new(&self.types).size_of(from);
        let to_ir = Layout::new(&self.types).ir_type(to);
        match (from, to) {
            (_, Type::Union(_)) => {
                // Widen into fresh `{ tag, payload }` storage.
                let union_ty = self.struct_for(to);
                let storage = self.entry_alloca(union_ty.into(), "union")?;
                if from.is_union() {
                    let src = self.pointer(value)?;
                    let size = self.context.i64_type().const_int(from_size, false);
                    emit!(self.build_memcpy(storage, 8, src, 8, size));
                } else {
                    let tag = match from {
                        Type::Class(_) => {
                            let instance = self.pointer(value)?;
                            self.tag_of_instance(instance, from)?
                        }
                        _ => {
                            let tag = self.types.type_tag(from).unwrap_or(0);
                            self.context.i32_type().const_int(u64::from(tag), false)
                        }
                    };
                    let tag_ptr = emit!(self.build_struct_gep(union_ty, storage, 0, "tag_ptr"));
                    emit!(self.build_store(tag_ptr, tag));
                    let payload = emit!(self.build_struct_gep(union_ty, storage, 1, "payload"));
                    if from.passed_by_value() {
                        let src = self.pointer(value)?;
                        let size = self.context.i64_type().const_int(from_size, false);
                        emit!(self.build_memcpy(payload, 8, src, 8, size));
                    } else if !from.is_nil() {
                        let value = self.value(value)?;
                        emit!(self.build_store(payload, value));
                    }
                }
                Ok(self.push(storage.into()))
            }
            (Type::Union(_), _) => {
                let union_ty = self.struct_for(from);
                let ptr = self.pointer(value)?;
                let payload = emit!(self.build_struct_gep(union_ty, ptr, 1, "payload"));
                if to.passed_by_value() {
                    Ok(self.push(payload.into()))
                } else if to.is_nil() {
                    Ok(self.nil_value())
                } else {
                    let ty = self.basic_type(&to_ir);
                    let loaded = emit!(self.build_load(ty, payload, "narrow"));
                    Ok(self.push(loaded))
                }
            }
            // Class upcasts and identical representations keep the value.
            _ => Ok(value),
        }
    }

    fn type_id(&mut self, value: ValueId, ty: &Type) -> Result<ValueId> {
        let tag = if ty.is_union() {
            let ptr = self.pointer(value)?;
            self.tag_of_union(ptr, ty)?
        } else if let Type::Class(_) = ty {
            let ptr = self.pointer(value)?;
            self.tag_of_instance(ptr, ty)?
        } else {
            // Value types are never subclassed.
            let tag = self.types.type_tag(ty).unwrap_or(0);
            self.context.i32_type().const_int(u64::from(tag), false)
        };
        Ok(self.push(tag.into()))
    }

    fn match_type_tag(
        &mut self,
        declared: &Type,
        candidate: &Type,
        tag: ValueId,
    ) -> Result<ValueId> {
        let tag = self.int(tag)?;
        let bool_ty = self.context.bool_type();
        let mut result = bool_ty.const_int(0, false);
        for candidate_tag in self.types.matching_tags(declared, candidate) {
            let expected = self.context.i32_type().const_int(u64::from(candidate_tag), false);
            let eq = emit!(self.build_int_compare(IntPredicate::EQ, tag, expected, "tag_eq"));
            result = emit!(self.build_or(result, eq, "tag_match"));
        }
        Ok(self.push(result.into()))
    }

    fn and(&mut self, lhs: ValueId, rhs: ValueId) -> Result<ValueId> {
        let (lhs, rhs) = (self.int(lhs)?, self.int(rhs)?);
        let value = emit!(self.build_and(lhs, rhs, "and"));
        Ok(self.push(value.into()))
    }

    fn phi(&mut self, ty: &IrType, incoming: &[(ValueId, BlockId)]) -> Result<ValueId> {
        let phi = emit!(self.build_phi(self.basic_type(ty), "phi"));
        let mut pairs = Vec::with_capacity(incoming.len());
        for (value, block) in incoming {
            pairs.push((self.value(*value)?, self.block(*block)?));
        }
        let refs: Vec<(&dyn BasicValue<'ctx>, BasicBlock<'ctx>)> = pairs
            .iter()
            .map(|(value, block)| (value as &dyn BasicValue<'ctx>, *block))
            .collect();
        phi.add_incoming(&refs);
        Ok(self.push(phi.as_basic_value()))
    }

    fn emit_call(
        &mut self,
        func: FuncId,
        args: &[ValueId],
        conv: Option<CallConv>,
    ) -> Result<ValueId> {
        let function = self.function(func)?;
        let args: Vec<BasicMetadataValueEnum> = args
            .iter()
            .map(|arg| self.value(*arg).map(Into::into))
            .collect::<Result<_>>()?;
        let call_site = emit!(self.build_call(function, &args, "call"));
        if let Some(conv) = conv {
            call_site.set_call_convention(conv.llvm_id());
        }
        match call_site.try_as_basic_value() {
            LlvmValueKind::Basic(value) => Ok(self.push(value)),
            LlvmValueKind::Instruction(_) => Ok(self.nil_value()),
        }
    }

    fn emit_invoke(
        &mut self,
        func: FuncId,
        args: &[ValueId],
        normal: BlockId,
        handler: BlockId,
        conv: Option<CallConv>,
    ) -> Result<ValueId> {
        let function = self.function(func)?;
        let current = self.current_function()?;
        if !current.has_personality_function() {
            let personality = self.personality();
            current.set_personality_function(personality);
        }
        let args: Vec<BasicValueEnum> = args
            .iter()
            .map(|arg| self.value(*arg))
            .collect::<Result<_>>()?;
        let (normal, handler) = (self.block(normal)?, self.block(handler)?);
        let call_site = emit!(self.build_invoke(function, &args, normal, handler, "invoke"));
        if let Some(conv) = conv {
            call_site.set_call_convention(conv.llvm_id());
        }
        match call_site.try_as_basic_value() {
            LlvmValueKind::Basic(value) => Ok(self.push(value)),
            LlvmValueKind::Instruction(_) => Ok(self.nil_value()),
        }
    }

    fn landing_pad(&mut self) -> Result<ValueId> {
        let ptr_type = self.context.ptr_type(AddressSpace::default());
        let landing_type = self
            .context
            .struct_type(&[ptr_type.into(), self.context.i32_type().into()], false);
        let personality = self.personality();
        let null_ptr = ptr_type.const_null();
        let lp = emit!(self.build_landing_pad(
            landing_type,
            personality,
            &[null_ptr.into()],
            false,
            "lp",
        ));
        Ok(self.push(lp))
    }

    fn make_closure(&mut self, func: FuncId, data: ValueId) -> Result<ValueId> {
        let function = self.function(func)?;
        let ptr_type = self.context.ptr_type(AddressSpace::default());
        let closure_ty = self.context.struct_type(&[ptr_type.into(), ptr_type.into()], false);
        let data = self.value(data)?;
        let with_fn = emit!(self.build_insert_value(
            closure_ty.get_undef(),
            function.as_global_value().as_pointer_value(),
            0,
            "closure_fn"
        ));
        let closure = emit!(self.build_insert_value(with_fn, data, 1, "closure"));
        Ok(self.push(closure.into_struct_value().into()))
    }

    fn br(&mut self, target: BlockId) -> Result<()> {
        let target = self.block(target)?;
        emit!(self.build_unconditional_branch(target));
        Ok(())
    }

    fn cond_br(&mut self, cond: ValueId, then: BlockId, otherwise: BlockId) -> Result<()> {
        let cond = self.int(cond)?;
        let (then, otherwise) = (self.block(then)?, self.block(otherwise)?);
        emit!(self.build_conditional_branch(cond, then, otherwise));
        Ok(())
    }

    fn unreachable(&mut self) -> Result<()> {
        emit!(self.build_unreachable());
        Ok(())
    }

    fn ret(&mut self, value: Option<ValueId>) -> Result<()> {
        match value {
            Some(value) => {
                let value = self.value(value)?;
                emit!(self.build_return(Some(&value)));
            }
            None => {
                emit!(self.build_return(None));
            }
        }
        Ok(())
    }
}
