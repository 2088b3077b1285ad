use crate::ast::Program;
use crate::backend::cfg::ControlFlow;
use crate::backend::recording::RecordingBackend;
use crate::backend::Backend;
use crate::codegen::{Codegen, CodegenOptions};

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

/// What the driver prints for a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    Ir,
    Cfg,
    /// Textual LLVM module built through inkwell.
    #[cfg(feature = "llvm")]
    Llvm,
}

pub struct Compiler {
    options: CodegenOptions,
}

impl Compiler {
    pub fn new(options: CodegenOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CodegenOptions {
        &self.options
    }

    pub fn load_program(path: &Path) -> Result<Program> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut program: Program = serde_json::from_str(&source)
            .with_context(|| format!("Failed to parse resolved program {}", path.display()))?;
        if program.file.is_empty() {
            program.file = path.display().to_string();
        }
        Ok(program)
    }

    /// Lower every definition that becomes a standalone function.
    pub fn compile<B: Backend>(&self, program: &Program, backend: B) -> Result<B> {
        let mut codegen = Codegen::new(program, backend, self.options.clone());
        for def in program.defs.iter().filter(|def| def.needs_function()) {
            codegen
                .lower_function(def)
                .with_context(|| format!("while lowering `{}`", def.name))?;
        }
        log::info!(
            "Successfully lowered {} functions from {}",
            program.defs.iter().filter(|def| def.needs_function()).count(),
            program.file
        );
        Ok(codegen.into_backend())
    }

    pub fn compile_recorded(&self, program: &Program) -> Result<RecordingBackend> {
        let backend = RecordingBackend::new(self.options.target, program.types.clone());
        self.compile(program, backend)
    }

    pub fn compile_file(&self, path: &Path, emit: Emit) -> Result<String> {
        let program = Self::load_program(path)?;
        match emit {
            Emit::Ir => Ok(self.compile_recorded(&program)?.to_string()),
            Emit::Cfg => Ok(Self::render_cfg(&self.compile_recorded(&program)?)),
            #[cfg(feature = "llvm")]
            Emit::Llvm => self.compile_llvm(&program),
        }
    }

    #[cfg(feature = "llvm")]
    pub fn compile_llvm(&self, program: &Program) -> Result<String> {
        use crate::backend::llvm::LlvmBackend;

        let context = inkwell::context::Context::create();
        let backend = LlvmBackend::new(
            &context,
            &program.file,
            self.options.target,
            program.types.clone(),
        );
        let backend = self.compile(program, backend)?;
        backend
            .verify()
            .with_context(|| format!("invalid LLVM module for {}", program.file))?;
        Ok(backend.print_to_string())
    }

    fn render_cfg(backend: &RecordingBackend) -> String {
        let mut out = String::new();
        for (func, function) in backend.functions() {
            if !function.is_defined() {
                continue;
            }
            let cfg = ControlFlow::of(backend, func);
            let _ = writeln!(out, "{}:", function.decl.name);
            for block in &function.blocks {
                let preds: Vec<String> = cfg
                    .predecessors(*block)
                    .iter()
                    .map(|pred| format!("{}.{}", backend.block_label(*pred), pred.0))
                    .collect();
                let _ = writeln!(
                    out,
                    "  {}.{}{} <- [{}]",
                    backend.block_label(*block),
                    block.0,
                    if cfg.is_reachable(*block) { "" } else { " (unreachable)" },
                    preds.join(", ")
                );
            }
        }
        out
    }
}
