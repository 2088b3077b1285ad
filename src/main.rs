use anyhow::Result;
use callgen::backend::TargetArch;
use callgen::codegen::CodegenOptions;
use callgen::compiler::{Compiler, Emit};
use callgen::errors;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Target {
    #[value(name = "x86_64")]
    X86_64,
    Aarch64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    Ir,
    Cfg,
    #[cfg(feature = "llvm")]
    Llvm,
}

#[derive(Parser, Debug)]
#[command(name = "callgen")]
#[command(about = "Lowers type-resolved calls into backend IR", long_about = None)]
struct Args {
    /// Resolved program as JSON
    #[arg(value_name = "PROGRAM")]
    input: PathBuf,

    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "x86_64")]
    target: Target,

    #[arg(long, value_enum, default_value = "ir")]
    emit: EmitKind,

    /// Classify every foreign call site afresh
    #[arg(long)]
    no_abi_cache: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = CodegenOptions {
        target: match args.target {
            Target::X86_64 => TargetArch::X86_64,
            Target::Aarch64 => TargetArch::Aarch64,
        },
        memoize_abi: !args.no_abi_cache,
    };
    let emit = match args.emit {
        EmitKind::Ir => Emit::Ir,
        EmitKind::Cfg => Emit::Cfg,
        #[cfg(feature = "llvm")]
        EmitKind::Llvm => Emit::Llvm,
    };

    let compiler = Compiler::new(options);
    let text = match compiler.compile_file(&args.input, emit) {
        Ok(text) => text,
        Err(err) => {
            errors::print_error(&args.input, &err);
            std::process::exit(1);
        }
    };

    match args.output {
        Some(path) => std::fs::write(&path, text)?,
        None => print!("{}", text),
    }
    Ok(())
}
