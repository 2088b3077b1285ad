pub mod ast;
pub mod backend;
pub mod codegen;
pub mod compiler;
pub mod errors;
