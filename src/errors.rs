use std::path::Path;
use thiserror::Error;

use crate::ast::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// An earlier phase handed over something codegen cannot lower.
    InternalError,
    /// The call cannot cross the native ABI as written.
    AbiError,
    BackendError,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::InternalError => write!(f, "InternalError"),
            ErrorCategory::AbiError => write!(f, "AbiError"),
            ErrorCategory::BackendError => write!(f, "BackendError"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("InternalError: {message}")]
    Internal { message: String, location: Location },

    #[error("AbiError: {message}")]
    Abi { message: String, location: Location },

    #[error("BackendError: {0}")]
    Backend(String),
}

impl CodegenError {
    pub fn ice(location: Location, message: impl Into<String>) -> Self {
        CodegenError::Internal {
            message: message.into(),
            location,
        }
    }

    pub fn abi(location: Location, message: impl Into<String>) -> Self {
        CodegenError::Abi {
            message: message.into(),
            location,
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        CodegenError::Backend(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CodegenError::Internal { .. } => ErrorCategory::InternalError,
            CodegenError::Abi { .. } => ErrorCategory::AbiError,
            CodegenError::Backend(_) => ErrorCategory::BackendError,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            CodegenError::Internal { location, .. } | CodegenError::Abi { location, .. } => {
                Some(*location)
            }
            CodegenError::Backend(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            CodegenError::Internal { message, .. } | CodegenError::Abi { message, .. } => {
                message.clone()
            }
            CodegenError::Backend(message) => message.clone(),
        }
    }
}

pub fn print_error(file: &Path, err: &anyhow::Error) {
    if let Some(ce) = err.chain().find_map(|e| e.downcast_ref::<CodegenError>()) {
        print_codegen_error(file, ce);
    } else {
        let message = err
            .chain()
            .last()
            .map(ToString::to_string)
            .unwrap_or_default();
        eprintln!("error: {}", message);
        eprintln!("  --> {}", file.display());
    }
}

fn print_codegen_error(file: &Path, ce: &CodegenError) {
    eprintln!("{}: {}", ce.category(), ce.message());
    match ce.location() {
        Some(location) => eprintln!("  --> {}:{}", file.display(), location),
        None => eprintln!("  --> {}", file.display()),
    }
    if ce.category() == ErrorCategory::InternalError {
        eprintln!("  = note: this is a bug in an earlier compiler phase");
    }
}
