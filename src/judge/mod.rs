//! Language backends.
//!
//! The harness stays language-agnostic. Backends render the build+run script,
//! read back diagnostics and memory findings, and map parse trees to declarations.

pub mod adapter;
pub mod languages;
pub mod source;

pub use adapter::{
    Declaration, Diagnostic, LanguageBackend, MemoryFinding, RenderedScript, Severity, StackFrame,
};
pub use source::SourceIndex;

use crate::config::types::{GradeError, LanguageConfig, Result};
use languages::{c::CBackend, processing::ProcessingBackend, python::PythonBackend};

pub fn backend_for(language: &str, config: &LanguageConfig) -> Result<Box<dyn LanguageBackend>> {
    match language {
        "c" | "gcc" => Ok(Box::new(CBackend::new(config))),
        "python" | "py" => Ok(Box::new(PythonBackend::new(config))),
        "processing" | "pde" => Ok(Box::new(ProcessingBackend::new(config))),
        _ => Err(GradeError::Config(format!(
            "unsupported language backend: {language}"
        ))),
    }
}
