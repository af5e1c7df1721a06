//! Failure taxonomy shared by every stage of the live pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling, compiling, loading or drawing a program.
///
/// The first three variants are recoverable: the previously active program keeps
/// rendering and the message is surfaced as compile diagnostics. The remaining
/// variants are fatal to the surface instance that raised them.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The shader source or the template does not exist.
    #[error("shader input missing at {path}")]
    SourceMissing { path: PathBuf },

    /// The template lacks one of its markers or repeats it.
    #[error("template {path} is malformed: {reason}")]
    TemplateMalformed { path: PathBuf, reason: String },

    /// The compiler or the program loader rejected the shader.
    #[error("shader compilation failed:\n{diagnostics}")]
    CompileFailed { diagnostics: String },

    /// A GPU object could not be created.
    #[error("failed to create {resource}: {reason}")]
    ResourceCreationFailed { resource: String, reason: String },

    /// The shared graphics device could not be initialised.
    #[error("graphics device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A parameter was assigned that the program does not declare, or with the wrong type.
    #[error("parameter binding error: {0}")]
    Binding(String),
}

impl RenderError {
    pub fn compile(diagnostics: impl Into<String>) -> Self {
        RenderError::CompileFailed {
            diagnostics: diagnostics.into(),
        }
    }

    pub fn resource(resource: impl Into<String>, reason: impl ToString) -> Self {
        RenderError::ResourceCreationFailed {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that leave the previous visual state in place.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RenderError::SourceMissing { .. }
                | RenderError::TemplateMalformed { .. }
                | RenderError::CompileFailed { .. }
        )
    }

    /// Text shown to the user in place of compiler diagnostics.
    pub fn diagnostics(&self) -> String {
        match self {
            RenderError::CompileFailed { diagnostics } => diagnostics.clone(),
            other => other.to_string(),
        }
    }
}
