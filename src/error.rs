use thiserror::Error;

/// Errors produced while compiling or rendering a template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The template source is malformed.
    #[error("Template syntax error at line {line}: {message}")]
    TemplateSyntax { line: usize, message: String },

    /// A required context field is absent or empty.
    #[error("Missing required field: {0}")]
    MissingRequiredField(&'static str),

    /// The template refers to a field or helper that does not exist.
    #[error("Invalid reference '{path}': {reason}")]
    InvalidReference { path: String, reason: String },

    /// A helper could not produce output for its input.
    #[error("Helper '{helper}' failed: {message}")]
    HelperExecution { helper: String, message: String },

    /// The context violates an invariant other than presence.
    #[error("Invalid context: {0}")]
    InvalidContext(String),

    /// The template file could not be read.
    #[error("Failed to read template file {path}: {message}")]
    Io { path: String, message: String },
}

impl RenderError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        RenderError::TemplateSyntax {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn reference(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RenderError::InvalidReference {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
