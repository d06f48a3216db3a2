//! RK-012: Error taxonomy for composition and synthesis.
//!
//! Every failure surfaces as a synthesis-time diagnostic. Nothing here is
//! retried or recovered.

use std::path::PathBuf;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Composition, validation and synthesis failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stack '{stack}' requires {dependency}, but none was provided")]
    MissingDependency { stack: String, dependency: String },

    #[error("stack '{0}' is already registered")]
    DuplicateStack(String),

    #[error("stack '{stack}' already declares logical id '{logical_id}'")]
    DuplicateLogicalId { stack: String, logical_id: String },

    #[error("invalid {kind} '{name}'")]
    InvalidName { kind: &'static str, name: String },

    #[error("unknown stack '{0}'")]
    UnknownStack(String),

    #[error("stack '{stack}' has no resource '{logical_id}'")]
    UnknownResource { stack: String, logical_id: String },

    #[error("stack '{stack}': '{from}' references unknown '{to}'")]
    DanglingReference {
        stack: String,
        from: String,
        to: String,
    },

    #[error("dependency cycle detected involving: {0}")]
    DependencyCycle(String),

    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("asset {}: {reason}", path.display())]
    Asset { path: PathBuf, reason: String },

    #[error("{} validation error(s): {}", .0.len(), .0.join("; "))]
    Validation(Vec<String>),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl Error {
    /// Wrap an I/O error with the operation that failed.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn missing(stack: &str, dependency: &str) -> Self {
        Self::MissingDependency {
            stack: stack.to_string(),
            dependency: dependency.to_string(),
        }
    }
}
