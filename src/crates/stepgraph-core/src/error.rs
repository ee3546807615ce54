//! Error types shared by the workflow model and its primitives

use thiserror::Error;

/// Errors raised by workflow construction and the shared state store
#[derive(Debug, Error)]
pub enum CoreError {
    /// Workflow definition is structurally invalid (duplicate step names,
    /// edges referencing undefined steps, unresolvable agent references)
    #[error("Invalid workflow definition: {0}")]
    Definition(String),

    /// A state store operation hit a value of the wrong type
    /// (e.g. `append` on a non-list entry)
    #[error("State key '{key}' holds {found}, expected {expected}")]
    StateType {
        key: String,
        expected: &'static str,
        found: String,
    },

    /// YAML parsing failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O failed while loading a definition
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
