//! Engine error taxonomy
//!
//! Per-step failures are captured in run reports rather than surfaced as
//! `Err`; the variants here cross the API boundary only for structural
//! misconfiguration ([`EngineError::Configuration`]) or when strict routing
//! is enabled.

use stepgraph_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No executor could be resolved, or the setup is otherwise unusable
    /// (e.g. hierarchical mode without a manager)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A decision key matched no condition entry. By default this silently
    /// ends the branch; strict routing turns it into this error.
    #[error("No route for decision '{key}' from step '{step}'")]
    RoutingDeadEnd { step: String, key: String },

    /// The executor call for a step raised
    #[error("Step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    /// The hierarchical manager rejected a step's output
    #[error("Manager rejected step '{step}': {reason}")]
    ValidationRejection { step: String, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
