//! Error types for pacer.

use thiserror::Error;

/// Main error type for pacer operations.
#[derive(Error, Debug)]
pub enum PacerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised while assembling layered configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// YAML parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A throttle was constructed outside of a Tokio runtime
    #[error("No Tokio runtime available to drive the throttle")]
    NoRuntime,

    /// A lane name that is not registered
    #[error("Unknown lane: {0}")]
    UnknownLane(String),

    /// A task was dropped before it could run
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Returned through a task's own error type when the task was dropped
/// before it ran, which only happens when the runtime driving the drain
/// loop shuts down.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Throttled task was cancelled before it ran")]
pub struct Cancelled;

/// Result type alias for pacer operations.
pub type Result<T> = std::result::Result<T, PacerError>;
