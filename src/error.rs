//! Error types for the PersonaKit engine
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation.

use thiserror::Error;

/// Main error type for PersonaKit operations
#[derive(Error, Debug)]
pub enum PersonaKitError {
    /// Input rejected before entering the queue or engine
    /// (malformed rule configuration, missing required traits)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A loaded configuration is internally inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Task not found in the outbox queue
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// No mindscape exists for the given person
    #[error("Mindscape not found for person: {0}")]
    MindscapeNotFound(String),

    /// Observation referenced by a queue task does not exist
    #[error("Observation not found: {0}")]
    ObservationNotFound(String),

    /// Per-person feedback rate limit exceeded
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Narrative search call failed
    #[error("Narrative search error: {0}")]
    NarrativeSearch(String),

    /// Invalid identifier format
    #[error("Invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parse error (rule configuration uploads)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Settings loading error
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for PersonaKit operations
pub type Result<T> = std::result::Result<T, PersonaKitError>;

/// Convert anyhow::Error to PersonaKitError
impl From<anyhow::Error> for PersonaKitError {
    fn from(err: anyhow::Error) -> Self {
        PersonaKitError::Other(err.to_string())
    }
}
