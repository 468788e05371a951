//! Error types for the earnings quality orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// A work function ran before the stage it reads from had written its result.
    #[error("{0}")]
    DependencyNotReady(String),

    #[error("Invalid task transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Analysis service error: {0}")]
    AnalysisServiceError(String),

    #[error("Table store error: {0}")]
    TableStoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Run cancelled")]
    Cancelled,

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}
