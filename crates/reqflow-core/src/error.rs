use thiserror::Error;

use crate::types::Stage;

#[derive(Debug, Error)]
pub enum WorkflowError {
    // Executor errors
    #[error("Agent execution failed at {stage}: {message}")]
    AgentExecution { stage: Stage, message: String },

    #[error("Agent timed out after {timeout_secs}s at {stage}")]
    AgentTimeout { stage: Stage, timeout_secs: u64 },

    // Transition errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    // Stream errors
    #[error("Event stream error: {0}")]
    Stream(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
