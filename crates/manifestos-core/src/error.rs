//! Core error types for manifestos-core.
//!
//! This module defines the error hierarchy using thiserror. Timeouts are
//! not errors here: a verification window that elapses is an ordinary
//! state transition, see [`crate::verification::state`].

use std::path::PathBuf;
use thiserror::Error;

use crate::verification::{VerificationStatus, VerificationType};

/// Core error type for manifestos-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// State machine rejected a transition request
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    /// Recognition service errors
    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    /// Gold ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The task store has no task with this id
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// No verification modal is currently open
    #[error("No verification is awaiting evidence")]
    NoActiveVerification,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    /// Invalid time range
    #[error("Invalid time range: end_time ({end}) must be greater than start_time ({start})")]
    InvalidTimeRange {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    /// Empty collection
    #[error("Empty collection: {0}")]
    EmptyCollection(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Rejected state machine requests.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    /// The request only makes sense from a different state
    #[error("Cannot {action} from state '{from}'")]
    InvalidTransition {
        from: VerificationStatus,
        action: &'static str,
    },

    /// The store holds no verification state for the task
    #[error("No verification state for task {0}")]
    UnknownTask(String),

    /// A result arrived for a verification step the task is not in
    #[error("Unexpected {verification_type} result for task {task_id} in state '{status}'")]
    UnexpectedResult {
        task_id: String,
        verification_type: VerificationType,
        status: VerificationStatus,
    },
}

/// Recognition service errors.
#[derive(Error, Debug)]
pub enum RecognitionError {
    /// Transport-level failure talking to the recognition service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Token endpoint refused the credentials
    #[error("Access token request failed: {0}")]
    TokenRequest(String),

    /// Service answered with an error payload
    #[error("Service error {code}: {message}")]
    Service { code: i64, message: String },

    /// Evidence payload could not be used
    #[error("Invalid evidence: {0}")]
    InvalidEvidence(String),

    /// Endpoint URL could not be built
    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    /// No more scripted responses (test recognizer)
    #[error("Recognizer has no response available")]
    Exhausted,
}

impl RecognitionError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RecognitionError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            // Baidu uses 18 for QPS limit and 282000 for internal errors.
            RecognitionError::Service { code, .. } => matches!(code, 18 | 282000),
            _ => false,
        }
    }
}

/// Gold ledger errors.
#[derive(Error, Debug, PartialEq)]
pub enum LedgerError {
    /// Debit larger than the current balance
    #[error("Insufficient gold: need {needed}, have {balance}")]
    InsufficientBalance { needed: i64, balance: i64 },

    /// Negative amounts are not accepted
    #[error("Amount must not be negative: {0}")]
    NegativeAmount(i64),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
