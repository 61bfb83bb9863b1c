//! Error types for media-jobs.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::retry::{ErrorClass, RetryError};

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job queue is closed, cannot submit {id}")]
    QueueClosed { id: Uuid },
}

/// Reasons a job is refused before it is created.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Rate limit exceeded for {client}")]
    RateLimited { client: String },

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Input validation errors, raised before admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("URL is empty")]
    EmptyUrl,

    #[error("URL is too long ({length} > {max})")]
    UrlTooLong { length: usize, max: usize },

    #[error("Only http(s) URLs are accepted")]
    UnsupportedScheme,

    #[error("Domain not allowed: {host}")]
    BlockedDomain { host: String },

    #[error("Unsupported bitrate: {0} kbps")]
    UnsupportedBitrate(u32),
}

/// Failures reported by a processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Will not change on retry (private, removed, DRM, live ...).
    #[error("{0}")]
    Permanent(String),

    /// May succeed on a later attempt (rate limited, network hiccup ...).
    #[error("{0}")]
    Transient(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Expected output missing: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("Processing timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Processor panicked: {0}")]
    Panicked(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Whether retrying the same job could change the outcome.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Permanent(_) | Self::Exhausted { .. } | Self::Panicked(_) => {
                ErrorClass::Permanent
            }
            _ => ErrorClass::Transient,
        }
    }
}

impl From<RetryError<ProcessError>> for ProcessError {
    fn from(err: RetryError<ProcessError>) -> Self {
        match err {
            RetryError::Permanent { error, .. } => error,
            RetryError::Exhausted { attempts, last } => Self::Exhausted {
                attempts,
                last: last.to_string(),
            },
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
