//! Error types for the queue driver.

use crate::driver::{DriverKind, SubmitStatus};

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Submit error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Option error: {0}")]
    InvalidOption(#[from] OptionError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown driver kind: {0}")]
    UnknownDriver(String),
}

/// Errors raised while constructing or tearing down a driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Driver {kind} is not available in this build")]
    Unsupported { kind: DriverKind },
}

/// Why a submission was refused.
///
/// Each variant corresponds to one non-OK [`SubmitStatus`]; see
/// [`SubmitError::status`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The job itself is malformed. Retrying it is pointless.
    #[error("Job {name} rejected: {reason}")]
    JobFail { name: String, reason: String },

    /// The backend could not take the job. Retry later or escalate.
    #[error("Driver {driver} failed to accept job {name}: {reason}")]
    DriverFail {
        driver: String,
        name: String,
        reason: String,
    },

    /// The driver is shutting down and accepts no further work.
    #[error("Driver {driver} is closed")]
    QueueClosed { driver: String },
}

impl SubmitError {
    /// Status code reported to the queue manager for this failure.
    pub fn status(&self) -> SubmitStatus {
        match self {
            Self::JobFail { .. } => SubmitStatus::JobFail,
            Self::DriverFail { .. } => SubmitStatus::DriverFail,
            Self::QueueClosed { .. } => SubmitStatus::QueueClosed,
        }
    }

    /// Whether resubmitting the same job could succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DriverFail { .. })
    }
}

/// Option table errors.
#[derive(Debug, thiserror::Error)]
pub enum OptionError {
    #[error("Driver {driver} does not recognise option {key}")]
    UnknownKey { driver: String, key: String },

    #[error("Invalid value {value:?} for option {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
