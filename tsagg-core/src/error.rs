use thiserror::Error;

/// Errors surfaced by the scheduler and its collaborators.
///
/// Only [`SchedulerError::ConfigFatal`] is meant to escape the outer loop;
/// every other variant is caught at the boundary that produced it, logged,
/// and treated as "skip this unit of work."
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Missing required configuration or a failed initial connection to the
    /// store, broker, or lock service. Fatal: the process aborts before
    /// entering the loop.
    #[error("fatal configuration or startup error: {0}")]
    ConfigFatal(String),

    /// The store reported an authorisation failure while listing policies
    /// for a database. Silently skip that database; not logged as a warning.
    #[error("authorization skipped for database")]
    AuthSkipped,

    /// Any other document-store failure.
    #[error("document store error: {0}")]
    DatabaseTransient(String),

    /// A policy's `meta` selector failed to decode.
    #[error("failed to decode policy document: {0}")]
    DecodeError(String),

    /// The lock service could not grant a lock within its retry budget.
    #[error("failed to acquire lock {key}: {reason}")]
    LockFailure { key: String, reason: String },

    /// The broker rejected or failed to accept a publish.
    #[error("failed to publish message: {0}")]
    PublishFailure(String),
}

impl From<mongodb::error::Error> for SchedulerError {
    fn from(err: mongodb::error::Error) -> Self {
        SchedulerError::DatabaseTransient(err.to_string())
    }
}

impl From<redis::RedisError> for SchedulerError {
    fn from(err: redis::RedisError) -> Self {
        SchedulerError::LockFailure {
            key: String::new(),
            reason: err.to_string(),
        }
    }
}

impl From<lapin::Error> for SchedulerError {
    fn from(err: lapin::Error) -> Self {
        SchedulerError::PublishFailure(err.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::DecodeError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
