use keeper_core::{BackupKind, JobId, KeeperError};
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schedule cannot produce a next run time.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given ID exists in the registry.
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    #[error("Job already exists: {id}")]
    DuplicateJob { id: JobId },

    /// The job store could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rejected job definition or other core failure.
    #[error(transparent)]
    Core(#[from] KeeperError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why a single backup run failed. Never escapes the orchestrator; it is
/// logged and turned into a `false` result.
#[derive(Debug, Error)]
pub enum RunError {
    /// An engine call returned a non-zero status.
    #[error("{step} returned status {code}: {message}")]
    Engine {
        step: String,
        code: i32,
        message: String,
    },

    #[error("{0} backups cannot be run by the scheduler")]
    UnsupportedKind(BackupKind),

    /// The blocking worker died before reporting a result.
    #[error("engine worker panicked: {0}")]
    Panicked(String),
}
