use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A job definition was rejected at save time.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// A schedule definition was rejected at save time.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl KeeperError {
    /// Short machine-readable code, printed by the CLI next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            KeeperError::Config(_) => "CONFIG_ERROR",
            KeeperError::InvalidJob(_) => "INVALID_JOB",
            KeeperError::InvalidSchedule(_) => "INVALID_SCHEDULE",
        }
    }

    /// True for errors that mean the operator must fix a job definition.
    pub fn is_configuration(&self) -> bool {
        matches!(self, KeeperError::InvalidJob(_) | KeeperError::InvalidSchedule(_))
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;
