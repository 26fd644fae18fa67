//! `keeper-core`: shared types for the Keeper backup scheduler.
//!
//! Holds the job model and its save-time validation, the backup engine
//! collaborator trait, configuration loading and the common error type.

pub mod config;
pub mod engine;
pub mod error;
pub mod types;

pub use engine::{BackupEngine, EngineStatus, ProgressFn, ENGINE_OK};
pub use error::{KeeperError, Result};
pub use types::{BackupKind, BackupTarget, Frequency, Job, JobId, Schedule};
