//! `keeper-engine`: runs backup operations through an external engine program.

pub mod command;
pub mod error;

pub use command::{parse_progress, CommandEngine, ENGINE_FAILED};
pub use error::{EngineError, Result};
