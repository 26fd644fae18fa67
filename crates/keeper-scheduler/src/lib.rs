//! `keeper-scheduler`: planning, persistence and execution of recurring backup jobs.
//!
//! # Overview
//!
//! Jobs live in a [`registry::JobRegistry`] backed by a [`store::JobStore`].
//! The [`engine::SchedulerLoop`] polls the registry, hands every due job to
//! the [`executor::Orchestrator`], and records each attempt so the next run
//! is planned whether or not the backup succeeded.
//!
//! The registry keeps no copy of its own: every call goes back to the store,
//! and changes happen under a lock file beside it. A `serve` process and
//! one-off `jobs` commands can therefore share one store, and only one of
//! them runs a backup at a time.
//!
//! # Frequencies
//!
//! | Frequency | Next run                                                   |
//! |-----------|------------------------------------------------------------|
//! | `Daily`   | Today at HH:MM if still ahead, else tomorrow               |
//! | `Weekly`  | First listed weekday at HH:MM, today included              |
//! | `Monthly` | Configured day (clamped to short months) at HH:MM          |
//! | `Once`    | The preset time only; disabled once it has been planned    |
//!
//! All times are local wall-clock times.

pub mod chain;
pub mod clock;
pub mod due;
pub mod engine;
pub mod error;
pub mod executor;
pub mod lock;
pub mod recurrence;
pub mod registry;
pub mod store;

pub use clock::{Clock, LocalClock, ManualClock};
pub use engine::{LoopState, RunOutcome, SchedulerLoop};
pub use error::{Result, RunError, SchedulerError};
pub use executor::{LogSink, Orchestrator, ProgressSink, TracingSink};
pub use lock::FileLock;
pub use registry::{JobRegistry, RunGuard};
pub use store::{JobStore, JsonFileStore, MemoryStore, SqliteStore};
