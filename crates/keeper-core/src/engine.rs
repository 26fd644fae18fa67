//! The backup engine collaborator.
//!
//! The engine moves and snapshots data; the scheduler only decides what to
//! call and in which order. Every operation is blocking, returns a status code
//! (0 = success) and may report progress through the supplied callback.

use std::path::Path;

/// Status code returned by every engine operation.
pub type EngineStatus = i32;

/// Success status.
pub const ENGINE_OK: EngineStatus = 0;

/// Progress callback: `(percentage, message)`.
pub type ProgressFn<'a> = &'a dyn Fn(i32, &str);

pub trait BackupEngine: Send + Sync {
    fn backup_files(&self, source: &str, destination: &Path, progress: ProgressFn<'_>)
        -> EngineStatus;

    fn backup_volume(
        &self,
        volume: &str,
        destination: &Path,
        include_system_state: bool,
        compress: bool,
        progress: ProgressFn<'_>,
    ) -> EngineStatus;

    fn backup_hyperv_vm(&self, vm_name: &str, destination: &Path, progress: ProgressFn<'_>)
        -> EngineStatus;

    /// `base` of `None` makes the engine take an effective full backup.
    fn create_incremental_backup(
        &self,
        source: &str,
        destination: &Path,
        base: Option<&Path>,
        progress: ProgressFn<'_>,
    ) -> EngineStatus;

    /// `full` of `None` makes the engine take an effective full backup.
    fn create_differential_backup(
        &self,
        source: &str,
        destination: &Path,
        full: Option<&Path>,
        progress: ProgressFn<'_>,
    ) -> EngineStatus;

    fn verify_backup(&self, path: &Path, progress: ProgressFn<'_>) -> EngineStatus;

    /// Text describing the most recent failure.
    fn last_error_message(&self) -> String;
}
