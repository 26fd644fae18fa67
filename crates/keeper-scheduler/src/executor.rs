use std::path::Path;
use std::sync::Arc;

use keeper_core::{
    engine::{BackupEngine, EngineStatus, ENGINE_OK},
    BackupKind, BackupTarget, Job,
};
use tracing::{debug, error, info};

use crate::{
    chain::{find_base, record_name},
    clock::Clock,
    error::RunError,
};

/// Receives `(percentage, message)` progress events from the engine.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, percent: i32, message: &str);
}

/// Receives human-readable log lines for one run.
pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(i32, &str) + Send + Sync,
{
    fn progress(&self, percent: i32, message: &str) {
        self(percent, message)
    }
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        self(line)
    }
}

/// Sends progress to `tracing` at debug level and drops log lines, which the
/// orchestrator already traces.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn progress(&self, percent: i32, message: &str) {
        debug!(percent, "{message}");
    }
}

impl LogSink for TracingSink {
    fn log(&self, _line: &str) {}
}

/// Turns one job definition into an ordered sequence of engine calls.
pub struct Orchestrator {
    engine: Arc<dyn BackupEngine>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn BackupEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    /// Execute `job` once. Returns true only when every engine call
    /// succeeded. Failures are reported through `log`, never raised.
    pub async fn run(
        &self,
        job: &Job,
        progress: Arc<dyn ProgressSink>,
        log: Arc<dyn LogSink>,
    ) -> bool {
        let run = JobRun {
            engine: self.engine.clone(),
            clock: self.clock.clone(),
            job: job.clone(),
            progress,
            log: log.clone(),
        };

        let result = match tokio::task::spawn_blocking(move || run.execute()).await {
            Ok(result) => result,
            Err(e) => Err(RunError::Panicked(e.to_string())),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(job_id = %job.id, job_name = %job.name, "backup run failed: {e}");
                log.log(&format!("Backup failed: {e}"));
                false
            }
        }
    }
}

/// Everything one blocking run needs, owned so it can move onto the
/// blocking pool.
struct JobRun {
    engine: Arc<dyn BackupEngine>,
    clock: Arc<dyn Clock>,
    job: Job,
    progress: Arc<dyn ProgressSink>,
    log: Arc<dyn LogSink>,
}

impl JobRun {
    fn execute(&self) -> Result<(), RunError> {
        let job = &self.job;
        let progress = |p: i32, m: &str| self.progress.progress(p, m);
        self.emit(&format!("Starting backup job: {}", job.name));

        for source in &job.source_paths {
            let destination = job
                .destination_path
                .join(record_name(&job.name, self.clock.now()));
            self.backup_source(source, &destination)?;
        }

        if job.is_hyperv_backup {
            for machine in &job.hyperv_machines {
                let destination = job
                    .destination_path
                    .join(record_name(machine, self.clock.now()));
                self.emit(&format!("Backing up Hyper-V machine: {machine}"));
                let status = self.engine.backup_hyperv_vm(machine, &destination, &progress);
                self.check(format!("Hyper-V backup of {machine}"), status)?;
            }
        }

        if job.verify_after_backup {
            self.emit("Verifying backup...");
            let status = self.engine.verify_backup(&job.destination_path, &progress);
            self.check("verification".to_string(), status)?;
        }

        self.emit(&format!("Backup job completed successfully: {}", job.name));
        Ok(())
    }

    fn backup_source(&self, source: &str, destination: &Path) -> Result<(), RunError> {
        let job = &self.job;
        let progress = |p: i32, m: &str| self.progress.progress(p, m);

        let status = match job.kind {
            BackupKind::Full if job.target == BackupTarget::Volume => {
                self.emit(&format!("Backing up volume: {source}"));
                self.engine.backup_volume(
                    source,
                    destination,
                    job.include_system_state,
                    job.compress,
                    &progress,
                )
            }
            BackupKind::Full => {
                self.emit(&format!("Backing up files: {source}"));
                self.engine.backup_files(source, destination, &progress)
            }
            BackupKind::Incremental => {
                let base = find_base(&job.destination_path, &job.name, job.kind);
                self.emit(&format!(
                    "Creating incremental backup from: {}",
                    describe_base(base.as_ref().map(|b| b.path.as_path()))
                ));
                self.engine.create_incremental_backup(
                    source,
                    destination,
                    base.as_ref().map(|b| b.path.as_path()),
                    &progress,
                )
            }
            BackupKind::Differential => {
                let base = find_base(&job.destination_path, &job.name, job.kind);
                self.emit(&format!(
                    "Creating differential backup from: {}",
                    describe_base(base.as_ref().map(|b| b.path.as_path()))
                ));
                self.engine.create_differential_backup(
                    source,
                    destination,
                    base.as_ref().map(|b| b.path.as_path()),
                    &progress,
                )
            }
            kind @ (BackupKind::CloneToDisk | BackupKind::CloneToVirtualDisk) => {
                return Err(RunError::UnsupportedKind(kind));
            }
        };

        self.check(format!("{} backup of {source}", job.kind), status)
    }

    fn check(&self, step: String, status: EngineStatus) -> Result<(), RunError> {
        if status == ENGINE_OK {
            return Ok(());
        }
        Err(RunError::Engine {
            step,
            code: status,
            message: self.engine.last_error_message(),
        })
    }

    fn emit(&self, line: &str) {
        info!(job_name = %self.job.name, "{line}");
        self.log.log(line);
    }
}

fn describe_base(base: Option<&Path>) -> String {
    base.map(|p| p.display().to_string())
        .unwrap_or_else(|| "none".to_string())
}
