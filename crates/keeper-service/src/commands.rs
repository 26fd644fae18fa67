use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use keeper_core::{Job, JobId};
use keeper_scheduler::{Clock, JobRegistry, LogSink, Orchestrator, ProgressSink, SchedulerError};

use crate::cli::JobsCommand;

/// Everything the `jobs` subcommands work against.
pub struct JobsContext {
    pub registry: Arc<JobRegistry>,
    pub orchestrator: Orchestrator,
    pub clock: Arc<dyn Clock>,
}

pub async fn run(ctx: &JobsContext, command: JobsCommand) -> anyhow::Result<()> {
    match command {
        JobsCommand::List => {
            print!("{}", job_table(&ctx.registry.list()));
        }
        JobsCommand::Show { id } => {
            let job = find(&ctx.registry, id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        JobsCommand::Add { file } => {
            let job = add_from_file(&ctx.registry, &file)?;
            println!("Added job {} ({})", job.name, job.id);
        }
        JobsCommand::Remove { id } => {
            let job = ctx.registry.remove(id)?;
            println!("Removed job {} ({})", job.name, job.id);
        }
        JobsCommand::Run { id, progress } => {
            let success = run_now(ctx, id, progress).await?;
            if !success {
                bail!("backup job {id} failed");
            }
        }
    }
    Ok(())
}

fn find(registry: &JobRegistry, id: JobId) -> anyhow::Result<Job> {
    registry
        .get(id)
        .with_context(|| format!("no job with id {id}"))
}

/// Read a job definition from a JSON file and register it.
pub fn add_from_file(registry: &JobRegistry, path: &Path) -> anyhow::Result<Job> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let job: Job = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid job definition", path.display()))?;
    registry.add(job).map_err(rejection)
}

/// Prefix rejected job definitions with their error code.
fn rejection(err: SchedulerError) -> anyhow::Error {
    match err {
        SchedulerError::Core(e) => anyhow!("[{}] {}", e.code(), e),
        other => other.into(),
    }
}

/// Run one job on demand and stamp its last run. The schedule is untouched.
/// Refused while any other backup on the same store is running.
pub async fn run_now(ctx: &JobsContext, id: JobId, show_progress: bool) -> anyhow::Result<bool> {
    let job = find(&ctx.registry, id)?;
    let Some(_run) = ctx.registry.try_begin_run()? else {
        bail!("another backup is running on this job store, try again later");
    };

    let progress: Arc<dyn ProgressSink> = Arc::new(move |percent: i32, message: &str| {
        if show_progress {
            println!("[{percent:>3}%] {message}");
        }
    });
    let log: Arc<dyn LogSink> = Arc::new(|line: &str| println!("{line}"));

    let success = ctx.orchestrator.run(&job, progress, log).await;
    ctx.registry.record_manual_run(id, ctx.clock.now())?;
    Ok(success)
}

/// One line per job: id, name, kind, next run and last run.
pub fn job_table(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "No jobs configured.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<36}  {:<20}  {:<12}  {:<16}  {:<16}",
        "ID", "NAME", "KIND", "NEXT RUN", "LAST RUN"
    );
    for job in jobs {
        let next = match &job.schedule {
            Some(s) if !s.enabled => "disabled".to_string(),
            Some(s) => s
                .next_run_time
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "pending".to_string()),
            None => "-".to_string(),
        };
        let last = job
            .last_run_time
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let _ = writeln!(
            out,
            "{:<36}  {:<20}  {:<12}  {:<16}  {:<16}",
            job.id,
            job.name,
            job.kind.to_string(),
            next,
            last
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use keeper_core::{
        engine::{BackupEngine, EngineStatus, ProgressFn, ENGINE_OK},
        BackupKind, BackupTarget, Schedule,
    };
    use keeper_scheduler::{ManualClock, MemoryStore};

    struct OkEngine;

    impl BackupEngine for OkEngine {
        fn backup_files(&self, _: &str, _: &Path, _: ProgressFn<'_>) -> EngineStatus {
            ENGINE_OK
        }
        fn backup_volume(&self, _: &str, _: &Path, _: bool, _: bool, _: ProgressFn<'_>) -> EngineStatus {
            ENGINE_OK
        }
        fn backup_hyperv_vm(&self, _: &str, _: &Path, _: ProgressFn<'_>) -> EngineStatus {
            ENGINE_OK
        }
        fn create_incremental_backup(&self, _: &str, _: &Path, _: Option<&Path>, _: ProgressFn<'_>) -> EngineStatus {
            ENGINE_OK
        }
        fn create_differential_backup(&self, _: &str, _: &Path, _: Option<&Path>, _: ProgressFn<'_>) -> EngineStatus {
            ENGINE_OK
        }
        fn verify_backup(&self, _: &Path, _: ProgressFn<'_>) -> EngineStatus {
            ENGINE_OK
        }
        fn last_error_message(&self) -> String {
            String::new()
        }
    }

    fn at(d: u32, h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn context() -> JobsContext {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at(3, 14)));
        JobsContext {
            registry: Arc::new(JobRegistry::open(Box::new(MemoryStore::new()))),
            orchestrator: Orchestrator::new(Arc::new(OkEngine), clock.clone()),
            clock,
        }
    }

    #[test]
    fn add_from_file_assigns_missing_id() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(
            &path,
            r#"{
                "name": "Docs",
                "kind": "full",
                "target": "files_and_folders",
                "source_paths": ["/home/me/docs"],
                "destination_path": "/backups",
                "schedule": {"enabled": true, "frequency": "daily", "hour": 2, "minute": 0}
            }"#,
        )
        .unwrap();

        let job = add_from_file(&ctx.registry, &path).unwrap();
        assert!(!job.id.is_nil());
        assert_eq!(ctx.registry.get(job.id).unwrap().name, "Docs");
    }

    #[test]
    fn add_from_file_rejects_bad_json() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = add_from_file(&ctx.registry, &path).unwrap_err();
        assert!(err.to_string().contains("not a valid job definition"));
        assert!(ctx.registry.list().is_empty());
    }

    #[tokio::test]
    async fn run_now_stamps_last_run_and_keeps_schedule() {
        let ctx = context();
        let mut schedule = Schedule::daily(2, 0);
        schedule.next_run_time = Some(at(4, 2));
        let job = ctx
            .registry
            .add(
                Job::new("Docs", BackupKind::Full, BackupTarget::FilesAndFolders, "/backups")
                    .with_sources(["/docs"])
                    .with_schedule(schedule.clone()),
            )
            .unwrap();

        assert!(run_now(&ctx, job.id, false).await.unwrap());

        let stored = ctx.registry.get(job.id).unwrap();
        assert_eq!(stored.last_run_time, Some(at(3, 14)));
        assert_eq!(stored.schedule, Some(schedule));
    }

    #[test]
    fn add_from_file_reports_error_code() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(
            &path,
            r#"{"name": "", "kind": "full", "target": "disk", "source_paths": ["disk0"], "destination_path": "/b"}"#,
        )
        .unwrap();

        let err = add_from_file(&ctx.registry, &path).unwrap_err();
        assert!(err.to_string().starts_with("[INVALID_JOB]"));
    }

    #[tokio::test]
    async fn run_now_refused_while_busy() {
        let ctx = context();
        let job = ctx
            .registry
            .add(Job::new("Docs", BackupKind::Full, BackupTarget::FilesAndFolders, "/b").with_sources(["/docs"]))
            .unwrap();

        let busy = ctx.registry.try_begin_run().unwrap();
        let err = run_now(&ctx, job.id, false).await.unwrap_err();
        assert!(err.to_string().contains("another backup is running"));
        assert_eq!(ctx.registry.get(job.id).unwrap().last_run_time, None);

        drop(busy);
        assert!(run_now(&ctx, job.id, false).await.unwrap());
    }

    #[tokio::test]
    async fn run_now_unknown_job_errors() {
        let ctx = context();
        assert!(run_now(&ctx, JobId::new(), false).await.is_err());
    }

    #[test]
    fn job_table_shows_schedule_state() {
        let mut planned = Job::new("Nightly", BackupKind::Incremental, BackupTarget::Volume, "/b")
            .with_schedule(Schedule::daily(2, 0));
        planned.schedule.as_mut().unwrap().next_run_time = Some(at(4, 2));
        planned.last_run_time = Some(at(3, 2));

        let mut off = Job::new("Old", BackupKind::Full, BackupTarget::Disk, "/b")
            .with_schedule(Schedule::daily(1, 0));
        off.schedule.as_mut().unwrap().enabled = false;

        let manual = Job::new("Adhoc", BackupKind::Full, BackupTarget::Disk, "/b");

        let table = job_table(&[planned, off, manual]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("Nightly") && lines[1].contains("2024-06-04 02:00"));
        assert!(lines[1].contains("2024-06-03 02:00"));
        assert!(lines[2].contains("disabled") && lines[2].contains("never"));
        assert!(lines[3].contains("Adhoc") && lines[3].contains(" - "));
    }

    #[test]
    fn job_table_empty() {
        assert_eq!(job_table(&[]), "No jobs configured.\n");
    }
}
