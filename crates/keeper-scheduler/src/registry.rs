use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::NaiveDateTime;
use keeper_core::{Job, JobId};
use tracing::{info, instrument, warn};

use crate::{
    due::{select_due, DueScan},
    error::{Result, SchedulerError},
    lock::{sibling_path, FileLock},
    recurrence::compute_next_run,
    store::JobStore,
};

/// The persisted set of backup jobs.
///
/// Nothing is cached: every call reads the store, so jobs written by another
/// process on the same store are always seen. Mutations load, change and
/// save a fresh copy while holding the store's lock file, and a failed save
/// leaves nothing behind.
pub struct JobRegistry {
    store: Box<dyn JobStore>,
    /// Serialises read-modify-write cycles within this process.
    write: Mutex<()>,
    /// Set while this process has a backup running.
    running: AtomicBool,
}

/// Proof that no other backup is running against this store. Released on
/// drop.
#[derive(Debug)]
pub struct RunGuard<'a> {
    running: &'a AtomicBool,
    _file: Option<FileLock>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl JobRegistry {
    /// Open the registry over `store`. An unreadable or corrupt store is
    /// logged and treated as empty.
    pub fn open(store: Box<dyn JobStore>) -> Self {
        let registry = Self {
            store,
            write: Mutex::new(()),
            running: AtomicBool::new(false),
        };
        info!(count = registry.list().len(), "job registry opened");
        registry
    }

    pub fn list(&self) -> Vec<Job> {
        match self.store.load() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("job store unreadable, treating it as empty: {e}");
                Vec::new()
            }
        }
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.list().into_iter().find(|j| j.id == id)
    }

    /// Jobs whose schedule exists and is enabled.
    pub fn scheduled(&self) -> Vec<Job> {
        self.list().into_iter().filter(|j| j.is_scheduled()).collect()
    }

    /// Validate and append `job`. A nil id is replaced with a fresh one.
    #[instrument(skip(self, job), fields(job_name = %job.name))]
    pub fn add(&self, mut job: Job) -> Result<Job> {
        job.validate()?;
        if job.id.is_nil() {
            job.id = JobId::new();
        }

        self.modify(|jobs| {
            if jobs.iter().any(|j| j.id == job.id) {
                return Err(SchedulerError::DuplicateJob { id: job.id });
            }
            jobs.push(job.clone());
            Ok(((), true))
        })?;
        info!(job_id = %job.id, "job added");
        Ok(job)
    }

    /// Replace the stored job with the same id, keeping its position.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn update(&self, job: Job) -> Result<()> {
        job.validate()?;
        self.modify(|jobs| {
            let slot = jobs
                .iter_mut()
                .find(|j| j.id == job.id)
                .ok_or(SchedulerError::JobNotFound { id: job.id })?;
            *slot = job;
            Ok(((), true))
        })?;
        info!("job updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn remove(&self, id: JobId) -> Result<Job> {
        let removed = self.modify(|jobs| {
            let index = jobs
                .iter()
                .position(|j| j.id == id)
                .ok_or(SchedulerError::JobNotFound { id })?;
            Ok((jobs.remove(index), true))
        })?;
        info!(job_name = %removed.name, "job removed");
        Ok(removed)
    }

    /// Scheduled jobs due at `now`. Next-run times computed along the way
    /// are persisted.
    pub fn due_jobs(&self, now: NaiveDateTime) -> Result<Vec<Job>> {
        self.modify(|jobs| {
            let DueScan { due, touched } = select_due(&mut jobs[..], now);
            Ok((due, touched))
        })
    }

    /// Stamp a scheduled run at `now` and plan the next one. Applies whether
    /// the run succeeded or not.
    #[instrument(skip(self))]
    pub fn record_run(&self, id: JobId, now: NaiveDateTime) -> Result<Job> {
        self.modify(|jobs| {
            let job = find_mut(jobs, id)?;
            job.last_run_time = Some(now);
            if let Some(schedule) = &job.schedule {
                let next = compute_next_run(schedule, now)?;
                info!(next_run = ?next.at, enabled = next.schedule.enabled, "next run planned");
                job.schedule = Some(next.schedule);
            }
            Ok((job.clone(), true))
        })
    }

    /// Stamp an on-demand run. The schedule is left alone.
    #[instrument(skip(self))]
    pub fn record_manual_run(&self, id: JobId, now: NaiveDateTime) -> Result<Job> {
        self.modify(|jobs| {
            let job = find_mut(jobs, id)?;
            job.last_run_time = Some(now);
            Ok((job.clone(), true))
        })
    }

    /// Claim the right to run a backup. Only one backup runs at a time per
    /// store, across every process sharing it. `None` while another run
    /// holds it.
    pub fn try_begin_run(&self) -> Result<Option<RunGuard<'_>>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Ok(None);
        }
        let file = match self.store.location() {
            Some(path) => match FileLock::try_acquire(&sibling_path(path, "run.lock")) {
                Ok(Some(lock)) => Some(lock),
                Ok(None) => {
                    self.running.store(false, Ordering::Release);
                    return Ok(None);
                }
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    return Err(e);
                }
            },
            None => None,
        };
        Ok(Some(RunGuard {
            running: &self.running,
            _file: file,
        }))
    }

    /// Load a fresh copy, let `f` change it, and save it when `f` reports a
    /// change. The store's lock file is held throughout.
    fn modify<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Job>) -> Result<(T, bool)>,
    {
        let _local = self.write.lock().expect("job registry poisoned");
        let _file = match self.store.location() {
            Some(path) => Some(FileLock::acquire(&sibling_path(path, "lock"))?),
            None => None,
        };

        let mut jobs = match self.store.load() {
            Ok(jobs) => jobs,
            Err(SchedulerError::Serialization(e)) => {
                warn!("job store is corrupt and will be replaced: {e}");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let (out, changed) = f(&mut jobs)?;
        if changed {
            self.store.save(&jobs)?;
        }
        Ok(out)
    }
}

fn find_mut(jobs: &mut [Job], id: JobId) -> Result<&mut Job> {
    jobs.iter_mut()
        .find(|j| j.id == id)
        .ok_or(SchedulerError::JobNotFound { id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonFileStore, MemoryStore, SqliteStore};
    use chrono::NaiveDate;
    use keeper_core::{BackupKind, BackupTarget, KeeperError, Schedule};
    use std::sync::Arc;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn job(name: &str) -> Job {
        Job::new(name, BackupKind::Full, BackupTarget::FilesAndFolders, "/backups")
            .with_sources(["/data"])
    }

    /// Store handle the test can inspect after handing a box to the registry.
    struct Shared(Arc<MemoryStore>);

    impl JobStore for Shared {
        fn load(&self) -> Result<Vec<Job>> {
            self.0.load()
        }
        fn save(&self, jobs: &[Job]) -> Result<()> {
            self.0.save(jobs)
        }
    }

    /// Memory store whose saves can be switched to fail.
    #[derive(Default)]
    struct Flaky {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    impl JobStore for Arc<Flaky> {
        fn load(&self) -> Result<Vec<Job>> {
            self.inner.load()
        }
        fn save(&self, jobs: &[Job]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SchedulerError::Storage("disk full".into()));
            }
            self.inner.save(jobs)
        }
    }

    fn registry() -> (JobRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (JobRegistry::open(Box::new(Shared(store.clone()))), store)
    }

    #[test]
    fn add_persists_and_assigns_id() {
        let (reg, store) = registry();
        let mut j = job("Nightly");
        j.id = JobId::nil();
        let added = reg.add(j).unwrap();
        assert!(!added.id.is_nil());
        assert_eq!(store.snapshot(), vec![added.clone()]);
        assert_eq!(reg.get(added.id), Some(added));
    }

    #[test]
    fn add_rejects_invalid_and_duplicate() {
        let (reg, store) = registry();
        let bad = job("Nightly").with_schedule(Schedule::daily(25, 0));
        let err = reg.add(bad).unwrap_err();
        assert!(matches!(err, SchedulerError::Core(KeeperError::InvalidSchedule(_))));

        let j = reg.add(job("Nightly")).unwrap();
        let err = reg.add(j.clone()).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob { id } if id == j.id));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn update_keeps_insertion_order() {
        let (reg, _) = registry();
        let a = reg.add(job("A")).unwrap();
        let b = reg.add(job("B")).unwrap();
        let c = reg.add(job("C")).unwrap();

        let mut changed = b.clone();
        changed.compress = true;
        reg.update(changed).unwrap();

        let ids: Vec<JobId> = reg.list().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert!(reg.get(b.id).unwrap().compress);
    }

    #[test]
    fn update_and_remove_unknown_job_fail() {
        let (reg, _) = registry();
        let j = job("ghost");
        assert!(matches!(
            reg.update(j.clone()),
            Err(SchedulerError::JobNotFound { .. })
        ));
        assert!(matches!(
            reg.remove(j.id),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[test]
    fn remove_deletes_and_saves() {
        let (reg, store) = registry();
        let a = reg.add(job("A")).unwrap();
        let b = reg.add(job("B")).unwrap();
        assert_eq!(reg.remove(a.id).unwrap().id, a.id);
        assert_eq!(store.snapshot(), vec![b]);
    }

    #[test]
    fn scheduled_filters_disabled_and_unscheduled() {
        let (reg, _) = registry();
        reg.add(job("plain")).unwrap();
        let on = reg.add(job("on").with_schedule(Schedule::daily(2, 0))).unwrap();
        let mut off = Schedule::daily(2, 0);
        off.enabled = false;
        reg.add(job("off").with_schedule(off)).unwrap();

        let scheduled = reg.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, on.id);
    }

    #[test]
    fn due_jobs_persists_computed_next_run() {
        let (reg, store) = registry();
        let j = reg.add(job("Nightly").with_schedule(Schedule::daily(2, 0))).unwrap();

        let due = reg.due_jobs(at(2024, 6, 2, 1, 0)).unwrap();
        assert!(due.is_empty());
        let saved = store.snapshot();
        assert_eq!(
            saved[0].schedule.as_ref().unwrap().next_run_time,
            Some(at(2024, 6, 2, 2, 0))
        );

        let due = reg.due_jobs(at(2024, 6, 2, 2, 0)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, j.id);
    }

    #[test]
    fn record_run_stamps_and_advances() {
        let (reg, _) = registry();
        let j = reg.add(job("Nightly").with_schedule(Schedule::daily(2, 0))).unwrap();
        let now = at(2024, 6, 2, 2, 0);
        let updated = reg.record_run(j.id, now).unwrap();
        assert_eq!(updated.last_run_time, Some(now));
        assert_eq!(
            updated.schedule.unwrap().next_run_time,
            Some(at(2024, 6, 3, 2, 0))
        );
    }

    #[test]
    fn record_run_disables_once_schedule() {
        let (reg, _) = registry();
        let when = at(2024, 6, 2, 2, 0);
        let j = reg.add(job("Once").with_schedule(Schedule::once_at(when))).unwrap();
        assert_eq!(reg.due_jobs(when).unwrap().len(), 1);

        let updated = reg.record_run(j.id, when).unwrap();
        let schedule = updated.schedule.unwrap();
        assert!(!schedule.enabled);
        assert_eq!(schedule.next_run_time, None);
        assert!(reg.due_jobs(at(2024, 6, 3, 2, 0)).unwrap().is_empty());
    }

    #[test]
    fn record_manual_run_leaves_schedule() {
        let (reg, _) = registry();
        let j = reg.add(job("Nightly").with_schedule(Schedule::daily(2, 0))).unwrap();
        let now = at(2024, 6, 2, 12, 0);
        let updated = reg.record_manual_run(j.id, now).unwrap();
        assert_eq!(updated.last_run_time, Some(now));
        assert_eq!(updated.schedule, j.schedule);
    }

    #[test]
    fn corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "[{\"broken\"").unwrap();
        let reg = JobRegistry::open(Box::new(JsonFileStore::new(&path)));
        assert!(reg.list().is_empty());

        reg.add(job("fresh")).unwrap();
        let reopened = JobRegistry::open(Box::new(JsonFileStore::new(&path)));
        assert_eq!(reopened.list().len(), 1);
    }

    #[test]
    fn failed_save_changes_nothing() {
        let store = Arc::new(Flaky::default());
        let reg = JobRegistry::open(Box::new(store.clone()));

        store.fail.store(true, Ordering::SeqCst);
        let a = job("A");
        assert!(matches!(reg.add(a.clone()), Err(SchedulerError::Storage(_))));
        assert!(reg.list().is_empty());

        store.fail.store(false, Ordering::SeqCst);
        reg.add(a.clone()).unwrap();

        store.fail.store(true, Ordering::SeqCst);
        let mut changed = a.clone();
        changed.compress = true;
        assert!(reg.update(changed).is_err());
        assert!(!reg.get(a.id).unwrap().compress);

        assert!(reg.remove(a.id).is_err());
        assert!(reg.get(a.id).is_some());

        assert!(reg.record_manual_run(a.id, at(2024, 6, 2, 12, 0)).is_err());
        assert_eq!(reg.get(a.id).unwrap().last_run_time, None);

        store.fail.store(false, Ordering::SeqCst);
        assert_eq!(reg.remove(a.id).unwrap().id, a.id);
    }

    #[test]
    fn registries_on_one_file_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let service = JobRegistry::open(Box::new(JsonFileStore::new(&path)));
        let cli = JobRegistry::open(Box::new(JsonFileStore::new(&path)));

        let nightly = service
            .add(job("Nightly").with_schedule(Schedule::daily(2, 0)))
            .unwrap();
        let docs = cli.add(job("Docs")).unwrap();
        assert!(service.get(docs.id).is_some());

        service.record_run(nightly.id, at(2024, 6, 2, 2, 0)).unwrap();
        let names: Vec<String> = JsonFileStore::new(&path)
            .load()
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(names, vec!["Nightly", "Docs"]);

        cli.remove(nightly.id).unwrap();
        assert!(service.due_jobs(at(2024, 6, 3, 2, 0)).unwrap().is_empty());
        assert_eq!(service.list().len(), 1);
    }

    #[test]
    fn registries_on_one_database_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let service = JobRegistry::open(Box::new(SqliteStore::open(&path).unwrap()));
        let cli = JobRegistry::open(Box::new(SqliteStore::open(&path).unwrap()));

        let a = service.add(job("A")).unwrap();
        let b = cli.add(job("B")).unwrap();
        service.record_manual_run(a.id, at(2024, 6, 2, 12, 0)).unwrap();

        let ids: Vec<JobId> = cli.list().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn one_backup_at_a_time_per_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let service = JobRegistry::open(Box::new(JsonFileStore::new(&path)));
        let cli = JobRegistry::open(Box::new(JsonFileStore::new(&path)));

        let guard = service.try_begin_run().unwrap().expect("first run starts");
        assert!(service.try_begin_run().unwrap().is_none());
        assert!(cli.try_begin_run().unwrap().is_none());

        drop(guard);
        assert!(cli.try_begin_run().unwrap().is_some());
    }

    #[test]
    fn memory_registry_runs_one_at_a_time() {
        let (reg, _) = registry();
        let guard = reg.try_begin_run().unwrap();
        assert!(guard.is_some());
        assert!(reg.try_begin_run().unwrap().is_none());
        drop(guard);
        assert!(reg.try_begin_run().unwrap().is_some());
    }
}
