use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use keeper_core::JobId;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::{
    clock::Clock,
    error::Result,
    executor::{Orchestrator, TracingSink},
    registry::JobRegistry,
};

/// Whether the loop is currently polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Report of one scheduled run, sent after the registry has been updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub job_id: JobId,
    pub job_name: String,
    pub success: bool,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
}

/// Background driver: polls the registry for due jobs and runs them one at a
/// time until shutdown is signalled.
pub struct SchedulerLoop {
    registry: Arc<JobRegistry>,
    orchestrator: Arc<Orchestrator>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    /// If set, every finished run is reported here.
    outcome_tx: Option<mpsc::Sender<RunOutcome>>,
    state_tx: watch::Sender<LoopState>,
}

impl SchedulerLoop {
    pub fn new(
        registry: Arc<JobRegistry>,
        orchestrator: Arc<Orchestrator>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(LoopState::Stopped);
        Self {
            registry,
            orchestrator,
            clock,
            poll_interval,
            outcome_tx: None,
            state_tx,
        }
    }

    /// Report finished runs on `tx`. The send never blocks the loop; a full
    /// channel drops the report.
    pub fn with_outcomes(mut self, tx: mpsc::Sender<RunOutcome>) -> Self {
        self.outcome_tx = Some(tx);
        self
    }

    /// Watch the loop's state.
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    /// Main loop. Runs until `shutdown` broadcasts `true` or its sender is
    /// dropped. A job already handed to the engine always finishes first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_secs = self.poll_interval.as_secs_f64(), "scheduler loop started");
        self.state_tx.send_replace(LoopState::Running);

        loop {
            if stopping(&shutdown) {
                break;
            }
            if let Err(e) = self.tick(&shutdown).await {
                error!("scheduler tick error: {e}");
            }
            if stopping(&shutdown) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || stopping(&shutdown) {
                        break;
                    }
                }
            }
        }

        self.state_tx.send_replace(LoopState::Stopped);
        info!("scheduler loop stopped");
    }

    /// One polling pass: run every due job in registry order and record each
    /// attempt. Returns how many jobs were run.
    pub async fn tick(&self, shutdown: &watch::Receiver<bool>) -> Result<usize> {
        let due = self.registry.due_jobs(self.clock.now())?;
        let mut ran = 0;

        for job in due {
            if stopping(shutdown) {
                info!("shutdown requested, leaving remaining due jobs for next start");
                break;
            }

            let Some(_run) = self.registry.try_begin_run()? else {
                info!(job_name = %job.name, "another backup is running, retrying next poll");
                break;
            };

            let started_at = self.clock.now();
            info!(job_id = %job.id, job_name = %job.name, kind = %job.kind, "running scheduled job");
            let success = self
                .orchestrator
                .run(&job, Arc::new(TracingSink), Arc::new(TracingSink))
                .await;
            let finished_at = self.clock.now();
            ran += 1;

            // Failed runs advance the schedule too.
            match self.registry.record_run(job.id, finished_at) {
                Ok(updated) => {
                    let next_run = updated.schedule.and_then(|s| s.next_run_time);
                    info!(job_id = %job.id, success, next_run = ?next_run, "scheduled job finished");
                }
                Err(e) => error!(job_id = %job.id, "could not record run: {e}"),
            }

            if let Some(ref tx) = self.outcome_tx {
                let outcome = RunOutcome {
                    job_id: job.id,
                    job_name: job.name.clone(),
                    success,
                    started_at,
                    finished_at,
                };
                if tx.try_send(outcome).is_err() {
                    warn!(job_id = %job.id, "outcome channel full or closed, report dropped");
                }
            }
        }

        Ok(ran)
    }
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
