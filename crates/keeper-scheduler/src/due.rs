use chrono::NaiveDateTime;
use keeper_core::Job;
use tracing::warn;

use crate::recurrence::compute_next_run;

/// Result of one due-job scan.
#[derive(Debug, Default)]
pub struct DueScan {
    /// Jobs to run now, in registry order.
    pub due: Vec<Job>,
    /// True when a missing next-run time was computed and written back.
    pub touched: bool,
}

/// Pick the scheduled jobs whose next run has arrived.
///
/// Jobs with an enabled schedule but no next-run time get one computed first;
/// a schedule that cannot be computed is logged and skipped.
pub fn select_due(jobs: &mut [Job], now: NaiveDateTime) -> DueScan {
    let mut scan = DueScan::default();

    for job in jobs.iter_mut() {
        let Some(schedule) = job.schedule.as_mut() else {
            continue;
        };
        if !schedule.enabled {
            continue;
        }

        if schedule.next_run_time.is_none() {
            match compute_next_run(schedule, now) {
                Ok(next) => {
                    *schedule = next.schedule;
                    scan.touched = true;
                }
                Err(e) => {
                    warn!(job_id = %job.id, job_name = %job.name, "skipping job: {e}");
                    continue;
                }
            }
        }

        if schedule.next_run_time.is_some_and(|at| at <= now) {
            scan.due.push(job.clone());
        }
    }

    scan
}
