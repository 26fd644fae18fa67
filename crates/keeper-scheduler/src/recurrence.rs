use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use keeper_core::types::{Frequency, Schedule};

use crate::error::{Result, SchedulerError};

/// Upper bound on the weekly day-by-day search. Seven candidates cover a
/// whole week; the eighth only guards against a bad weekday set.
const MAX_WEEKLY_CANDIDATES: usize = 8;

/// Outcome of a recurrence calculation: the next run time plus the schedule
/// as it should be persisted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextRun {
    pub at: Option<NaiveDateTime>,
    pub schedule: Schedule,
}

/// Compute the next local execution time for `schedule` as seen at `now`.
///
/// Pure: the caller persists the returned schedule. A `Once` schedule is
/// disabled the first time it is computed, whatever `now` is.
pub fn compute_next_run(schedule: &Schedule, now: NaiveDateTime) -> Result<NextRun> {
    let mut updated = schedule.clone();

    let at = match schedule.frequency {
        Frequency::Daily => Some(daily_candidate(schedule, now)?),

        Frequency::Weekly => {
            if schedule.weekdays.is_empty() {
                return Err(SchedulerError::InvalidSchedule(
                    "weekly schedule has no weekdays".into(),
                ));
            }
            let mut candidate = daily_candidate(schedule, now)?;
            let mut found = None;
            for _ in 0..MAX_WEEKLY_CANDIDATES {
                if schedule.weekdays.contains(&candidate.weekday()) {
                    found = Some(candidate);
                    break;
                }
                candidate += Duration::days(1);
            }
            Some(found.ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!(
                    "no weekday in {:?} within {MAX_WEEKLY_CANDIDATES} days",
                    schedule.weekdays
                ))
            })?)
        }

        Frequency::Monthly => {
            let time = time_of_day(schedule)?;
            if !(1..=31).contains(&schedule.day_of_month) {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "day of month {} is outside 1..=31",
                    schedule.day_of_month
                )));
            }
            let this_month = clamped_date(now.year(), now.month(), schedule.day_of_month)?
                .and_time(time);
            if this_month > now {
                Some(this_month)
            } else {
                // Carry the configured day, not the clamped one, into next month.
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                Some(clamped_date(year, month, schedule.day_of_month)?.and_time(time))
            }
        }

        Frequency::Once => {
            updated.enabled = false;
            None
        }
    };

    updated.next_run_time = at;
    Ok(NextRun {
        at,
        schedule: updated,
    })
}

/// Number of days in the given month.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    first_of_next.pred_opt().map(|d| d.day())
}

/// Today at the schedule time if that is still ahead, else tomorrow.
fn daily_candidate(schedule: &Schedule, now: NaiveDateTime) -> Result<NaiveDateTime> {
    let candidate = now.date().and_time(time_of_day(schedule)?);
    if candidate > now {
        Ok(candidate)
    } else {
        Ok(candidate + Duration::days(1))
    }
}

fn time_of_day(schedule: &Schedule) -> Result<chrono::NaiveTime> {
    schedule.time_of_day().ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!(
            "time of day {:02}:{:02} is out of range",
            schedule.hour, schedule.minute
        ))
    })
}

fn clamped_date(year: i32, month: u32, day_of_month: u32) -> Result<NaiveDate> {
    let last = days_in_month(year, month).ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!("{year}-{month:02} is not a valid month"))
    })?;
    NaiveDate::from_ymd_opt(year, month, day_of_month.min(last)).ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!(
            "{year}-{month:02}-{day_of_month:02} is not a valid date"
        ))
    })
}
