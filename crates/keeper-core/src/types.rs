use chrono::{NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{KeeperError, Result};

/// Unique identifier for a backup job (UUIDv4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero id; the registry replaces it with a fresh one on add.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("invalid job id {s:?}: {e}"))
    }
}

/// How a run relates to earlier backups of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Incremental,
    Differential,
    CloneToDisk,
    CloneToVirtualDisk,
}

impl BackupKind {
    /// Incremental and differential runs chain off an earlier record.
    pub fn chains(&self) -> bool {
        matches!(self, BackupKind::Incremental | BackupKind::Differential)
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Differential => "differential",
            BackupKind::CloneToDisk => "clone_to_disk",
            BackupKind::CloneToVirtualDisk => "clone_to_virtual_disk",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupTarget {
    Disk,
    Volume,
    FilesAndFolders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Once,
}

/// Recurrence settings embedded in a [`Job`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub enabled: bool,
    pub frequency: Frequency,
    /// Local hour of day, 0..=23.
    pub hour: u32,
    /// Minute of the hour, 0..=59.
    pub minute: u32,
    /// Only read for `Weekly`.
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    /// Only read for `Monthly`; clamped to the length of short months.
    #[serde(default = "default_day_of_month")]
    pub day_of_month: u32,
    /// Derived; recomputed after every calculation or execution.
    #[serde(default)]
    pub next_run_time: Option<NaiveDateTime>,
}

fn default_day_of_month() -> u32 {
    1
}

impl Schedule {
    fn new(frequency: Frequency, hour: u32, minute: u32) -> Self {
        Self {
            enabled: true,
            frequency,
            hour,
            minute,
            weekdays: Vec::new(),
            day_of_month: default_day_of_month(),
            next_run_time: None,
        }
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Self::new(Frequency::Daily, hour, minute)
    }

    pub fn weekly(weekdays: impl Into<Vec<Weekday>>, hour: u32, minute: u32) -> Self {
        Self {
            weekdays: weekdays.into(),
            ..Self::new(Frequency::Weekly, hour, minute)
        }
    }

    pub fn monthly(day_of_month: u32, hour: u32, minute: u32) -> Self {
        Self {
            day_of_month,
            ..Self::new(Frequency::Monthly, hour, minute)
        }
    }

    /// A single run at `at`. The next-run time is set up front because the
    /// recurrence calculation disables a `Once` schedule instead of planning it.
    pub fn once_at(at: NaiveDateTime) -> Self {
        Self {
            next_run_time: Some(at),
            ..Self::new(Frequency::Once, at.hour(), at.minute())
        }
    }

    pub fn time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }

    /// Reject definitions the recurrence calculation cannot satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.time_of_day().is_none() {
            return Err(KeeperError::InvalidSchedule(format!(
                "time of day {:02}:{:02} is out of range",
                self.hour, self.minute
            )));
        }
        match self.frequency {
            Frequency::Weekly if self.enabled && self.weekdays.is_empty() => Err(
                KeeperError::InvalidSchedule("weekly schedule needs at least one weekday".into()),
            ),
            Frequency::Monthly if !(1..=31).contains(&self.day_of_month) => {
                Err(KeeperError::InvalidSchedule(format!(
                    "day of month {} is outside 1..=31",
                    self.day_of_month
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A named, persisted backup configuration with optional recurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// A fresh id is generated when absent.
    #[serde(default)]
    pub id: JobId,
    /// Also the prefix of every backup record the job produces.
    pub name: String,
    pub kind: BackupKind,
    pub target: BackupTarget,
    #[serde(default)]
    pub source_paths: Vec<String>,
    pub destination_path: PathBuf,
    #[serde(default)]
    pub include_system_state: bool,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub verify_after_backup: bool,
    #[serde(default)]
    pub is_hyperv_backup: bool,
    #[serde(default)]
    pub hyperv_machines: Vec<String>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub last_run_time: Option<NaiveDateTime>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        kind: BackupKind,
        target: BackupTarget,
        destination_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            kind,
            target,
            source_paths: Vec::new(),
            destination_path: destination_path.into(),
            include_system_state: false,
            compress: false,
            verify_after_backup: false,
            is_hyperv_backup: false,
            hyperv_machines: Vec::new(),
            schedule: None,
            last_run_time: None,
        }
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_paths = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_hyperv_machines<I, S>(mut self, machines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hyperv_machines = machines.into_iter().map(Into::into).collect();
        self.is_hyperv_backup = !self.hyperv_machines.is_empty();
        self
    }

    pub fn with_verify(mut self) -> Self {
        self.verify_after_backup = true;
        self
    }

    /// True when the schedule exists and is switched on.
    pub fn is_scheduled(&self) -> bool {
        self.schedule.as_ref().is_some_and(|s| s.enabled)
    }

    /// Save-time validation. Runs before a job reaches the registry so a bad
    /// schedule never surfaces during a scheduler tick.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(KeeperError::InvalidJob("name must not be empty".into()));
        }
        if name.contains(['/', '\\']) {
            return Err(KeeperError::InvalidJob(format!(
                "name {name:?} must not contain a path separator"
            )));
        }
        if self.source_paths.is_empty() && !self.is_hyperv_backup {
            return Err(KeeperError::InvalidJob(
                "at least one source path is required".into(),
            ));
        }
        if self.is_hyperv_backup && self.hyperv_machines.is_empty() {
            return Err(KeeperError::InvalidJob(
                "a Hyper-V backup must name at least one machine".into(),
            ));
        }
        if self.destination_path.as_os_str().is_empty() {
            return Err(KeeperError::InvalidJob(
                "destination path must not be empty".into(),
            ));
        }
        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files_job() -> Job {
        Job::new("Nightly", BackupKind::Full, BackupTarget::FilesAndFolders, "/backups")
            .with_sources(["/data"])
    }

    #[test]
    fn valid_job_passes() {
        assert!(files_job().validate().is_ok());
    }

    #[test]
    fn weekly_without_weekdays_is_rejected() {
        let job = files_job().with_schedule(Schedule::weekly(Vec::<Weekday>::new(), 2, 0));
        let err = job.validate().unwrap_err();
        assert!(matches!(err, KeeperError::InvalidSchedule(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn disabled_weekly_without_weekdays_is_accepted() {
        let mut schedule = Schedule::weekly(Vec::<Weekday>::new(), 2, 0);
        schedule.enabled = false;
        assert!(files_job().with_schedule(schedule).validate().is_ok());
    }

    #[test]
    fn monthly_day_out_of_range_is_rejected() {
        let job = files_job().with_schedule(Schedule::monthly(32, 2, 0));
        assert!(job.validate().is_err());
        let job = files_job().with_schedule(Schedule::monthly(0, 2, 0));
        assert!(job.validate().is_err());
    }

    #[test]
    fn bad_time_of_day_is_rejected() {
        let job = files_job().with_schedule(Schedule::daily(24, 0));
        assert!(job.validate().is_err());
    }

    #[test]
    fn empty_sources_allowed_only_for_hyperv() {
        let job = Job::new("vm", BackupKind::Full, BackupTarget::Disk, "/backups");
        assert!(job.validate().is_err());
        let job = job.with_hyperv_machines(["dc01"]);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn name_with_separator_is_rejected() {
        let mut job = files_job();
        job.name = "a/b".into();
        assert!(job.validate().is_err());
        job.name = "   ".into();
        assert!(job.validate().is_err());
    }

    #[test]
    fn job_json_roundtrip_keeps_schedule() {
        let at = chrono::NaiveDate::from_ymd_opt(2024, 6, 2)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        let job = files_job().with_schedule(Schedule::once_at(at));
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
        assert_eq!(back.schedule.unwrap().next_run_time, Some(at));
    }

    #[test]
    fn job_id_parses_from_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
