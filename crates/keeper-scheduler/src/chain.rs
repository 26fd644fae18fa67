use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use keeper_core::types::BackupKind;
use tracing::debug;

/// Timestamp suffix of every backup record name. Sorts lexicographically in
/// chronological order.
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// An existing backup found under a job's destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub name: String,
    pub path: PathBuf,
}

/// `{prefix}_{yyyyMMdd_HHmmss}` for a run started at `now`.
pub fn record_name(prefix: &str, now: NaiveDateTime) -> String {
    format!("{prefix}_{}", now.format(RECORD_TIMESTAMP_FORMAT))
}

/// The most recent record name belonging to `job_name`, by string order.
/// Only `{job_name}_` followed by a timestamp suffix counts, so another
/// job's records never match.
pub fn latest_record<'a, I>(names: I, job_name: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = format!("{job_name}_");
    names
        .into_iter()
        .filter(|name| {
            name.strip_prefix(&prefix)
                .is_some_and(is_timestamp_suffix)
        })
        .max()
}

/// `yyyyMMdd_HHmmss`, or `yyyyMMdd_HHmm` as written by older releases.
fn is_timestamp_suffix(suffix: &str) -> bool {
    let Some((date, time)) = suffix.split_once('_') else {
        return false;
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    date.len() == 8
        && digits(date)
        && NaiveDate::parse_from_str(date, "%Y%m%d").is_ok()
        && matches!(time.len(), 4 | 6)
        && digits(time)
}

/// Locate the record an incremental or differential run builds on.
///
/// Both kinds pick the most recent record of the job, whatever kind produced
/// it. Full and clone kinds never chain. A missing or unreadable destination
/// is a miss, which the engine treats as "take a full backup".
pub fn find_base(destination_root: &Path, job_name: &str, kind: BackupKind) -> Option<BackupRecord> {
    if !kind.chains() {
        return None;
    }

    let entries = match fs::read_dir(destination_root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(root = %destination_root.display(), "no chain base: {e}");
            return None;
        }
    };

    let names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();

    let name = latest_record(names.iter().map(String::as_str), job_name)?.to_string();
    let path = destination_root.join(&name);
    Some(BackupRecord { name, path })
}
