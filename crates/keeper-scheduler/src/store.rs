use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use keeper_core::Job;
use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, SchedulerError};

/// Durable home of the job list.
///
/// `save` always receives the full list; implementations replace what they
/// hold rather than merging.
pub trait JobStore: Send + Sync {
    /// Load all jobs in insertion order. A store that does not exist yet
    /// yields an empty list.
    fn load(&self) -> Result<Vec<Job>>;

    fn save(&self, jobs: &[Job]) -> Result<()>;

    /// Path of the store on disk, used to derive lock files shared with
    /// other processes. `None` for stores private to this process.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// A single pretty-printed JSON document.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JobStore for JsonFileStore {
    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn load(&self) -> Result<Vec<Job>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "job file missing, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    /// Writes a sibling temp file and renames it over the old one, so an
    /// interrupted save leaves the previous list intact.
    fn save(&self, jobs: &[Job]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let body = serde_json::to_string_pretty(jobs)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(body.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| SchedulerError::Storage(format!("replace {}: {}", self.path.display(), e.error)))?;
        debug!(path = %self.path.display(), count = jobs.len(), "jobs saved");
        Ok(())
    }
}

/// Jobs kept in a SQLite table, one JSON body per row.
///
/// Every `load` queries the table again, so writes from other connections
/// are always visible.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut store = Self::new(Connection::open(path.as_ref())?)?;
        store.path = Some(path.as_ref().to_path_buf());
        Ok(store)
    }
}

/// Create the `backup_jobs` table if needed.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS backup_jobs (
            position  INTEGER NOT NULL PRIMARY KEY,
            id        TEXT    NOT NULL UNIQUE,
            body      TEXT    NOT NULL    -- JSON-encoded Job
        ) STRICT;
        ",
    )?;
    Ok(())
}

impl JobStore for SqliteStore {
    fn location(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().expect("job database poisoned");
        let mut stmt = conn.prepare("SELECT body FROM backup_jobs ORDER BY position")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(SchedulerError::from))
            .collect()
    }

    fn save(&self, jobs: &[Job]) -> Result<()> {
        let mut conn = self.conn.lock().expect("job database poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM backup_jobs", [])?;
        {
            let mut insert =
                tx.prepare("INSERT INTO backup_jobs (position, id, body) VALUES (?1, ?2, ?3)")?;
            for (position, job) in jobs.iter().enumerate() {
                let body = serde_json::to_string(job)?;
                insert.execute(rusqlite::params![position as i64, job.id.to_string(), body])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Keeps jobs in process memory only.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved list.
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.lock().expect("memory store poisoned").clone()
    }
}

impl JobStore for MemoryStore {
    fn load(&self) -> Result<Vec<Job>> {
        Ok(self.snapshot())
    }

    fn save(&self, jobs: &[Job]) -> Result<()> {
        *self.jobs.lock().expect("memory store poisoned") = jobs.to_vec();
        Ok(())
    }
}
