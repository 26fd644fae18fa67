use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How often the scheduler looks for due jobs.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_ENGINE_PROGRAM: &str = "keeper-engine";

/// Top-level config (keeper.toml + KEEPER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeeperConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    /// Single pretty-printed JSON document, replaced atomically on save.
    #[default]
    Json,
    /// SQLite database file.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_jobs_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_jobs_path(),
        }
    }
}

/// External program implementing the backup engine operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_program")]
    pub program: String,
    /// Arguments placed before the operation name on every invocation.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_engine_program(),
            args: Vec::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_engine_program() -> String {
    DEFAULT_ENGINE_PROGRAM.to_string()
}
fn default_jobs_path() -> String {
    format!("{}/jobs.json", keeper_home())
}

fn keeper_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.keeper", home)
}

impl KeeperConfig {
    /// Load config from a TOML file with KEEPER_* env var overrides.
    ///
    /// The file is the explicit path when given, else ~/.keeper/keeper.toml.
    /// A missing file is fine; defaults fill every field.
    /// Nested keys use a double underscore: KEEPER_SCHEDULER__POLL_INTERVAL_SECS.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading config");

        let config: KeeperConfig = Figment::from(Serialized::defaults(KeeperConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("KEEPER_").split("__"))
            .extract()
            .map_err(|e| crate::error::KeeperError::Config(e.to_string()))?;

        if config.scheduler.poll_interval_secs == 0 {
            return Err(crate::error::KeeperError::Config(
                "scheduler.poll_interval_secs must be greater than zero".into(),
            ));
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    format!("{}/keeper.toml", keeper_home())
}
