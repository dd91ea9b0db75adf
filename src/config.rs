//! Engine configuration: JSON file with per-field defaults, then environment
//! overrides (`CMDMATCH_TIMEOUT_MS`, `CMDMATCH_WORKERS`).

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const ENV_TIMEOUT_MS: &str = "CMDMATCH_TIMEOUT_MS";
pub const ENV_WORKERS: &str = "CMDMATCH_WORKERS";

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget for one match pass.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Worker pool size. Absent means host parallelism.
    #[serde(default)]
    pub workers: Option<usize>,

    /// How long a pass may wait after its deadline for results that were
    /// already finished when the deadline hit.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,

    /// Grace period for each shutdown stage (graceful, then forced).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Session locale (e.g. "en-US"). When set, only dictionary entries of the
    /// same language take part in matching.
    #[serde(default)]
    pub locale: Option<String>,

    /// Persisted algorithm override. Carried as opaque identifiers; unknown
    /// ones simply produce no task.
    #[serde(default)]
    pub algorithms: Option<Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            workers: None,
            drain_ms: default_drain_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            locale: None,
            algorithms: None,
        }
    }
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_drain_ms() -> u64 {
    5
}

fn default_shutdown_grace_ms() -> u64 {
    250
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    UnknownAlgorithm(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
            ConfigError::UnknownAlgorithm(id) => write!(f, "unknown algorithm: {id}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl EngineConfig {
    /// Load from a JSON file, falling back to defaults when it does not exist.
    /// Environment overrides are applied in both cases.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_json(&content)?
        } else {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = std::env::var(ENV_TIMEOUT_MS) {
            self.timeout_ms = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_TIMEOUT_MS}={raw}")))?;
        }
        if let Ok(raw) = std::env::var(ENV_WORKERS) {
            let workers: usize = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_WORKERS}={raw}")))?;
            self.workers = Some(workers);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be > 0".into()));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be > 0".into()));
        }
        if let Some(locale) = &self.locale {
            if locale.trim().is_empty() {
                return Err(ConfigError::Invalid("locale must not be blank".into()));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
