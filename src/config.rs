//! Gamewright configuration.
//!
//! Loaded from `<home>/config.toml`, where `<home>` is `$GAMEWRIGHT_HOME` or
//! `~/.gamewright`. Every key is optional; a missing file means defaults.
//!
//! ```toml
//! [limits]
//! max-scenes = 50
//!
//! [export]
//! workers = 3
//! retention-hours = 24
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::validate::Limits;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory; set GAMEWRIGHT_HOME")]
    NoHome,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub limits: Limits,
    pub preview: PreviewConfig,
    pub export: ExportConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PreviewConfig {
    /// Upper bound on a single preview build.
    pub timeout_secs: u64,

    /// How long a built bundle stays addressable.
    pub ttl_minutes: u64,

    /// Prefix for handle URLs; the bundle id is appended.
    pub base_url: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            ttl_minutes: 120,
            base_url: "/previews".into(),
        }
    }
}

impl PreviewConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExportConfig {
    /// Concurrent packaging jobs.
    pub workers: usize,

    /// Upper bound on each packaging stage.
    pub stage_timeout_secs: u64,

    pub max_artifact_bytes: u64,

    /// Age after which finished jobs and their artifacts are removed.
    pub retention_hours: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            stage_timeout_secs: 30,
            max_artifact_bytes: 100 * 1024 * 1024,
            retention_hours: 24,
        }
    }
}

impl ExportConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageConfig {
    /// How long to wait on another process holding a session file's lock.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Config {
    /// Load config from `<home>/config.toml`, or defaults if there is none.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join("config.toml");
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// The gamewright home: `$GAMEWRIGHT_HOME`, else `~/.gamewright`.
    pub fn home() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os("GAMEWRIGHT_HOME").filter(|h| !h.is_empty()) {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir()
            .map(|h| h.join(".gamewright"))
            .ok_or(ConfigError::NoHome)
    }
}
