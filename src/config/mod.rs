//! Configuration management for freshet.
//!
//! Configuration is read from `~/.config/freshet/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::{Deserialize, Deserializer};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 64;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poll: PollConfig,
    pub storage: StorageConfig,
}

/// Defaults for sweeps and for newly added resources.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Maximum number of resources polled at once
    pub concurrency: usize,
    /// Request timeout given to new resources
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Staleness threshold given to new resources
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_age: Duration,
    pub user_agent: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            max_age: DEFAULT_MAX_AGE,
            user_agent: concat!("freshet/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Log,
    Fs,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Database file (log, sqlite) or directory (fs). Defaults to the
    /// platform data directory.
    pub path: Option<PathBuf>,
    /// Log lines tolerated before the log backend compacts itself
    pub compact_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: None,
            compact_threshold: crate::store::log::DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl StorageConfig {
    /// Configured path, or the backend's default location under the data
    /// directory.
    pub fn resolved_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        let name = match self.backend {
            BackendKind::Log => "freshet.log",
            BackendKind::Fs => "records",
            BackendKind::Memory | BackendKind::Sqlite => "freshet.db",
        };
        Ok(data_dir.join("freshet").join(name))
    }
}

impl Config {
    /// Load configuration from `path`, or from the default path when `None`.
    ///
    /// If the default config file doesn't exist, creates one with comments.
    /// An explicitly given path must exist.
    /// Missing fields in the config file will use default values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default_path = Self::default_config_path()?;
                if !default_path.exists() {
                    Self::create_default_config(&default_path)?;
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        Ok(config)
    }

    /// Get the default config file path: `~/.config/freshet/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("freshet").join("config.toml"))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        tracing::info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# freshet configuration
#
# Durations are written as a number with a unit suffix:
# "500ms", "30s", "15m", "1h", "1d". A bare number means seconds.

[poll]
# Maximum number of feeds fetched at the same time
concurrency = 64

# Request timeout for newly added feeds
timeout = "5s"

# Feeds polled more recently than this are skipped
max_age = "1h"

user_agent = "freshet/0.1.0"

[storage]
# One of: "memory", "log", "fs", "sqlite"
backend = "sqlite"

# Database file (log, sqlite) or directory (fs).
# Defaults to a location under the platform data directory.
# path = "/var/lib/freshet/freshet.db"

# Number of log lines the log backend tolerates before compacting
compact_threshold = 1000
"##
        .to_string()
    }
}

/// Parse a duration like "500ms", "30s", "15m", "1h" or "1d".
/// A bare number is taken as seconds. The result must fit in u64
/// milliseconds, which is how resources persist it.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    let (digits, unit_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(days) = s.strip_suffix('d') {
        (days, 86_400_000)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3_600_000)
    } else if let Some(minutes) = s.strip_suffix('m') {
        (minutes, 60_000)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1000)
    } else {
        (s.as_str(), 1000)
    };

    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("Invalid duration: {}. Use a format like '30s', '15m', '1h'", s))?;
    n.checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration too large: {}", s))
}

/// Format a duration with the largest unit that divides it evenly.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }

    let secs = duration.as_secs();
    if secs >= 86400 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
