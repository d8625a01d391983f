//! # Back-Office Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Command line (highest)       --db, --config                         │
//! │  2. Environment variables        SORVETERIA_DB_PATH, ...               │
//! │  3. TOML file                    ~/.config/sorveteria-pos/backoffice.toml│
//! │  4. Defaults (lowest)                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## File Format
//! ```toml
//! [database]
//! path = "/var/lib/sorveteria/sorveteria.db"
//! max_connections = 5
//! run_migrations = true
//!
//! [jobs]
//! dry_run = true
//! cancel_duplicates = false
//!
//! [logging]
//! filter = "info,sqlx=warn"
//! ```
//!
//! Business configuration (loyalty, cashback, card fees) lives in the store,
//! not here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use sorveteria_db::DbConfig;

pub const ENV_DB_PATH: &str = "SORVETERIA_DB_PATH";
pub const ENV_MAX_CONNECTIONS: &str = "SORVETERIA_MAX_CONNECTIONS";
pub const ENV_RUN_MIGRATIONS: &str = "SORVETERIA_RUN_MIGRATIONS";
pub const ENV_DRY_RUN: &str = "SORVETERIA_DRY_RUN";
pub const ENV_CANCEL_DUPLICATES: &str = "SORVETERIA_CANCEL_DUPLICATES";
pub const ENV_LOG: &str = "SORVETERIA_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to write config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no config path available on this platform")]
    NoPath,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./sorveteria.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    /// Jobs compute without writing unless `--apply` is given.
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Status sync cancels legacy-keyed duplicates.
    #[serde(default)]
    pub cancel_duplicates: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        JobSettings {
            dry_run: true,
            cancel_duplicates: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            filter: default_filter(),
        }
    }
}

// =============================================================================
// BackofficeConfig
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackofficeConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub jobs: JobSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl BackofficeConfig {
    /// Defaults, then the file (if present), then the environment, then validation.
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = match config_path.or_else(Self::default_config_path) {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!(?path, "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        info!(?path, "Loading back-office config");
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Writes this config as TOML, creating the parent directory.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<PathBuf> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or(ConfigError::NoPath)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        info!(?path, "Back-office config saved");
        Ok(path)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be greater than 0".into()));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.filter must not be empty".into()));
        }
        Ok(())
    }

    /// Applies `SORVETERIA_*` overrides read through `lookup`.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_DB_PATH) {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
        if let Some(max) = lookup(ENV_MAX_CONNECTIONS) {
            match max.parse::<u32>() {
                Ok(max) => self.database.max_connections = max,
                Err(_) => warn!(value = %max, "Ignoring invalid {}", ENV_MAX_CONNECTIONS),
            }
        }
        if let Some(flag) = lookup(ENV_RUN_MIGRATIONS) {
            match parse_flag(&flag) {
                Some(run) => self.database.run_migrations = run,
                None => warn!(value = %flag, "Ignoring invalid {}", ENV_RUN_MIGRATIONS),
            }
        }
        if let Some(flag) = lookup(ENV_DRY_RUN) {
            match parse_flag(&flag) {
                Some(dry_run) => self.jobs.dry_run = dry_run,
                None => warn!(value = %flag, "Ignoring invalid {}", ENV_DRY_RUN),
            }
        }
        if let Some(flag) = lookup(ENV_CANCEL_DUPLICATES) {
            match parse_flag(&flag) {
                Some(cancel) => self.jobs.cancel_duplicates = cancel,
                None => warn!(value = %flag, "Ignoring invalid {}", ENV_CANCEL_DUPLICATES),
            }
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.logging.filter = filter;
        }
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .run_migrations(self.database.run_migrations)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("br", "sorveteria", "sorveteria-pos")
            .map(|dirs| dirs.config_dir().join("backoffice.toml"))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
