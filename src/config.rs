use crate::core::db::AccessMode;
use crate::core::{DatabaseError, Result};
use crate::dialect::Dialect;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Longest database name any supported backend accepts
pub const MAX_DATABASE_NAME_LENGTH: usize = 40;

pub const DEFAULT_DATABASE_NAME: &str = "digitalid";

static DATABASE_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+$").expect("the database name pattern is a valid regex")
});

/// Top-level configuration structure parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub dialect: Dialect,
    #[serde(default)]
    pub access_mode: AccessMode,
    pub sqlite: Option<SqliteConfig>,
    pub server: Option<ServerConfig>,
    pub purge: Option<PurgeConfig>,
}

/// Settings of the SQLite-class dialects.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    #[serde(default = "default_database_name")]
    pub name: String,
    /// Defaults to `<name>.db` in the user's data directory
    pub path: Option<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Connection settings of the server dialects.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Defaults to the dialect's standard port
    pub port: Option<u16>,
    #[serde(default = "default_database_name")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PurgeConfig {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_database_name() -> String {
    DEFAULT_DATABASE_NAME.to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_initial_delay_secs() -> u64 {
    60
}

fn default_interval_secs() -> u64 {
    3_600
}

/// Whether `name` can name a database on every supported backend.
pub fn is_valid_database_name(name: &str) -> bool {
    name.len() <= MAX_DATABASE_NAME_LENGTH && DATABASE_NAME_PATTERN.is_match(name)
}

impl DatabaseConfig {
    /// Parses and validates a configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use dialectdb::config::DatabaseConfig;
    ///
    /// let config = DatabaseConfig::from_toml_str("dialect = \"sqlite\"").unwrap();
    /// assert_eq!(config.sqlite_config().name, "digitalid");
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DatabaseConfig =
            toml::from_str(content).map_err(|e| DatabaseError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(sqlite) = &self.sqlite {
            check_database_name(&sqlite.name)?;
        }
        if let Some(server) = &self.server {
            check_database_name(&server.database)?;
            if server.host.is_empty() {
                return Err(DatabaseError::Config("the server host is empty".to_string()));
            }
        }
        if let Some(purge) = &self.purge {
            if purge.interval_secs == 0 {
                return Err(DatabaseError::Config(
                    "the purge interval has to be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn sqlite_config(&self) -> SqliteConfig {
        self.sqlite.clone().unwrap_or_default()
    }

    pub fn server_config(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn purge_config(&self) -> PurgeConfig {
        self.purge.clone().unwrap_or_default()
    }
}

fn check_database_name(name: &str) -> Result<()> {
    if is_valid_database_name(name) {
        Ok(())
    } else {
        Err(DatabaseError::Config(format!(
            "'{}' is not a valid database name: use at most {} letters, digits or underscores",
            name, MAX_DATABASE_NAME_LENGTH
        )))
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfig {
            name: default_database_name(),
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl SqliteConfig {
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join(format!("{}.db", self.name)))
            .ok_or_else(|| DatabaseError::Config("no user data directory to store the database in".to_string()))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: None,
            database: default_database_name(),
            user: default_user(),
            password: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn port_for(&self, dialect: Dialect) -> Option<u16> {
        self.port.or_else(|| dialect.default_port())
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        PurgeConfig {
            initial_delay_secs: default_initial_delay_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl PurgeConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
