//! Data access configuration: database location and connection pool sizing.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use config::{ConfigError, Map, Source, Value, ValueKind};
use relata_resource_pool::ResourcePoolConfig;
use serde::{Deserialize, Serialize};

use crate::StdResult;

/// Prefix of the environment variables overriding the configuration.
pub const ENVIRONMENT_PREFIX: &str = "RELATA";

/// Data access configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAccessConfiguration {
    /// Database connection string, see [ConnectionString].
    pub database_url: String,

    /// Maximum number of simultaneously open connections.
    pub max_open_connections: usize,

    /// Maximum number of connections kept open while unused.
    pub max_idle_connections: usize,

    /// Age, in seconds, after which a connection is closed instead of reused.
    pub connection_max_lifetime_secs: u64,

    /// Idle time, in seconds, after which an unused connection is closed.
    pub connection_max_idle_time_secs: u64,

    /// Time, in milliseconds, to wait for a connection before giving up.
    pub acquire_timeout_ms: u64,

    /// Enforce foreign key constraints on every connection.
    pub enable_foreign_keys: bool,
}

impl DataAccessConfiguration {
    /// Create a configuration for the given database with default pool settings.
    pub fn new_sample(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            max_open_connections: 100,
            max_idle_connections: 10,
            connection_max_lifetime_secs: 1800,
            connection_max_idle_time_secs: 300,
            acquire_timeout_ms: 1000,
            enable_foreign_keys: true,
        }
    }

    /// Load the configuration from the defaults, an optional file and the
    /// `RELATA_*` environment variables, the latter taking precedence.
    pub fn load(config_file: Option<&Path>) -> StdResult<Self> {
        let mut builder = config::Config::builder().add_source(DefaultConfiguration::default());
        if let Some(file) = config_file {
            builder = builder.add_source(config::File::from(file.to_path_buf()).required(false));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENVIRONMENT_PREFIX))
            .build()
            .with_context(|| "configuration build error")?;

        config
            .try_deserialize()
            .with_context(|| "configuration deserialize error")
    }

    /// Pool sizing settings.
    pub fn pool_config(&self) -> ResourcePoolConfig {
        ResourcePoolConfig {
            max_open: self.max_open_connections,
            max_idle: self.max_idle_connections,
            max_idle_time: non_zero_duration(self.connection_max_idle_time_secs),
            max_lifetime: non_zero_duration(self.connection_max_lifetime_secs),
        }
    }

    /// Time to wait for a connection.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Parsed [database_url][Self::database_url].
    pub fn connection_string(&self) -> StdResult<ConnectionString> {
        self.database_url.parse()
    }
}

fn non_zero_duration(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Default configuration with all the default values.
#[derive(Debug, Clone)]
pub struct DefaultConfiguration {
    /// Database connection string
    pub database_url: String,

    /// Maximum number of simultaneously open connections
    pub max_open_connections: String,

    /// Maximum number of idle connections
    pub max_idle_connections: String,

    /// Connection lifetime in seconds
    pub connection_max_lifetime_secs: String,

    /// Connection idle time in seconds
    pub connection_max_idle_time_secs: String,

    /// Connection acquisition timeout in milliseconds
    pub acquire_timeout_ms: String,

    /// Foreign keys enforcement
    pub enable_foreign_keys: String,
}

impl Default for DefaultConfiguration {
    fn default() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            max_open_connections: "100".to_string(),
            max_idle_connections: "10".to_string(),
            connection_max_lifetime_secs: "1800".to_string(),
            connection_max_idle_time_secs: "300".to_string(),
            acquire_timeout_ms: "1000".to_string(),
            enable_foreign_keys: "true".to_string(),
        }
    }
}

impl Source for DefaultConfiguration {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let mut result = Map::new();
        let namespace = "default configuration".to_string();
        let myself = self.clone();
        let mut insert = |key: &str, value: String| {
            result.insert(
                key.to_string(),
                Value::new(Some(&namespace), ValueKind::from(value)),
            );
        };
        insert("database_url", myself.database_url);
        insert("max_open_connections", myself.max_open_connections);
        insert("max_idle_connections", myself.max_idle_connections);
        insert(
            "connection_max_lifetime_secs",
            myself.connection_max_lifetime_secs,
        );
        insert(
            "connection_max_idle_time_secs",
            myself.connection_max_idle_time_secs,
        );
        insert("acquire_timeout_ms", myself.acquire_timeout_ms);
        insert("enable_foreign_keys", myself.enable_foreign_keys);

        Ok(result)
    }
}

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database
    Memory,
    /// Database file
    File(PathBuf),
}

/// Parsed database connection string.
///
/// Accepted forms: `:memory:`, a file path, or
/// `sqlite://<path>?foreign_keys=<bool>&journal_mode=wal&busy_timeout=<ms>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Database location
    pub location: DatabaseLocation,
    /// Foreign keys enforcement, when set in the query string
    pub foreign_keys: Option<bool>,
    /// Write ahead log journal
    pub write_ahead_log: bool,
    /// Busy timeout in milliseconds
    pub busy_timeout_ms: Option<u32>,
}

impl ConnectionString {
    fn with_location(location: DatabaseLocation) -> Self {
        Self {
            location,
            foreign_keys: None,
            write_ahead_log: false,
            busy_timeout_ms: None,
        }
    }

    /// Parse a connection string.
    pub fn parse(value: &str) -> StdResult<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(anyhow!("Empty database connection string"));
        }
        let Some(url) = value.strip_prefix("sqlite://") else {
            return Ok(Self::with_location(Self::parse_location(value)));
        };

        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        if path.is_empty() {
            return Err(anyhow!(
                "Database connection string '{value}' has no database path"
            ));
        }
        let mut connection_string = Self::with_location(Self::parse_location(path));
        for parameter in query.split('&').filter(|p| !p.is_empty()) {
            let (key, parameter_value) = parameter.split_once('=').ok_or_else(|| {
                anyhow!("Invalid parameter '{parameter}' in connection string '{value}'")
            })?;
            match key {
                "foreign_keys" => {
                    connection_string.foreign_keys =
                        Some(parameter_value.parse().with_context(|| {
                            format!("Invalid foreign_keys value '{parameter_value}'")
                        })?);
                }
                "journal_mode" => {
                    connection_string.write_ahead_log = parameter_value.eq_ignore_ascii_case("wal");
                }
                "busy_timeout" => {
                    connection_string.busy_timeout_ms =
                        Some(parameter_value.parse().with_context(|| {
                            format!("Invalid busy_timeout value '{parameter_value}'")
                        })?);
                }
                unknown => {
                    return Err(anyhow!(
                        "Unknown parameter '{unknown}' in connection string '{value}'"
                    ));
                }
            }
        }

        Ok(connection_string)
    }

    fn parse_location(path: &str) -> DatabaseLocation {
        if path == ":memory:" {
            DatabaseLocation::Memory
        } else {
            DatabaseLocation::File(PathBuf::from(path))
        }
    }

    /// Return true for a private in-memory database.
    pub fn is_memory(&self) -> bool {
        self.location == DatabaseLocation::Memory
    }
}

impl FromStr for ConnectionString {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
