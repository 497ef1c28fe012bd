use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use frontier_core::Operation;
use frontier_core::records::PostgresOptions;
use zeroize::Zeroizing;

/// Fully resolved configuration of the queue workers.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub log: LogConfig,
    pub workers: WorkerIntervals,
    pub metadata: ConfigMetadata,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: Zeroizing<String>,
    pub query_timeout: Duration,
    pub max_retries: u32,
    pub max_open_connections: u32,
    pub min_idle_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub wait_timeout: Duration,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("query_timeout", &self.query_timeout)
            .field("max_retries", &self.max_retries)
            .field("max_open_connections", &self.max_open_connections)
            .field("min_idle_connections", &self.min_idle_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("wait_timeout", &self.wait_timeout)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn postgres_options(&self) -> PostgresOptions {
        PostgresOptions {
            host: self.host.clone(),
            port: self.port,
            database: self.name.clone(),
            username: self.user.clone(),
            password: self.password.as_str().to_owned(),
            query_timeout: self.query_timeout,
            max_retries: self.max_retries,
            max_connections: self.max_open_connections,
            min_connections: self.min_idle_connections,
            acquire_timeout: self.acquire_timeout,
            idle_timeout: self.idle_timeout,
            wait_timeout: self.wait_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    /// Directory containing `chg_delayed_queue.lua`.
    pub script_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Include source file and line.
    pub method: bool,
    /// Emit span close events.
    pub trace_spans: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Logfmt,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "logfmt" | "text" => Ok(Self::Logfmt),
            "json" => Ok(Self::Json),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logfmt => f.write_str("logfmt"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Cadence of each reconciliation loop. Operations without an override run
/// at their default interval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerIntervals {
    overrides: HashMap<Operation, Duration>,
}

impl WorkerIntervals {
    pub fn set(&mut self, operation: Operation, interval: Duration) {
        self.overrides.insert(operation, interval);
    }

    pub fn interval(&self, operation: Operation) -> Duration {
        self.overrides
            .get(&operation)
            .copied()
            .unwrap_or_else(|| operation.default_interval())
    }

    /// Every operation paired with its effective interval, in scheduling
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (Operation, Duration)> + '_ {
        Operation::ALL
            .into_iter()
            .map(|operation| (operation, self.interval(operation)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
