use std::path::{Path, PathBuf};
use std::time::Duration;

use frontier_core::Operation;
use frontier_core::mover::DELAYED_MOVE_SCRIPT;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::cli::WorkerArgs;
use crate::models::{
    Config, ConfigMetadata, DatabaseConfig, LogConfig, LogFormat, RedisConfig, WorkerIntervals,
};
use crate::sources::FileConfig;
use crate::validation::validate;

pub const DEFAULT_DB_HOST: &str = "postgres";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "veidemann";
pub const DEFAULT_DB_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DB_MAX_RETRIES: u32 = 3;
pub const DEFAULT_DB_MAX_OPEN_CONNECTIONS: u32 = 10;
pub const DEFAULT_DB_MIN_IDLE_CONNECTIONS: u32 = 2;
pub const DEFAULT_DB_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DB_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_DB_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_REDIS_HOST: &str = "redis-veidemann-frontier-master";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_REDIS_SCRIPT_PATH: &str = "./lua";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to load .env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("invalid duration {value:?} for {key}: {message}")]
    InvalidDuration {
        key: String,
        value: String,
        message: String,
    },

    #[error("unknown worker {name:?} in [workers], expected one of: {expected}")]
    UnknownWorker { name: String, expected: String },

    #[error("unknown log format {value:?}, expected logfmt or json")]
    UnknownLogFormat { value: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Load a `.env` file from the working directory or its parents into the
/// process environment. Must run before the command line is parsed so the
/// values reach the `env` bindings. Returns the file used, if any.
pub fn load_env_file() -> Result<Option<PathBuf>, ConfigLoadError> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Composes a [`Config`] from parsed arguments (flags and environment), an
/// optional TOML file, and defaults, in that order of precedence.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    args: WorkerArgs,
    env_file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(args: WorkerArgs) -> Self {
        Self {
            args,
            env_file: None,
        }
    }

    /// Record the `.env` file that was loaded before argument parsing.
    pub fn with_env_file(mut self, env_file: Option<PathBuf>) -> Self {
        self.env_file = env_file;
        self
    }

    pub fn load(&self) -> Result<Config, ConfigLoadError> {
        let file = match &self.args.config {
            Some(path) => read_file(path)?,
            None => FileConfig::default(),
        };
        let config = self.compose(file)?;
        validate(&config)?;
        Ok(config)
    }

    fn compose(&self, file: FileConfig) -> Result<Config, ConfigLoadError> {
        let args = &self.args;
        let db = file.database;
        let redis = file.redis;
        let log = file.log;

        let database = DatabaseConfig {
            host: pick(args.db_host.clone(), db.host, DEFAULT_DB_HOST.to_string()),
            port: pick(args.db_port, db.port, DEFAULT_DB_PORT),
            name: pick(args.db_name.clone(), db.name, DEFAULT_DB_NAME.to_string()),
            user: pick(args.db_user.clone(), db.user, String::new()),
            password: Zeroizing::new(pick(args.db_password.clone(), db.password, String::new())),
            query_timeout: duration(
                "database.query_timeout",
                args.db_query_timeout,
                db.query_timeout.as_deref(),
                DEFAULT_DB_QUERY_TIMEOUT,
            )?,
            max_retries: pick(args.db_max_retries, db.max_retries, DEFAULT_DB_MAX_RETRIES),
            max_open_connections: pick(
                args.db_max_open_connections,
                db.max_open_connections,
                DEFAULT_DB_MAX_OPEN_CONNECTIONS,
            ),
            min_idle_connections: pick(
                args.db_min_idle_connections,
                db.min_idle_connections,
                DEFAULT_DB_MIN_IDLE_CONNECTIONS,
            ),
            acquire_timeout: duration(
                "database.acquire_timeout",
                args.db_acquire_timeout,
                db.acquire_timeout.as_deref(),
                DEFAULT_DB_ACQUIRE_TIMEOUT,
            )?,
            idle_timeout: duration(
                "database.idle_timeout",
                args.db_idle_timeout,
                db.idle_timeout.as_deref(),
                DEFAULT_DB_IDLE_TIMEOUT,
            )?,
            wait_timeout: duration(
                "database.wait_timeout",
                args.db_wait_timeout,
                db.wait_timeout.as_deref(),
                DEFAULT_DB_WAIT_TIMEOUT,
            )?,
        };

        let redis = RedisConfig {
            host: pick(args.redis_host.clone(), redis.host, DEFAULT_REDIS_HOST.to_string()),
            port: pick(args.redis_port, redis.port, DEFAULT_REDIS_PORT),
            script_path: pick(
                args.redis_script_path.clone(),
                redis.script_path,
                PathBuf::from(DEFAULT_REDIS_SCRIPT_PATH),
            ),
        };

        let raw_format = pick(args.log_format.clone(), log.formatter, LogFormat::default().to_string());
        let format = raw_format
            .parse::<LogFormat>()
            .map_err(|value| ConfigLoadError::UnknownLogFormat { value })?;
        let log = LogConfig {
            level: pick(args.log_level.clone(), log.level, DEFAULT_LOG_LEVEL.to_string()),
            format,
            method: pick(args.log_method, log.method, false),
            trace_spans: pick(args.trace_spans, log.trace_spans, false),
        };

        let mut workers = WorkerIntervals::default();
        for (name, raw) in &file.workers {
            let operation = Operation::ALL
                .into_iter()
                .find(|op| op.name() == name)
                .ok_or_else(|| ConfigLoadError::UnknownWorker {
                    name: name.clone(),
                    expected: Operation::ALL
                        .iter()
                        .map(|op| op.name())
                        .collect::<Vec<_>>()
                        .join(", "),
                })?;
            let interval = parse_duration(&format!("workers.{name}"), raw)?;
            workers.set(operation, interval);
        }

        Ok(Config {
            database,
            redis,
            log,
            workers,
            metadata: ConfigMetadata {
                config_path: self.args.config.clone(),
                env_file_loaded: self.env_file.is_some(),
            },
        })
    }
}

impl Config {
    /// Path of the delayed-move script inside the configured script
    /// directory.
    pub fn delayed_move_script(&self) -> PathBuf {
        self.redis.script_path.join(DELAYED_MOVE_SCRIPT)
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded configuration file");
    Ok(file)
}

fn pick<T>(arg: Option<T>, file: Option<T>, default: T) -> T {
    arg.or(file).unwrap_or(default)
}

fn duration(
    key: &str,
    arg: Option<Duration>,
    file: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match (arg, file) {
        (Some(value), _) => Ok(value),
        (None, Some(raw)) => parse_duration(key, raw),
        (None, None) => Ok(default),
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|err| ConfigLoadError::InvalidDuration {
        key: key.to_string(),
        value: raw.to_string(),
        message: err.to_string(),
    })
}
