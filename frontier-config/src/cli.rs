use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::builder::BoolishValueParser;

/// Command line of the queue workers. Every flag can also be set through the
/// environment variable named next to it; unset values fall back to the
/// configuration file and then to built-in defaults.
#[derive(Parser, Clone, Default)]
#[command(name = "frontier-workers")]
#[command(
    about = "Periodic reconciliation of the crawl frontier's Redis queues with PostgreSQL",
    version
)]
pub struct WorkerArgs {
    /// Optional TOML configuration file
    #[arg(long = "config", env = "FRONTIER_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Database host
    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    /// Database port
    #[arg(long, env = "DB_PORT")]
    pub db_port: Option<u16>,

    /// Database name
    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Database user
    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    /// Database password
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Timeout for a single database query, e.g. `10s`
    #[arg(long, env = "DB_QUERY_TIMEOUT", value_parser = humantime::parse_duration)]
    pub db_query_timeout: Option<Duration>,

    /// Retries after a failed database query
    #[arg(long, env = "DB_MAX_RETRIES")]
    pub db_max_retries: Option<u32>,

    /// Maximum open database connections
    #[arg(long = "db-max-open-conn", env = "DB_MAX_OPEN_CONN")]
    pub db_max_open_connections: Option<u32>,

    /// Idle database connections kept open
    #[arg(long = "db-min-idle-conn", env = "DB_MIN_IDLE_CONN")]
    pub db_min_idle_connections: Option<u32>,

    /// Timeout for acquiring a pooled connection
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT", value_parser = humantime::parse_duration)]
    pub db_acquire_timeout: Option<Duration>,

    /// Idle time before a pooled connection is closed
    #[arg(long, env = "DB_IDLE_TIMEOUT", value_parser = humantime::parse_duration)]
    pub db_idle_timeout: Option<Duration>,

    /// How long a timed out query waits for the database to answer again
    #[arg(long, env = "DB_WAIT_TIMEOUT", value_parser = humantime::parse_duration)]
    pub db_wait_timeout: Option<Duration>,

    /// Redis host
    #[arg(long, env = "REDIS_HOST")]
    pub redis_host: Option<String>,

    /// Redis port
    #[arg(long, env = "REDIS_PORT")]
    pub redis_port: Option<u16>,

    /// Directory holding the Redis Lua scripts
    #[arg(long, env = "REDIS_SCRIPT_PATH", value_name = "DIR")]
    pub redis_script_path: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format: logfmt or json
    #[arg(long = "log-formatter", env = "LOG_FORMATTER")]
    pub log_format: Option<String>,

    /// Include source file and line in log records
    #[arg(
        long,
        env = "LOG_METHOD",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub log_method: Option<bool>,

    /// Emit span close events with timings
    #[arg(
        long,
        env = "TRACE_SPANS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub trace_spans: Option<bool>,
}

impl fmt::Debug for WorkerArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerArgs")
            .field("config", &self.config)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &self.db_password.as_ref().map(|_| "<redacted>"))
            .field("redis_host", &self.redis_host)
            .field("redis_port", &self.redis_port)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_durations_and_booleans() {
        let args = WorkerArgs::try_parse_from([
            "frontier-workers",
            "--db-host",
            "pg.local",
            "--db-query-timeout",
            "2s 500ms",
            "--db-max-open-conn",
            "20",
            "--log-method",
            "--trace-spans",
            "no",
        ])
        .unwrap();

        assert_eq!(args.db_host.as_deref(), Some("pg.local"));
        assert_eq!(args.db_query_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(args.db_max_open_connections, Some(20));
        assert_eq!(args.log_method, Some(true));
        assert_eq!(args.trace_spans, Some(false));
    }

    #[test]
    fn malformed_duration_is_rejected() {
        let result =
            WorkerArgs::try_parse_from(["frontier-workers", "--db-wait-timeout", "soon"]);
        assert!(result.is_err());
    }

    #[test]
    fn debug_hides_password() {
        let args = WorkerArgs {
            db_password: Some("s3cret".into()),
            ..Default::default()
        };
        assert!(!format!("{args:?}").contains("s3cret"));
    }
}
