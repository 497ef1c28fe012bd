//! Guard rails applied to a composed configuration before anything connects.

use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

use crate::loader::ConfigLoadError;
use crate::models::Config;

pub fn validate(config: &Config) -> Result<(), ConfigLoadError> {
    let db = &config.database;
    non_empty("database.host", &db.host)?;
    non_empty("database.name", &db.name)?;
    non_zero_port("database.port", db.port)?;
    non_zero_duration("database.query_timeout", db.query_timeout)?;
    non_zero_duration("database.acquire_timeout", db.acquire_timeout)?;
    non_zero_duration("database.idle_timeout", db.idle_timeout)?;
    non_zero_duration("database.wait_timeout", db.wait_timeout)?;
    if db.max_open_connections == 0 {
        return Err(invalid("database.max_open_connections", "must be at least 1"));
    }
    if db.min_idle_connections > db.max_open_connections {
        return Err(invalid(
            "database.min_idle_connections",
            "must not exceed database.max_open_connections",
        ));
    }

    let redis = &config.redis;
    non_empty("redis.host", &redis.host)?;
    non_zero_port("redis.port", redis.port)?;

    let level = config.log.level.trim();
    if !level.eq_ignore_ascii_case("off") && Level::from_str(level).is_err() {
        return Err(invalid(
            "log.level",
            "expected one of trace, debug, info, warn, error or off",
        ));
    }

    for (operation, interval) in config.workers.iter() {
        if interval.is_zero() {
            return Err(ConfigLoadError::Invalid {
                field: "workers",
                reason: format!("interval of {} must be greater than zero", operation.name()),
            });
        }
    }

    Ok(())
}

fn invalid(field: &'static str, reason: &str) -> ConfigLoadError {
    ConfigLoadError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ConfigLoadError> {
    if value.trim().is_empty() {
        Err(invalid(field, "must not be empty"))
    } else {
        Ok(())
    }
}

fn non_zero_port(field: &'static str, port: u16) -> Result<(), ConfigLoadError> {
    if port == 0 {
        Err(invalid(field, "must not be 0"))
    } else {
        Ok(())
    }
}

fn non_zero_duration(field: &'static str, value: Duration) -> Result<(), ConfigLoadError> {
    if value.is_zero() {
        Err(invalid(field, "must be greater than zero"))
    } else {
        Ok(())
    }
}
