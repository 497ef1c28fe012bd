//! Configuration for the frontier queue workers.
//!
//! Values come from command-line flags, their environment variables (a
//! `.env` file is honoured), an optional TOML file, and built-in defaults,
//! in that order. The composed [`Config`] is validated before it is handed
//! to the workers.
#![allow(missing_docs)]

pub mod cli;
pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use cli::WorkerArgs;
pub use loader::{ConfigLoadError, ConfigLoader, load_env_file};
pub use models::{
    Config, ConfigMetadata, DatabaseConfig, LogConfig, LogFormat, RedisConfig, WorkerIntervals,
};
