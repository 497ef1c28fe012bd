use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use frontier_config::{Config, ConfigLoader, WorkerArgs, load_env_file};
use frontier_core::{
    DelayedMoveScript, PostgresRecordStore, QueueStore, RecordStore, Reconciler, RedisQueueStore,
};
use frontier_workers::{Scheduler, logging, shutdown};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = logging::init(&config.log) {
        eprintln!("Error: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => {
            info!("Frontier workers stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "Frontier workers stopped");
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> anyhow::Result<Config> {
    let env_file = load_env_file()?;
    let args = WorkerArgs::parse();
    ConfigLoader::new(args)
        .with_env_file(env_file)
        .load()
        .context("invalid configuration")
}

async fn run(config: Config) -> anyhow::Result<()> {
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }

    let script = DelayedMoveScript::load(&config.redis.script_path)
        .with_context(|| format!("failed to load {}", config.delayed_move_script().display()))?;
    let queues = RedisQueueStore::connect(&config.redis.host, config.redis.port, &script)
        .await
        .context("failed to connect to Redis")?;
    let records = Arc::new(
        PostgresRecordStore::connect(config.database.postgres_options())
            .await
            .with_context(|| {
                format!(
                    "failed to connect to PostgreSQL at {}",
                    config.database.address()
                )
            })?,
    );

    let reconciler = Reconciler::new(
        Arc::new(queues) as Arc<dyn QueueStore>,
        Arc::clone(&records) as Arc<dyn RecordStore>,
    );
    let scheduler = Scheduler::new(reconciler, config.workers.iter());
    let signals = shutdown::cancel_on_signal(scheduler.shutdown_token());

    info!("Frontier workers started");
    let result = scheduler.run().await;

    signals.abort();
    records.close().await;
    result.map_err(Into::into)
}
