use anyhow::Context;
use frontier_config::{LogConfig, LogFormat};
use tracing_subscriber::{
    EnvFilter, fmt, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level {:?}", config.level))?,
    };
    let span_events = if config.trace_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.method)
                    .with_line_number(config.method)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Logfmt => registry
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_file(config.method)
                    .with_line_number(config.method)
                    .with_span_events(span_events),
            )
            .try_init(),
    }
    .context("failed to install log subscriber")
}
