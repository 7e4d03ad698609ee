use crate::config::{LogConfig, LogFormat};
use crate::error::ConfigError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber, writing to stdout.
///
/// `RUST_LOG` wins over the configured level when set. Fails if a
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_ansi(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    result.map_err(|e| ConfigError::Invalid(format!("logging already initialized: {e}")))
}
