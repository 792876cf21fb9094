use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{LoggingConfig, TelemetryConfig};
use crate::error::{GateError, Result};

/// Build the log filter: `RUST_LOG` when set, otherwise the configured levels
pub fn env_filter(logging: &LoggingConfig, telemetry: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},opentelemetry={}", logging.level, telemetry.otel_log_level))
    })
}

/// Install the global tracing subscriber
pub fn init_tracing(logging: &LoggingConfig, telemetry: &TelemetryConfig) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(logging.show_target);

    let subscriber = Registry::default()
        .with(env_filter(logging, telemetry))
        .with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| GateError::Telemetry(format!("Failed to set global tracing subscriber: {e}")))?;

    Ok(())
}
