#![forbid(unsafe_code)]

use clap::Parser;
use keygate_lib::config::{LoggingConfig, TelemetryConfig};
use keygate_lib::telemetry::init_tracing;
use keygate_lib::{load_from_path, run};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Keygate: per-API-key rate limiting gateway")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "config/keygate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            let _ = init_tracing(&LoggingConfig::default(), &TelemetryConfig::default());
            error!(%err, path = %cli.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&cfg.logging, &cfg.telemetry) {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(1);
    }

    info!(
        listen = %cfg.listen,
        backend = %cfg.backend.address,
        capacity = cfg.rate_limit.capacity,
        refill_tokens = cfg.rate_limit.refill_tokens,
        refill_interval_ms = cfg.rate_limit.refill_interval_ms,
        "configuration loaded"
    );

    if let Err(err) = run(Arc::new(cfg)).await {
        error!(%err, "gateway exited with error");
        std::process::exit(1);
    }
}
