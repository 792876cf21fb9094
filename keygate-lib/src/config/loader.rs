use std::fs;
use std::path::Path;

use http::HeaderName;

use crate::config::Config;
use crate::error::{GateError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| GateError::Config(format!("Failed to read config file: {e}")))?;
    load_from_str(&txt)
}

pub fn load_from_str(txt: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(txt)
        .map_err(|e| GateError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.backend.address.trim().is_empty() {
        return Err(GateError::Config("backend address cannot be empty".into()));
    }

    let rl = &cfg.rate_limit;
    if rl.capacity == 0 {
        return Err(GateError::Config("rate_limit.capacity must be > 0".into()));
    }
    if rl.refill_tokens == 0 {
        return Err(GateError::Config("rate_limit.refill_tokens must be > 0".into()));
    }
    if rl.refill_interval_ms == 0 {
        return Err(GateError::Config("rate_limit.refill_interval_ms must be > 0".into()));
    }
    if HeaderName::from_bytes(rl.api_key_header.as_bytes()).is_err() {
        return Err(GateError::Config(format!(
            "rate_limit.api_key_header is not a valid header name: {:?}",
            rl.api_key_header
        )));
    }

    if cfg.security.max_connections == 0 {
        return Err(GateError::Config("security.max_connections must be > 0".into()));
    }

    Ok(())
}
