use serde::Deserialize;
use std::net::SocketAddr;

use super::backend::BackendConfig;
use super::rate_limit::{RateLimitConfig, RegistryConfig};
use super::security::SecurityConfig;
use super::telemetry::{LoggingConfig, TelemetryConfig};
use super::timeout::TimeoutConfig;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address and port to listen on
    /// Example: "0.0.0.0:8080" or "127.0.0.1:8080"
    pub listen: SocketAddr,
    /// Service protected by the gateway
    pub backend: BackendConfig,
    /// Per-identity token bucket settings
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Identity registry housekeeping
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,
    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Configuration with defaults for everything except the two addresses
    pub fn new(listen: SocketAddr, backend: impl Into<String>) -> Self {
        Self {
            listen,
            backend: BackendConfig::new(backend),
            rate_limit: RateLimitConfig::default(),
            registry: RegistryConfig::default(),
            security: SecurityConfig::default(),
            timeout: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}
