use serde::Deserialize;

/// Protected downstream service
///
/// Every admitted request is forwarded to this single backend. Path, query,
/// method, headers and body are passed through unchanged.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BackendConfig {
    /// Backend server address (host:port format)
    /// Example: "notes-api:9000" or "127.0.0.1:8081"
    pub address: String,
    /// Idle timeout in seconds for pooled backend connections
    /// Default: 90 seconds
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout: u64,
    /// Maximum number of idle connections kept per backend host
    /// 0 = unlimited (hyper default)
    /// Default: 0
    #[serde(default)]
    pub pool_max_idle_per_host: usize,
}

impl BackendConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            pool_idle_timeout: default_pool_idle_timeout(),
            pool_max_idle_per_host: 0,
        }
    }
}

fn default_pool_idle_timeout() -> u64 {
    90
}
