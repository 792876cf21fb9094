use serde::Deserialize;
use std::time::Duration;

/// Token bucket configuration shared by every caller identity
///
/// ```toml
/// [rate_limit]
/// capacity = 10
/// refill_tokens = 10
/// refill_interval_ms = 60000
/// api_key_header = "X-api-key"
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum number of tokens a bucket holds (burst size)
    /// A new identity starts with a full bucket
    /// Default: 10
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    /// Tokens added back per refill interval
    /// Refill is continuous: half an interval restores half of these tokens
    /// Default: 10
    #[serde(default = "default_refill_tokens")]
    pub refill_tokens: u64,
    /// Refill interval in milliseconds
    /// Default: 60000 (1 minute)
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
    /// Request header carrying the caller identity
    /// Requests without it get a generated identity for that request only
    /// Default: "X-api-key"
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

impl RateLimitConfig {
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_tokens: default_refill_tokens(),
            refill_interval_ms: default_refill_interval_ms(),
            api_key_header: default_api_key_header(),
        }
    }
}

/// Identity registry housekeeping
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RegistryConfig {
    /// How often, in seconds, buckets that have refilled to capacity are dropped
    /// from the registry. A full bucket is indistinguishable from a new one, so
    /// this only bounds memory; it never changes admission decisions.
    /// 0 disables the reaper.
    /// Default: 60
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { reap_interval_secs: default_reap_interval_secs() }
    }
}

fn default_capacity() -> u64 {
    10
}

fn default_refill_tokens() -> u64 {
    10
}

fn default_refill_interval_ms() -> u64 {
    60_000
}

fn default_api_key_header() -> String {
    "X-api-key".to_string()
}

fn default_reap_interval_secs() -> u64 {
    60
}
