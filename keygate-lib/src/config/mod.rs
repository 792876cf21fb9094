mod backend;
mod loader;
mod rate_limit;
mod root;
mod security;
mod telemetry;
mod timeout;

pub use backend::BackendConfig;
pub use loader::{load_from_path, load_from_str, validate_config};
pub use rate_limit::{RateLimitConfig, RegistryConfig};
pub use root::Config;
pub use security::SecurityConfig;
pub use telemetry::{LoggingConfig, TelemetryConfig};
pub use timeout::{KeepAliveConfig, TimeoutConfig};
