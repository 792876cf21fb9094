#![forbid(unsafe_code)]

pub mod admission;
pub mod config;
pub mod error;
pub mod proxy;
pub mod telemetry;

pub use admission::{
    Admission, AdmissionFilter, BucketConfig, BucketRegistry, Clock, ConsumeResult, ManualClock,
    SystemClock, TokenBucket,
};
pub use config::{load_from_path, Config};
pub use error::{GateError, Result};
pub use proxy::{run, Gateway};
