//! Identity-keyed token-bucket admission control.
//!
//! - **TokenBucket** (`bucket.rs`): continuous refill, exact integer math,
//!   per-bucket mutex around refill-then-debit.
//! - **BucketRegistry** (`registry.rs`): identity → bucket, created lazily and
//!   exactly once per identity.
//! - **AdmissionFilter** (`filter.rs`): identity extraction, one token per
//!   request, response shaping for admitted and rejected requests.
//! - **Reaper** (`reaper.rs`): background purge of full, unused buckets.
//!
//! State is process-local. Several gateway replicas each enforce their own
//! quota per identity.
//!
//! # Configuration
//!
//! ```toml
//! [rate_limit]
//! capacity = 10
//! refill_tokens = 10
//! refill_interval_ms = 60000
//!
//! [registry]
//! reap_interval_secs = 60
//! ```

mod bucket;
mod clock;
mod filter;
mod reaper;
mod registry;

pub use bucket::{BucketConfig, ConsumeResult, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use filter::{
    add_quota_headers, names, too_many_requests, Admission, AdmissionFilter, Identity,
    IdentitySource, RespBody, TOO_MANY_REQUESTS_BODY,
};
pub use reaper::spawn_reaper;
pub use registry::BucketRegistry;
