//! Continuous token bucket.
//!
//! Tokens are tracked as a whole count plus a sub-token remainder expressed in
//! `token·nanoseconds`, so refill is exact integer arithmetic: after `t`
//! nanoseconds a bucket gains `t * refill_tokens / refill_interval` tokens and
//! the fractional part carries over to the next refill.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::admission::clock::Clock;
use crate::config::RateLimitConfig;

/// Shape of every bucket handed out by a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    capacity: u64,
    refill_tokens: u64,
    refill_interval: Duration,
}

impl BucketConfig {
    /// `refill_tokens` are added back, continuously, over every `refill_interval`.
    pub fn new(capacity: u64, refill_tokens: u64, refill_interval: Duration) -> Self {
        Self { capacity, refill_tokens, refill_interval }
    }

    /// Bucket refilling `tokens_per_second` every second.
    pub fn per_second(capacity: u64, tokens_per_second: u64) -> Self {
        Self::new(capacity, tokens_per_second, Duration::from_secs(1))
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_tokens(&self) -> u64 {
        self.refill_tokens
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        let secs = self.refill_interval.as_secs_f64();
        if secs == 0.0 {
            return f64::INFINITY;
        }
        self.refill_tokens as f64 / secs
    }

    fn interval_nanos(&self) -> u128 {
        self.refill_interval.as_nanos()
    }
}

impl From<&RateLimitConfig> for BucketConfig {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.capacity, cfg.refill_tokens, cfg.refill_interval())
    }
}

/// Outcome of [`TokenBucket::try_consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeResult {
    /// Tokens were debited.
    Consumed {
        /// Whole tokens left after the debit
        remaining: u64,
    },
    /// Not enough tokens; nothing was debited.
    Rejected {
        /// Whole tokens currently in the bucket
        remaining: u64,
        /// Time until the bucket holds enough tokens for the same cost
        wait: Duration,
    },
}

impl ConsumeResult {
    pub fn is_consumed(&self) -> bool {
        matches!(self, ConsumeResult::Consumed { .. })
    }

    pub fn remaining(&self) -> u64 {
        match self {
            ConsumeResult::Consumed { remaining } => *remaining,
            ConsumeResult::Rejected { remaining, .. } => *remaining,
        }
    }

    /// Time to wait before retrying; zero when consumed.
    pub fn wait(&self) -> Duration {
        match self {
            ConsumeResult::Consumed { .. } => Duration::ZERO,
            ConsumeResult::Rejected { wait, .. } => *wait,
        }
    }

    pub fn wait_nanos(&self) -> u64 {
        u64::try_from(self.wait().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Wait rounded down to whole seconds.
    pub fn retry_after_secs(&self) -> u64 {
        self.wait().as_secs()
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    // sub-token progress, in token·ns; always < refill interval in ns
    remainder: u128,
    last_refill: Instant,
}

/// Per-identity token bucket.
///
/// The refill-then-debit sequence runs under a per-bucket mutex, so concurrent
/// consumers of the same bucket can never both spend the same token. Distinct
/// buckets share nothing.
pub struct TokenBucket {
    config: BucketConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(config: BucketConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                remainder: 0,
                last_refill: now,
            }),
        }
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Try to debit `cost` tokens.
    ///
    /// # Example
    /// ```
    /// use keygate_lib::{BucketConfig, ManualClock, TokenBucket};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let clock = Arc::new(ManualClock::new());
    /// let bucket = TokenBucket::new(BucketConfig::per_second(2, 1), clock.clone());
    ///
    /// assert_eq!(bucket.try_consume(1).remaining(), 1);
    /// assert_eq!(bucket.try_consume(1).remaining(), 0);
    ///
    /// let rejected = bucket.try_consume(1);
    /// assert!(!rejected.is_consumed());
    /// assert_eq!(rejected.wait(), Duration::from_secs(1));
    ///
    /// clock.advance(Duration::from_secs(1));
    /// assert!(bucket.try_consume(1).is_consumed());
    /// ```
    pub fn try_consume(&self, cost: u64) -> ConsumeResult {
        let now = self.clock.now();
        let mut state = self.lock();
        self.refill(&mut state, now);

        if state.tokens >= cost {
            state.tokens -= cost;
            return ConsumeResult::Consumed { remaining: state.tokens };
        }

        let wait = self.time_to_gain(cost - state.tokens, &state);
        ConsumeResult::Rejected { remaining: state.tokens, wait }
    }

    /// Whole tokens available right now, without consuming any.
    pub fn available(&self) -> u64 {
        let now = self.clock.now();
        let mut state = self.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    /// True when the bucket has refilled to capacity, i.e. it is in the same
    /// state as a freshly created one.
    pub fn is_full(&self) -> bool {
        self.available() >= self.config.capacity
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        if now <= state.last_refill {
            return;
        }
        let elapsed = now.duration_since(state.last_refill).as_nanos();
        state.last_refill = now;

        if state.tokens >= self.config.capacity {
            state.remainder = 0;
            return;
        }

        let interval = self.config.interval_nanos();
        let progress = elapsed
            .saturating_mul(u128::from(self.config.refill_tokens))
            .saturating_add(state.remainder);
        // a zero interval refills instantly
        let gained = progress.checked_div(interval).unwrap_or(u128::MAX);
        let remainder = progress.checked_rem(interval).unwrap_or(0);

        let total = u128::from(state.tokens).saturating_add(gained);
        if total >= u128::from(self.config.capacity) {
            state.tokens = self.config.capacity;
            state.remainder = 0;
        } else {
            // total < capacity, which fits in u64
            state.tokens = total as u64;
            state.remainder = remainder;
        }
    }

    fn time_to_gain(&self, tokens: u64, state: &BucketState) -> Duration {
        let needed = u128::from(tokens)
            .saturating_mul(self.config.interval_nanos())
            .saturating_sub(state.remainder);
        let refill = u128::from(self.config.refill_tokens);
        match needed.checked_div(refill) {
            Some(nanos) => {
                let nanos = if needed % refill == 0 { nanos } else { nanos.saturating_add(1) };
                duration_from_nanos(nanos)
            }
            // nothing ever refills
            None => Duration::MAX,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // state is plain data updated in one step, so a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("config", &self.config)
            .field("state", &*self.lock())
            .finish()
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    // always < 1e9
    let sub = (nanos % NANOS_PER_SEC) as u32;
    Duration::new(secs, sub)
}
