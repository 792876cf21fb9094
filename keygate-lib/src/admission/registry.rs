use ahash::AHashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::admission::bucket::{BucketConfig, TokenBucket};
use crate::admission::clock::{Clock, SystemClock};

type BucketMap = AHashMap<String, Arc<TokenBucket>>;

/// Identity → token bucket map.
///
/// Buckets are created lazily, full, the first time an identity is seen, and
/// every later lookup for that identity returns the same bucket. Lookups of
/// known identities only take the shared lock; the exclusive lock is taken to
/// insert, and the map is re-checked under it so two callers racing on a new
/// identity end up with one bucket.
pub struct BucketRegistry {
    config: BucketConfig,
    clock: Arc<dyn Clock>,
    buckets: RwLock<BucketMap>,
}

impl BucketRegistry {
    pub fn new(config: BucketConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BucketConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, buckets: RwLock::new(AHashMap::new()) }
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Bucket for `identity`, created on first use.
    ///
    /// # Example
    /// ```
    /// use keygate_lib::{BucketConfig, BucketRegistry};
    /// use std::sync::Arc;
    ///
    /// let registry = BucketRegistry::new(BucketConfig::per_second(10, 1));
    /// let a = registry.resolve("abc");
    /// let b = registry.resolve("abc");
    /// assert!(Arc::ptr_eq(&a, &b));
    /// ```
    pub fn resolve(&self, identity: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.read().get(identity) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.write();
        let bucket = buckets.entry(identity.to_string()).or_insert_with(|| {
            Arc::new(TokenBucket::new(self.config, Arc::clone(&self.clock)))
        });
        Arc::clone(bucket)
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.read().contains_key(identity)
    }

    /// Drop every bucket that has refilled to capacity and is not in use.
    ///
    /// A full bucket is exactly what `resolve` would create, so dropping one
    /// never changes a later decision. Candidates are collected under the
    /// shared lock; each is then re-checked under the exclusive lock, where no
    /// new holder can appear, and skipped if an in-flight consume holds it.
    ///
    /// Returns the number of entries removed.
    pub fn purge_idle(&self) -> usize {
        let candidates: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, bucket)| Arc::strong_count(bucket) == 1 && bucket.is_full())
            .map(|(identity, _)| identity.clone())
            .collect();
        if candidates.is_empty() {
            return 0;
        }

        let mut buckets = self.write();
        let mut removed = 0;
        for identity in candidates {
            let idle = buckets
                .get(&identity)
                .is_some_and(|bucket| Arc::strong_count(bucket) == 1 && bucket.is_full());
            if idle {
                buckets.remove(&identity);
                removed += 1;
            }
        }
        removed
    }

    fn read(&self) -> RwLockReadGuard<'_, BucketMap> {
        self.buckets.read().unwrap_or_else(|poisoned| {
            warn!("Bucket registry lock poisoned");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, BucketMap> {
        self.buckets.write().unwrap_or_else(|poisoned| {
            warn!("Bucket registry lock poisoned");
            PoisonError::into_inner(poisoned)
        })
    }
}

impl std::fmt::Debug for BucketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketRegistry")
            .field("config", &self.config)
            .field("identities", &self.len())
            .finish()
    }
}
