use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::admission::registry::BucketRegistry;
use crate::telemetry::Metrics;

/// Periodically purge full, unused buckets from `registry`.
///
/// Anonymous callers get a new identity per request, so without this the
/// registry grows by one entry per anonymous request. The task stops when
/// `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_reaper(
    registry: Arc<BucketRegistry>,
    every: Duration,
    metrics: Option<Arc<Metrics>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        info!(interval_secs = every.as_secs(), "bucket reaper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = registry.purge_idle();
                    let tracked = registry.len();
                    debug!(removed, tracked, "reaped idle buckets");
                    if let Some(ref m) = metrics {
                        m.record_identities_reaped(removed as u64);
                        m.record_identities_tracked(tracked as u64);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("bucket reaper stopped");
    })
}
