use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::telemetry::Metrics;

/// Guard to decrement active connections counter when dropped
/// Also notifies when the last connection closes (for graceful shutdown)
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
    metrics: Option<Arc<Metrics>>,
}

impl ConnectionGuard {
    pub fn new(
        counter: Arc<AtomicUsize>,
        notifier: watch::Sender<()>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self { counter, notifier, metrics }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.counter.fetch_sub(1, Ordering::Relaxed);
        if let Some(ref m) = self.metrics {
            m.connections_active.add(-1, &[]);
        }
        // Notify when the last connection closes
        if remaining == 1 {
            let _ = self.notifier.send(());
        }
    }
}
