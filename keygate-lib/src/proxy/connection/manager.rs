use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::SecurityConfig;
use crate::telemetry::Metrics;

use super::guards::ConnectionGuard;

/// Errors that can occur when trying to accept a connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Server is shutting down")]
    Shutdown,
    #[error("Connection limit exceeded (current: {current}, limit: {limit})")]
    LimitExceeded { current: usize, limit: usize },
}

/// Manages connection limits and lifecycle
pub struct ConnectionManager {
    active_connections: Arc<AtomicUsize>,
    max_connections: usize,
    shutting_down: AtomicBool,
    connections_closed_tx: watch::Sender<()>,
    metrics: Option<Arc<Metrics>>,
}

impl ConnectionManager {
    pub fn new(security: &SecurityConfig, metrics: Option<Arc<Metrics>>) -> Self {
        let (connections_closed_tx, _) = watch::channel(());
        Self {
            active_connections: Arc::new(AtomicUsize::new(0)),
            max_connections: security.max_connections,
            shutting_down: AtomicBool::new(false),
            connections_closed_tx,
            metrics,
        }
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Stop accepting; connections already running are left alone
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    /// Try to accept a new connection
    /// Returns Ok(guard) if connection is accepted, Err(ConnectionError) if rejected
    pub fn try_accept(&self, peer: SocketAddr) -> Result<ConnectionGuard, ConnectionError> {
        if self.is_shutdown() {
            return Err(ConnectionError::Shutdown);
        }

        // Check connection limit (DoS protection)
        let current_connections = self.active_connections.load(Ordering::Relaxed);
        if current_connections >= self.max_connections {
            if let Some(ref m) = self.metrics {
                m.connections_rejected_total.add(1, &[]);
            }
            warn!(
                current = current_connections,
                limit = self.max_connections,
                peer = %peer,
                "Connection limit exceeded, rejecting connection"
            );
            return Err(ConnectionError::LimitExceeded {
                current: current_connections,
                limit: self.max_connections,
            });
        }

        self.active_connections.fetch_add(1, Ordering::Relaxed);

        if let Some(ref m) = self.metrics {
            m.connections_total.add(1, &[]);
            m.connections_active.add(1, &[]);
        }

        Ok(ConnectionGuard::new(
            self.active_connections.clone(),
            self.connections_closed_tx.clone(),
            self.metrics.clone(),
        ))
    }

    /// Wait until every accepted connection has finished or `timeout` elapses
    ///
    /// Returns the number of connections still open.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let mut closed = self.connections_closed_tx.subscribe();
        let wait_all = async {
            while self.active() > 0 {
                if closed.changed().await.is_err() {
                    break;
                }
            }
        };

        if self.active() > 0 {
            info!(
                active_connections = self.active(),
                "Waiting for active connections to finish (timeout: {}s)",
                timeout.as_secs()
            );
        }

        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            let active = self.active();
            warn!(
                active_connections = active,
                "Shutdown timeout reached, {} connections still active", active
            );
            return active;
        }
        info!("All connections closed");
        0
    }
}
