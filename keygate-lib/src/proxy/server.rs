use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioExecutor;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::admission::{spawn_reaper, AdmissionFilter, BucketRegistry, Clock, SystemClock};
use crate::config::Config;
use crate::error::{GateError, Result};
use crate::proxy::connection::ConnectionManager;
use crate::proxy::context::RequestContext;
use crate::proxy::forwarding::Forwarder;
use crate::proxy::transport::handle_plain_connection;
use crate::telemetry::{init_metrics, start_observability_server, Metrics};

/// Rate-limiting gateway in front of one backend
///
/// Owns the bucket registry for the life of the process. Every accepted
/// connection shares the same filter, so quotas are per identity across
/// connections and protocols.
pub struct Gateway {
    config: Arc<Config>,
    ctx: Arc<RequestContext>,
    metrics: Option<Arc<Metrics>>,
}

impl Gateway {
    pub fn new(
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let mut filter = AdmissionFilter::from_config(&config.rate_limit, clock)?;
        if let Some(ref m) = metrics {
            filter = filter.with_metrics(m.clone());
        }
        let forwarder = Forwarder::new(&config.backend, &config.timeout, metrics.clone())?;
        let ctx = Arc::new(RequestContext::new(filter, forwarder, metrics.clone()));
        Ok(Self { config, ctx, metrics })
    }

    pub fn filter(&self) -> &AdmissionFilter {
        &self.ctx.filter
    }

    pub fn registry(&self) -> &Arc<BucketRegistry> {
        self.ctx.filter.registry()
    }

    /// Accept connections on `listener` until `shutdown` flips to `true` or
    /// its sender is dropped, then drain open connections.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        let connections = ConnectionManager::new(&self.config.security, self.metrics.clone());
        let builder = ConnBuilder::new(TokioExecutor::new());

        let reaper = match self.config.registry.reap_interval_secs {
            0 => None,
            secs => Some(spawn_reaper(
                self.registry().clone(),
                Duration::from_secs(secs),
                self.metrics.clone(),
                shutdown.clone(),
            )),
        };

        info!(
            ?addr,
            backend = %self.config.backend.address,
            capacity = self.config.rate_limit.capacity,
            "starting keygate (h1/h2)"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, no longer accepting connections");
                        break;
                    }
                }
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok((stream, peer)) => (stream, peer),
                        Err(e) => {
                            warn!(error = %e, "accept error");
                            continue;
                        }
                    };

                    let guard = match connections.try_accept(peer) {
                        Ok(guard) => guard,
                        Err(e) => {
                            debug!(?peer, error = %e, "connection refused");
                            continue;
                        }
                    };

                    let ctx = self.ctx.clone();
                    let builder = builder.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        // Ensure counter is decremented when connection finishes
                        let _guard = guard;
                        handle_plain_connection(stream, peer, ctx, builder, shutdown).await;
                    });
                }
            }
        }

        connections.begin_shutdown();
        drop(listener);
        connections
            .drain(Duration::from_secs(self.config.timeout.shutdown_secs))
            .await;

        if let Some(handle) = reaper {
            if let Err(e) = handle.await {
                warn!(error = %e, "bucket reaper task failed");
            }
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Flip `shutdown` to `true` on the first SIGTERM or SIGINT
fn spawn_signal_handler(shutdown: watch::Sender<bool>) -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
        GateError::Io(std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}")))
    })?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
        GateError::Io(std::io::Error::other(format!("Failed to setup SIGINT handler: {e}")))
    })?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
        let _ = shutdown.send(true);
    });
    Ok(())
}

/// Run the gateway described by `config` until SIGTERM or SIGINT
pub async fn run(config: Arc<Config>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = match config.telemetry.metrics_port {
        Some(port) => {
            let (metrics, registry) = init_metrics()?;
            let addr = SocketAddr::new(config.listen.ip(), port);
            let backend = config.backend.address.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = start_observability_server(addr, registry, backend, rx).await {
                    error!(error = %e, "Observability server failed");
                }
            });
            Some(metrics)
        }
        None => None,
    };

    let gateway = Gateway::new(config.clone(), Arc::new(SystemClock), metrics)?;
    let listener = TcpListener::bind(config.listen).await?;

    spawn_signal_handler(shutdown_tx)?;

    gateway.serve(listener, shutdown_rx).await
}
