use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Result;
use crate::telemetry::{
    handle_metrics, health_check_response, live_check_response, ready_check_response,
};

type RespBody = BoxBody<Bytes, hyper::Error>;

fn plain_response(status: StatusCode, text: &'static str) -> Response<RespBody> {
    let body = Full::new(Bytes::from_static(text.as_bytes()))
        .map_err(|never| match never {})
        .boxed();
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

fn route(path: &str, registry: &prometheus::Registry, backend: &str) -> Response<RespBody> {
    let result = match path {
        "/health" => health_check_response(),
        "/ready" => ready_check_response(backend),
        "/live" => live_check_response(),
        "/metrics" => handle_metrics(registry),
        _ => return plain_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    result.unwrap_or_else(|e| {
        warn!(error = %e, path, "Observability server: failed to build response");
        plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    })
}

/// Start the observability server that handles metrics and health checks
/// This server runs on a dedicated port and serves:
/// - `/metrics` - Prometheus metrics
/// - `/health` - Health check endpoint
/// - `/ready` - Readiness check endpoint
/// - `/live` - Liveness check endpoint
///
/// Runs until `shutdown` flips to `true` or its sender is dropped.
pub async fn start_observability_server(
    addr: SocketAddr,
    registry: Registry,
    backend: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let registry = Arc::new(registry);
    let backend: Arc<str> = Arc::from(backend);
    let listener = TcpListener::bind(addr).await?;

    info!(?addr, "Observability server started (metrics + health checks)");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Observability server: shutting down");
                    break;
                }
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "Observability server: accept error");
                        continue;
                    }
                };

                let registry = registry.clone();
                let backend = backend.clone();
                tokio::spawn(async move {
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let resp = route(req.uri().path(), &registry, &backend);
                        async move { Ok::<_, hyper::Error>(resp) }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "Observability server: serve_connection error");
                    }
                });
            }
        }
    }

    info!("Observability server stopped");
    Ok(())
}
