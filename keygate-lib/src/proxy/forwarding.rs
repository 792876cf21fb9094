use http::uri::{Authority, PathAndQuery, Scheme};
use http::{Method, Request, Response, Uri, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::admission::RespBody;
use crate::config::{BackendConfig, TimeoutConfig};
use crate::error::Result;
use crate::proxy::handler::headers::add_forwarded_for;
use crate::proxy::http_result::{HttpError, HttpResult};
use crate::telemetry::Metrics;

pub type HttpClient = Client<HttpConnector, Incoming>;

/// Build the pooled HTTP/1.1 client used for every upstream request
pub fn create_client(backend: &BackendConfig, timeout: &TimeoutConfig) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(Duration::from_millis(timeout.connect_ms)));
    // TCP keep-alive: sends periodic packets to keep TCP connection alive
    if timeout.keep_alive.enabled {
        connector.set_keepalive(Some(Duration::from_secs(timeout.keep_alive.timeout_secs)));
    } else {
        connector.set_keepalive(None);
    }

    let mut builder = Client::builder(TokioExecutor::new());
    builder.pool_idle_timeout(Duration::from_secs(backend.pool_idle_timeout));
    if backend.pool_max_idle_per_host > 0 {
        builder.pool_max_idle_per_host(backend.pool_max_idle_per_host);
    }

    builder.build(connector)
}

/// Rewrite `uri` so it targets `authority` over plain HTTP, keeping path and query
pub(crate) fn upstream_uri(authority: &Authority, method: &Method, uri: &Uri) -> HttpResult<Uri> {
    let path_and_query = match uri.path_and_query() {
        Some(pq) => pq.clone(),
        None if method == Method::CONNECT => {
            return Err(HttpError::InvalidUri("CONNECT requests are not forwarded".to_string()));
        }
        None => PathAndQuery::from_static("/"),
    };

    Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| HttpError::FailedToGenerateUpstreamRequest(e.to_string()))
}

/// Forwards admitted requests to the single configured backend
#[derive(Clone)]
pub struct Forwarder {
    client: HttpClient,
    authority: Authority,
    backend: Arc<str>,
    metrics: Option<Arc<Metrics>>,
}

impl Forwarder {
    pub fn new(
        backend: &BackendConfig,
        timeout: &TimeoutConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let authority = backend.address.parse::<Authority>()?;
        Ok(Self {
            client: create_client(backend, timeout),
            authority,
            backend: Arc::from(backend.address.as_str()),
            metrics,
        })
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Send `req` upstream and stream the backend response back
    ///
    /// Method, headers and body pass through untouched; `peer` is appended to
    /// `X-Forwarded-For`. The upstream hop is always HTTP/1.1.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        peer: SocketAddr,
    ) -> HttpResult<Response<RespBody>> {
        let start = Instant::now();
        let protocol = format!("{:?}", req.version());

        let (mut parts, body) = req.into_parts();
        parts.uri = upstream_uri(&self.authority, &parts.method, &parts.uri)?;
        parts.version = Version::HTTP_11;
        add_forwarded_for(&mut parts.headers, peer);

        debug!(backend = %self.backend, uri = %parts.uri, "forwarding request");
        let result = self.client.request(Request::from_parts(parts, body)).await;
        let duration = start.elapsed().as_secs_f64();

        match result {
            Ok(resp) => {
                if let Some(ref m) = self.metrics {
                    m.record_backend_request(
                        &self.backend,
                        resp.status().as_u16(),
                        &protocol,
                        duration,
                    );
                }
                Ok(resp.map(|b| b.boxed()))
            }
            Err(e) => {
                let err = HttpError::FailedToGetResponseFromBackend(e.to_string());
                if let Some(ref m) = self.metrics {
                    m.record_backend_error(&self.backend, err.error_type());
                }
                Err(err)
            }
        }
    }
}
