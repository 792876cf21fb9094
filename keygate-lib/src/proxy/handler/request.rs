use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::admission::RespBody;
use crate::proxy::context::RequestContext;
use crate::proxy::http_result::HttpError;
use crate::proxy::synthetic_response::{internal_error_response, synthetic_error_response};
use http::StatusCode;

/// Admit or reject one request, forwarding it upstream when admitted
///
/// Forwarding faults become a synthetic 4xx/5xx; a 429 from the admission
/// filter is returned as is.
pub async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    ctx: &RequestContext,
) -> Response<RespBody> {
    let start = Instant::now();
    let method = req.method().to_string();
    let protocol = format!("{:?}", req.version());

    let result = ctx
        .filter
        .handle(req, |req| ctx.forwarder.forward(req, peer))
        .await;

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => error_response(e, ctx),
    };

    debug!(?peer, %method, status = resp.status().as_u16(), "request complete");
    if let Some(ref m) = ctx.metrics {
        m.record_request(
            &method,
            resp.status().as_u16(),
            &protocol,
            start.elapsed().as_secs_f64(),
        );
    }
    resp
}

fn error_response(e: HttpError, ctx: &RequestContext) -> Response<RespBody> {
    error!(backend = ctx.forwarder.backend(), "{e}");
    if let Some(ref m) = ctx.metrics {
        m.record_error(e.error_type());
    }
    let code = StatusCode::from(e);
    match synthetic_error_response(code) {
        Ok(resp) => resp,
        Err(e) => internal_error_response(format!("Failed to create error response: {e}")),
    }
}
