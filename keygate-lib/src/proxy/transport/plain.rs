use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::proxy::context::RequestContext;
use crate::proxy::handler::handle_request;

/// Serve HTTP/1.1 or HTTP/2 on a plain TCP connection
///
/// Runs until the client closes the connection. Once `shutdown` flips to
/// `true` the in-flight request is finished and keep-alive is refused.
pub async fn handle_plain_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<RequestContext>,
    builder: ConnBuilder<TokioExecutor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        async move { Ok::<_, hyper::Error>(handle_request(req, peer, &ctx).await) }
    });

    let conn = builder.serve_connection(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
            debug!(?peer, "closing connection for shutdown");
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        warn!(?peer, error = %e, "serve_connection error");
    }
}
