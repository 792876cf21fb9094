//! End-to-end tests: reqwest client -> gateway -> embedded hyper backend.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use keygate_lib::admission::names;
use keygate_lib::telemetry::{init_metrics, Metrics};
use keygate_lib::{Config, Gateway, ManualClock};
use serial_test::serial;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Backend that echoes what it received in the body and a few headers.
async fn start_backend() -> Result<SocketAddr, std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let svc = service_fn(|req: Request<Incoming>| async move {
                    let forwarded_for = req
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let body = format!("{} {}", req.method(), req.uri());
                    let resp = Response::builder()
                        .header("x-seen-forwarded-for", forwarded_for)
                        .body(Full::new(Bytes::from(body)))
                        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
                    Ok::<_, Infallible>(resp)
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });

    Ok(addr)
}

/// Backend that signals on `started` and then holds the response for `delay`.
async fn start_slow_backend(
    delay: Duration,
    started: mpsc::UnboundedSender<()>,
) -> Result<SocketAddr, std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let started = started.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |_req: Request<Incoming>| {
                    let started = started.clone();
                    async move {
                        let _ = started.send(());
                        tokio::time::sleep(delay).await;
                        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"slow"))))
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });

    Ok(addr)
}

/// Address nothing listens on.
async fn dead_backend() -> Result<SocketAddr, std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    listener.local_addr()
}

struct TestGateway {
    url: String,
    clock: Arc<ManualClock>,
    gateway: Arc<Gateway>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<keygate_lib::Result<()>>,
}

async fn start_gateway(
    backend: SocketAddr,
    metrics: Option<Arc<Metrics>>,
) -> Result<TestGateway, Box<dyn std::error::Error + Send + Sync>> {
    let mut config = Config::new("127.0.0.1:0".parse()?, backend.to_string());
    config.rate_limit.capacity = 2;
    config.rate_limit.refill_tokens = 1;
    config.rate_limit.refill_interval_ms = 1000;
    config.timeout.shutdown_secs = 5;
    config.timeout.connect_ms = 500;

    let clock = Arc::new(ManualClock::new());
    let gateway = Arc::new(Gateway::new(Arc::new(config), clock.clone(), metrics)?);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    let (shutdown, rx) = watch::channel(false);

    let handle = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.serve(listener, rx).await })
    };

    Ok(TestGateway { url, clock, gateway, shutdown, handle })
}

fn client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().no_proxy().build()
}

fn header(resp: &reqwest::Response, name: &str) -> Option<String> {
    resp.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

#[tokio::test]
async fn test_header_contract_over_http() -> TestResult {
    let backend = start_backend().await?;
    let gw = start_gateway(backend, None).await?;
    let client = client()?;
    let url = format!("{}/notes", gw.url);

    let r1 = client.get(&url).header("X-api-key", "abc").send().await?;
    assert_eq!(r1.status(), 200);
    assert_eq!(header(&r1, names::RATE_LIMIT_REMAINING).as_deref(), Some("1"));
    assert_eq!(header(&r1, names::API_KEY).as_deref(), Some("abc"));

    let r2 = client.get(&url).header("X-api-key", "abc").send().await?;
    assert_eq!(r2.status(), 200);
    assert_eq!(header(&r2, names::RATE_LIMIT_REMAINING).as_deref(), Some("0"));

    let r3 = client.get(&url).header("X-api-key", "abc").send().await?;
    assert_eq!(r3.status(), 429);
    assert_eq!(header(&r3, names::RATE_LIMIT_RETRY_AFTER_SECONDS).as_deref(), Some("1"));
    assert_eq!(header(&r3, "content-type").as_deref(), Some("text/plain"));
    assert_eq!(r3.text().await?, "Too many requests");

    gw.clock.advance(Duration::from_secs(1));
    let r4 = client.get(&url).header("X-api-key", "abc").send().await?;
    assert_eq!(r4.status(), 200);
    assert_eq!(header(&r4, names::RATE_LIMIT_REMAINING).as_deref(), Some("0"));

    let _ = gw.shutdown.send(true);
    Ok(())
}

#[tokio::test]
async fn test_admitted_request_is_forwarded() -> TestResult {
    let backend = start_backend().await?;
    let gw = start_gateway(backend, None).await?;

    let resp = client()?
        .post(format!("{}/notes/42?draft=true", gw.url))
        .header("X-api-key", "writer")
        .header("X-Forwarded-For", "203.0.113.9")
        .body("hello")
        .send()
        .await?;

    assert_eq!(resp.status(), 200);
    assert_eq!(
        header(&resp, "x-seen-forwarded-for").as_deref(),
        Some("203.0.113.9, 127.0.0.1")
    );
    assert_eq!(resp.text().await?, "POST /notes/42?draft=true");

    let _ = gw.shutdown.send(true);
    Ok(())
}

#[tokio::test]
async fn test_anonymous_requests_get_distinct_identities() -> TestResult {
    let backend = start_backend().await?;
    let gw = start_gateway(backend, None).await?;
    let client = client()?;

    let mut keys = Vec::new();
    for _ in 0..3 {
        let resp = client.get(format!("{}/", gw.url)).send().await?;
        assert_eq!(resp.status(), 200);
        assert_eq!(header(&resp, names::RATE_LIMIT_REMAINING).as_deref(), Some("1"));
        keys.push(header(&resp, names::API_KEY).ok_or("missing identity header")?);
    }
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 3);
    assert_eq!(gw.gateway.registry().len(), 3);

    let _ = gw.shutdown.send(true);
    Ok(())
}

#[tokio::test]
async fn test_rejected_request_never_reaches_backend() -> TestResult {
    // a dead backend turns every forwarded request into a 502, so a 429
    // proves the request stopped at the gate
    let backend = dead_backend().await?;
    let gw = start_gateway(backend, None).await?;
    let client = client()?;
    let url = format!("{}/", gw.url);

    for _ in 0..2 {
        let resp = client.get(&url).header("X-api-key", "k").send().await?;
        assert_eq!(resp.status(), 502);
        assert!(header(&resp, names::RATE_LIMIT_REMAINING).is_none());
    }
    let resp = client.get(&url).header("X-api-key", "k").send().await?;
    assert_eq!(resp.status(), 429);

    let _ = gw.shutdown.send(true);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_accepting() -> TestResult {
    let backend = start_backend().await?;
    let gw = start_gateway(backend, None).await?;
    let client = client()?;

    let resp = client.get(format!("{}/", gw.url)).send().await?;
    assert_eq!(resp.status(), 200);

    gw.shutdown.send(true)?;
    let served = tokio::time::timeout(Duration::from_secs(5), gw.handle).await??;
    assert!(served.is_ok());

    let after = reqwest::Client::builder()
        .no_proxy()
        .build()?
        .get(format!("{}/", gw.url))
        .send()
        .await;
    assert!(after.is_err());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_request() -> TestResult {
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let backend = start_slow_backend(Duration::from_millis(300), started_tx).await?;
    let gw = start_gateway(backend, None).await?;
    let client = client()?;

    let url = format!("{}/slow", gw.url);
    let in_flight = tokio::spawn(async move {
        let resp = client.get(&url).header("X-api-key", "late").send().await?;
        let status = resp.status();
        let remaining = header(&resp, names::RATE_LIMIT_REMAINING);
        let body = resp.text().await?;
        Ok::<_, reqwest::Error>((status, remaining, body))
    });

    // the request has passed the gate and is waiting on the backend
    tokio::time::timeout(Duration::from_secs(5), started_rx.recv())
        .await?
        .ok_or("backend never saw the request")?;
    gw.shutdown.send(true)?;

    let (status, remaining, body) =
        tokio::time::timeout(Duration::from_secs(5), in_flight).await???;
    assert_eq!(status, 200);
    assert_eq!(remaining.as_deref(), Some("1"));
    assert_eq!(body, "slow");

    let served = tokio::time::timeout(Duration::from_secs(5), gw.handle).await??;
    assert!(served.is_ok());
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_metrics_record_admission_outcomes() -> TestResult {
    let (metrics, registry) = init_metrics()?;
    let backend = start_backend().await?;
    let gw = start_gateway(backend, Some(metrics)).await?;
    let client = client()?;

    for _ in 0..3 {
        client.get(format!("{}/", gw.url)).header("X-api-key", "m").send().await?;
    }

    let text = String::from_utf8(
        keygate_lib::telemetry::handle_metrics(&registry)?
            .into_body()
            .collect()
            .await?
            .to_bytes()
            .to_vec(),
    )?;
    assert!(text.contains("keygate_rate_limit_allowed_total"), "{text}");
    assert!(text.contains("keygate_rate_limit_rejected_total"), "{text}");
    assert!(text.contains("keygate_backend_requests_total"), "{text}");

    let _ = gw.shutdown.send(true);
    Ok(())
}
