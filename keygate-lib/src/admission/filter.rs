use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::admission::bucket::BucketConfig;
use crate::admission::clock::Clock;
use crate::admission::registry::BucketRegistry;
use crate::config::RateLimitConfig;
use crate::error::{GateError, Result};
use crate::telemetry::Metrics;

pub type RespBody = BoxBody<Bytes, hyper::Error>;

/// Header names of the admission contract.
pub mod names {
    /// Caller identity, on the request; identity charged, on admitted responses
    pub const API_KEY: &str = "x-api-key";
    /// Whole tokens left after an admitted request
    pub const RATE_LIMIT_REMAINING: &str = "x-rate-limit-remaining";
    /// Whole seconds until a rejected caller can expect a token
    pub const RATE_LIMIT_RETRY_AFTER_SECONDS: &str = "x-rate-limit-retry-after-seconds";
}

pub const TOO_MANY_REQUESTS_BODY: &str = "Too many requests";

/// Where an identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Supplied by the caller in the identity header
    Header,
    /// Generated because the caller supplied none
    Generated,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::Header => "header",
            IdentitySource::Generated => "generated",
        }
    }
}

/// The key a request is charged against. Never empty.
///
/// Any string is accepted: identities are not authenticated, and a caller can
/// sidestep its quota by sending a different key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    key: String,
    source: IdentitySource,
}

impl Identity {
    fn from_header(key: &str) -> Self {
        Self { key: key.to_string(), source: IdentitySource::Header }
    }

    /// A fresh random identity, valid for one request.
    fn generate() -> Self {
        Self { key: uuid::Uuid::new_v4().to_string(), source: IdentitySource::Generated }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }

    pub fn is_generated(&self) -> bool {
        self.source == IdentitySource::Generated
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted { identity: Identity, remaining: u64 },
    Rejected { identity: Identity, retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    pub fn identity(&self) -> &Identity {
        match self {
            Admission::Admitted { identity, .. } => identity,
            Admission::Rejected { identity, .. } => identity,
        }
    }

    /// Retry hint in whole seconds, rounded down; `None` when admitted.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Admission::Admitted { .. } => None,
            Admission::Rejected { retry_after, .. } => Some(retry_after.as_secs()),
        }
    }
}

/// Per-identity admission control in front of a request handler.
///
/// Every request costs one token from the bucket of its identity. Admitted
/// requests run the downstream handler and get `X-Rate-Limit-Remaining` and
/// `X-api-key` on the response. Rejected requests never reach downstream and
/// are answered with `429 Too Many Requests`,
/// `X-Rate-Limit-Retry-After-Seconds` and a plain-text body.
///
/// # Example
/// ```
/// use keygate_lib::{AdmissionFilter, BucketConfig, BucketRegistry};
/// use http::HeaderMap;
/// use std::sync::Arc;
///
/// let registry = Arc::new(BucketRegistry::new(BucketConfig::per_second(1, 1)));
/// let filter = AdmissionFilter::new(registry);
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-api-key", "abc".parse().unwrap());
///
/// assert!(filter.check(&headers).is_admitted());
/// assert!(!filter.check(&headers).is_admitted());
/// ```
pub struct AdmissionFilter {
    registry: Arc<BucketRegistry>,
    header: HeaderName,
    metrics: Option<Arc<Metrics>>,
}

impl AdmissionFilter {
    /// Filter reading the identity from `X-api-key`.
    pub fn new(registry: Arc<BucketRegistry>) -> Self {
        Self { registry, header: HeaderName::from_static(names::API_KEY), metrics: None }
    }

    /// Filter with a fresh registry shaped by `[rate_limit]`.
    pub fn from_config(cfg: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let header = HeaderName::from_bytes(cfg.api_key_header.as_bytes()).map_err(|e| {
            GateError::Config(format!("Invalid api_key_header {:?}: {e}", cfg.api_key_header))
        })?;
        let registry = Arc::new(BucketRegistry::with_clock(BucketConfig::from(cfg), clock));
        Ok(Self::new(registry).with_header(header))
    }

    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<BucketRegistry> {
        &self.registry
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Identity for a request: the header value, or a generated one when the
    /// header is missing, empty or not representable as text.
    pub fn identity(&self, headers: &HeaderMap) -> Identity {
        match headers.get(&self.header) {
            Some(value) if !value.is_empty() => match value.to_str() {
                Ok(key) => Identity::from_header(key),
                Err(_) => {
                    debug!(header = %self.header, "identity header is not visible ASCII");
                    Identity::generate()
                }
            },
            _ => Identity::generate(),
        }
    }

    /// Charge one token to the identity of a request with these headers.
    pub fn check(&self, headers: &HeaderMap) -> Admission {
        let identity = self.identity(headers);
        let source = identity.source().as_str();

        if let Some(ref m) = self.metrics {
            m.record_rate_limit_request(source);
        }

        let result = self.registry.resolve(identity.as_str()).try_consume(1);

        if result.is_consumed() {
            let remaining = result.remaining();
            debug!(identity = %identity, source, remaining, "request admitted");
            if let Some(ref m) = self.metrics {
                m.record_rate_limit_allowed(source);
            }
            Admission::Admitted { identity, remaining }
        } else {
            let retry_after = result.wait();
            debug!(
                identity = %identity,
                source,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "request rejected"
            );
            if let Some(ref m) = self.metrics {
                m.record_rate_limit_rejection(source);
            }
            Admission::Rejected { identity, retry_after }
        }
    }

    /// Run `next` if the request is admitted, otherwise answer 429.
    ///
    /// A downstream error is returned as is; only successful downstream
    /// responses get the quota headers.
    pub async fn handle<B, E, F, Fut>(
        &self,
        req: Request<B>,
        next: F,
    ) -> std::result::Result<Response<RespBody>, E>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = std::result::Result<Response<RespBody>, E>>,
    {
        match self.check(req.headers()) {
            Admission::Admitted { identity, remaining } => {
                let mut resp = next(req).await?;
                add_quota_headers(resp.headers_mut(), &identity, remaining);
                Ok(resp)
            }
            Admission::Rejected { retry_after, .. } => Ok(too_many_requests(retry_after)),
        }
    }
}

impl fmt::Debug for AdmissionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionFilter")
            .field("registry", &self.registry)
            .field("header", &self.header)
            .finish()
    }
}

/// Headers added to an admitted response.
pub fn add_quota_headers(headers: &mut HeaderMap, identity: &Identity, remaining: u64) {
    headers.insert(
        HeaderName::from_static(names::RATE_LIMIT_REMAINING),
        HeaderValue::from(remaining),
    );
    match HeaderValue::from_str(identity.as_str()) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(names::API_KEY), value);
        }
        Err(e) => warn!(error = %e, "identity cannot be echoed as a header value"),
    }
}

/// The rejection response.
pub fn too_many_requests(retry_after: Duration) -> Response<RespBody> {
    let body = Full::new(Bytes::from_static(TOO_MANY_REQUESTS_BODY.as_bytes()))
        .map_err(|never| match never {})
        .boxed();
    let mut resp = Response::new(body);
    *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    resp.headers_mut().insert(
        HeaderName::from_static(names::RATE_LIMIT_RETRY_AFTER_SECONDS),
        HeaderValue::from(retry_after.as_secs()),
    );
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::clock::ManualClock;

    fn filter() -> AdmissionFilter {
        let clock = Arc::new(ManualClock::new());
        AdmissionFilter::new(Arc::new(BucketRegistry::with_clock(
            BucketConfig::per_second(2, 1),
            clock,
        )))
    }

    fn headers(pairs: &[(&'static str, &[u8])]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            if let (Ok(n), Ok(v)) =
                (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_bytes(value))
            {
                map.append(n, v);
            }
        }
        map
    }

    #[test]
    fn zero_refill_rejection_saturates_retry_after() {
        let registry = BucketRegistry::with_clock(
            BucketConfig::new(1, 0, Duration::from_secs(1)),
            Arc::new(ManualClock::new()),
        );
        let filter = AdmissionFilter::new(Arc::new(registry));
        let h = headers(&[("x-api-key", b"abc")]);

        assert!(filter.check(&h).is_admitted());
        let rejected = filter.check(&h);
        assert!(!rejected.is_admitted());
        assert_eq!(rejected.retry_after_secs(), Some(u64::MAX));
    }

    #[test]
    fn identity_comes_from_header() {
        let id = filter().identity(&headers(&[("x-api-key", b"abc")]));
        assert_eq!(id.as_str(), "abc");
        assert_eq!(id.source(), IdentitySource::Header);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let id = filter().identity(&headers(&[("X-API-KEY", b"abc")]));
        assert_eq!(id.as_str(), "abc");
    }

    #[test]
    fn missing_or_empty_header_generates_identity() {
        let f = filter();
        let missing = f.identity(&HeaderMap::new());
        let empty = f.identity(&headers(&[("x-api-key", b"")]));

        for id in [&missing, &empty] {
            assert!(id.is_generated());
            assert!(!id.as_str().is_empty());
        }
        assert_ne!(missing, empty);
    }

    #[test]
    fn opaque_header_bytes_generate_identity() {
        let id = filter().identity(&headers(&[("x-api-key", b"caf\xe9")]));
        assert!(id.is_generated());
    }

    #[test]
    fn custom_header_name() {
        let f = filter().with_header(HeaderName::from_static("authorization"));
        let id = f.identity(&headers(&[("authorization", b"token-1"), ("x-api-key", b"abc")]));
        assert_eq!(id.as_str(), "token-1");
    }

    #[test]
    fn rejection_response_shape() {
        let resp = too_many_requests(Duration::from_millis(2_999));
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers().get(names::RATE_LIMIT_RETRY_AFTER_SECONDS),
            Some(&HeaderValue::from_static("2"))
        );
        assert_eq!(resp.headers().get(CONTENT_TYPE), Some(&HeaderValue::from_static("text/plain")));
    }

    #[test]
    fn from_config_rejects_bad_header_name() {
        let cfg = RateLimitConfig { api_key_header: "bad header".into(), ..Default::default() };
        assert!(AdmissionFilter::from_config(&cfg, Arc::new(ManualClock::new())).is_err());
    }
}
