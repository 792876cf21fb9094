use std::sync::Arc;

use crate::admission::AdmissionFilter;
use crate::proxy::forwarding::Forwarder;
use crate::telemetry::Metrics;

/// Everything a connection needs to serve requests, shared across connections
pub struct RequestContext {
    pub filter: AdmissionFilter,
    pub forwarder: Forwarder,
    pub metrics: Option<Arc<Metrics>>,
}

impl RequestContext {
    pub fn new(
        filter: AdmissionFilter,
        forwarder: Forwarder,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self { filter, forwarder, metrics }
    }
}
