use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

use crate::error::{GateError, Result};

pub mod labels {
    pub const ERROR_TYPE: &str = "error_type";
    pub const IDENTITY_SOURCE: &str = "identity_source";
    pub const PROTOCOL: &str = "protocol";
    pub const STATUS_CODE: &str = "status_code";
    pub const METHOD: &str = "method";
    pub const BACKEND_ADDRESS: &str = "backend_address";
    pub const VERSION: &str = "version";
    pub const RUST_VERSION: &str = "rust_version";
}

pub mod values {
    pub const ERROR_RATE_LIMITED: &str = "rate_limited";
}

#[derive(Clone)]
pub struct Metrics {
    pub connections_total: Counter<u64>,
    pub connections_active: UpDownCounter<i64>,
    pub connections_rejected_total: Counter<u64>,

    pub requests_total: Counter<u64>,
    pub requests_duration_seconds: Histogram<f64>,

    // Admission metrics
    pub rate_limit_requests_total: Counter<u64>,
    pub rate_limit_allowed_total: Counter<u64>,
    pub rate_limit_rejected_total: Counter<u64>,
    pub identities_tracked: Gauge<u64>,
    pub identities_reaped_total: Counter<u64>,

    pub backend_requests_total: Counter<u64>,
    pub backend_errors_total: Counter<u64>,
    pub backend_duration_seconds: Histogram<f64>,

    pub errors_total: Counter<u64>,

    // Build info
    pub build_info: Gauge<u64>,
}

impl Metrics {
    pub fn new(meter: Meter) -> Self {
        Self {
            connections_total: meter
                .u64_counter("keygate_connections_total")
                .with_description("Total number of connections established")
                .build(),
            connections_active: meter
                .i64_up_down_counter("keygate_connections_active")
                .with_description("Number of active connections")
                .build(),
            connections_rejected_total: meter
                .u64_counter("keygate_connections_rejected_total")
                .with_description("Total number of connections rejected due to connection limit")
                .build(),

            requests_total: meter
                .u64_counter("keygate_requests_total")
                .with_description("Total number of requests processed")
                .build(),
            requests_duration_seconds: meter
                .f64_histogram("keygate_requests_duration_seconds")
                .with_description("Request duration in seconds")
                .build(),

            rate_limit_requests_total: meter
                .u64_counter("keygate_rate_limit_requests_total")
                .with_description("Total number of requests evaluated by the admission filter")
                .build(),
            rate_limit_allowed_total: meter
                .u64_counter("keygate_rate_limit_allowed_total")
                .with_description("Total number of requests admitted")
                .build(),
            rate_limit_rejected_total: meter
                .u64_counter("keygate_rate_limit_rejected_total")
                .with_description("Total number of requests rejected (429)")
                .build(),
            identities_tracked: meter
                .u64_gauge("keygate_identities_tracked")
                .with_description("Number of identities with a token bucket")
                .build(),
            identities_reaped_total: meter
                .u64_counter("keygate_identities_reaped_total")
                .with_description("Total number of full, unused buckets dropped by the reaper")
                .build(),

            backend_requests_total: meter
                .u64_counter("keygate_backend_requests_total")
                .with_description("Total number of requests forwarded to the backend")
                .build(),
            backend_errors_total: meter
                .u64_counter("keygate_backend_errors_total")
                .with_description("Total number of backend errors")
                .build(),
            backend_duration_seconds: meter
                .f64_histogram("keygate_backend_duration_seconds")
                .with_description("Backend request duration in seconds")
                .build(),

            errors_total: meter
                .u64_counter("keygate_errors_total")
                .with_description("Total number of errors")
                .build(),

            build_info: meter
                .u64_gauge("keygate_build_info")
                .with_description("Build information (version, rust version)")
                .build(),
        }
    }

    /// Set build info metric with version labels
    pub fn set_build_info(&self) {
        let version = env!("CARGO_PKG_VERSION");
        let rust_version = env!("CARGO_PKG_RUST_VERSION");

        self.build_info.record(
            1,
            &[
                KeyValue::new(labels::VERSION, version),
                KeyValue::new(labels::RUST_VERSION, rust_version),
            ],
        );
    }

    pub fn record_rate_limit_request(&self, identity_source: &str) {
        self.rate_limit_requests_total
            .add(1, &[KeyValue::new(labels::IDENTITY_SOURCE, identity_source.to_string())]);
    }

    pub fn record_rate_limit_allowed(&self, identity_source: &str) {
        self.rate_limit_allowed_total
            .add(1, &[KeyValue::new(labels::IDENTITY_SOURCE, identity_source.to_string())]);
    }

    pub fn record_rate_limit_rejection(&self, identity_source: &str) {
        self.errors_total
            .add(1, &[KeyValue::new(labels::ERROR_TYPE, values::ERROR_RATE_LIMITED)]);
        self.rate_limit_rejected_total
            .add(1, &[KeyValue::new(labels::IDENTITY_SOURCE, identity_source.to_string())]);
    }

    pub fn record_identities_tracked(&self, count: u64) {
        self.identities_tracked.record(count, &[]);
    }

    pub fn record_identities_reaped(&self, count: u64) {
        if count > 0 {
            self.identities_reaped_total.add(count, &[]);
        }
    }

    pub fn record_backend_request(
        &self,
        backend: &str,
        status_code: u16,
        protocol: &str,
        duration: f64,
    ) {
        let attrs = [
            KeyValue::new(labels::BACKEND_ADDRESS, backend.to_string()),
            KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
            KeyValue::new(labels::PROTOCOL, protocol.to_string()),
        ];
        self.backend_requests_total.add(1, &attrs);
        self.backend_duration_seconds.record(duration, &attrs);
    }

    pub fn record_backend_error(&self, backend: &str, error_type: &str) {
        self.backend_errors_total.add(
            1,
            &[
                KeyValue::new(labels::BACKEND_ADDRESS, backend.to_string()),
                KeyValue::new(labels::ERROR_TYPE, error_type.to_string()),
            ],
        );
    }

    pub fn record_request(&self, method: &str, status_code: u16, protocol: &str, duration: f64) {
        let attrs = [
            KeyValue::new(labels::METHOD, method.to_string()),
            KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
            KeyValue::new(labels::PROTOCOL, protocol.to_string()),
        ];
        self.requests_total.add(1, &attrs);
        self.requests_duration_seconds.record(duration, &attrs);
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new(labels::ERROR_TYPE, error_type.to_string())]);
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry)> {
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|e| GateError::Telemetry(format!("Failed to build Prometheus exporter: {e}")))?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("keygate");
    let metrics = Arc::new(Metrics::new(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}
