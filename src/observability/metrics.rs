//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - sqlgate_query_total: Counter of executed statements by source and outcome
//! - sqlgate_query_latency_seconds: Histogram of statement latency
//! - sqlgate_publish_total: Counter of payloads handed to the transport
//! - sqlgate_cycle_failures_total: Counter of failed publish cycles
//! - sqlgate_injection_rejected_total: Counter of requests refused by screening
//!
//! Every `record_*` function is a no-op until metrics are initialized.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;
use std::time::Duration;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Interval between OTLP metric exports.
const EXPORT_PERIOD: Duration = Duration::from_secs(10);

/// Gateway instruments.
#[derive(Debug)]
pub struct Metrics {
    pub query_total: Counter<u64>,
    pub query_latency: Histogram<f64>,
    pub publish_total: Counter<u64>,
    pub cycle_failures: Counter<u64>,
    pub injection_rejected: Counter<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            query_total: meter
                .u64_counter("sqlgate_query_total")
                .with_description("Statements executed, by source and outcome")
                .with_unit("1")
                .init(),
            query_latency: meter
                .f64_histogram("sqlgate_query_latency_seconds")
                .with_description("Time from dispatch to rows returned")
                .with_unit("s")
                .init(),
            publish_total: meter
                .u64_counter("sqlgate_publish_total")
                .with_description("Result payloads handed to the publish transport")
                .with_unit("1")
                .init(),
            cycle_failures: meter
                .u64_counter("sqlgate_cycle_failures_total")
                .with_description("Scheduled cycles that failed to execute or publish")
                .with_unit("1")
                .init(),
            injection_rejected: meter
                .u64_counter("sqlgate_injection_rejected_total")
                .with_description("Requests refused by injection screening")
                .with_unit("1")
                .init(),
        }
    }
}

fn manual_provider() -> SdkMeterProvider {
    let reader = ManualReader::builder().build();
    SdkMeterProvider::builder().with_reader(reader).build()
}

/// Initialize the metrics system.
///
/// Exports over OTLP/gRPC when `otel_endpoint` is set; otherwise values are
/// recorded in-process only. Subsequent calls are ignored.
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        let provider = match otel_endpoint {
            Some(endpoint) => {
                use opentelemetry_otlp::{Protocol, WithExportConfig};

                let exporter = opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint)
                    .with_protocol(Protocol::Grpc);

                match opentelemetry_otlp::new_pipeline()
                    .metrics(opentelemetry_sdk::runtime::Tokio)
                    .with_exporter(exporter)
                    .with_period(EXPORT_PERIOD)
                    .build()
                {
                    Ok(provider) => {
                        tracing::info!(endpoint, "OTLP metrics exporter configured");
                        provider
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to create OTLP exporter, metrics stay local");
                        manual_provider()
                    }
                }
            }
            None => manual_provider(),
        };
        global::set_meter_provider(provider);

        Metrics::new(&global::meter("sqlgate"))
    });
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record one executed statement.
pub fn record_query(source: &str, ok: bool, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let outcome = if ok { "ok" } else { "error" };
        m.query_total.add(
            1,
            &[
                KeyValue::new("source", source.to_string()),
                KeyValue::new("outcome", outcome),
            ],
        );
        m.query_latency
            .record(latency_seconds, &[KeyValue::new("source", source.to_string())]);
    }
}

/// Record a payload handed to the transport.
pub fn record_publish(topic: &str) {
    if let Some(m) = METRICS.get() {
        m.publish_total
            .add(1, &[KeyValue::new("topic", topic.to_string())]);
    }
}

/// Record a failed publish cycle.
pub fn record_cycle_failure(topic: &str) {
    if let Some(m) = METRICS.get() {
        m.cycle_failures
            .add(1, &[KeyValue::new("topic", topic.to_string())]);
    }
}

/// Record a request refused by injection screening.
pub fn record_injection_rejected(endpoint: &str) {
    if let Some(m) = METRICS.get() {
        m.injection_rejected
            .add(1, &[KeyValue::new("endpoint", endpoint.to_string())]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(metrics().is_some());
    }

    #[test]
    fn test_recorders_do_not_panic() {
        init_metrics();
        record_query("endpoint", true, 0.002);
        record_query("schedule", false, 0.010);
        record_publish("sensors/latest");
        record_cycle_failure("sensors/latest");
        record_injection_rejected("/users");
    }
}
