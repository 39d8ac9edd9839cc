//! Prometheus instruments for the `/characters` endpoint.
//!
//! Each [`Metrics`] owns its own registry, exposed at `GET /metrics`.

use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::pipeline::ErrorKind;

/// Request latency buckets (seconds), 5ms to 30s.
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub struct Metrics {
    registry: Registry,
    /// Requests that reached the handler.
    requests_total: IntCounter,
    /// Failed requests, labelled by error kind.
    errors_total: IntCounterVec,
    request_duration_seconds: Histogram,
    /// Characters returned to clients.
    processed_total: IntCounter,
}

impl Metrics {
    /// Create the instruments and register them under the `charsync_` prefix.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("charsync".to_string()), None)?;

        let requests_total = IntCounter::new(
            "characters_requests_total",
            "Total number of requests to the /characters endpoint",
        )?;
        let errors_total = IntCounterVec::new(
            Opts::new(
                "characters_errors_total",
                "Total number of errors from the /characters endpoint",
            ),
            &["kind"],
        )?;
        let request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "characters_request_duration_seconds",
                "Duration of requests to the /characters endpoint in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let processed_total = IntCounter::new(
            "characters_processed_total",
            "Total number of characters processed by the /characters endpoint",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(processed_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            errors_total,
            request_duration_seconds,
            processed_total,
        })
    }

    pub fn record_request(&self) {
        self.requests_total.inc();
    }

    pub fn record_success(&self, processed: usize, elapsed: Duration) {
        self.processed_total.inc_by(processed as u64);
        self.request_duration_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn record_error(&self, kind: ErrorKind, elapsed: Duration) {
        self.errors_total.with_label_values(&[kind.as_str()]).inc();
        self.request_duration_seconds.observe(elapsed.as_secs_f64());
    }

    /// Prometheus text exposition of every registered instrument.
    pub fn render(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(metrics: &Metrics) -> String {
        String::from_utf8(metrics.render().unwrap()).unwrap()
    }

    #[test]
    fn test_fresh_registry_is_zeroed() {
        let metrics = Metrics::new().unwrap();
        let text = rendered(&metrics);
        assert!(text.contains("charsync_characters_requests_total 0"));
        assert!(text.contains("charsync_characters_processed_total 0"));
        assert!(text.contains("charsync_characters_request_duration_seconds_count 0"));
    }

    #[test]
    fn test_records_outcomes() {
        let metrics = Metrics::new().unwrap();

        metrics.record_request();
        metrics.record_success(3, Duration::from_millis(40));
        metrics.record_request();
        metrics.record_error(ErrorKind::AdmissionDenied, Duration::from_millis(2));

        let text = rendered(&metrics);
        assert!(text.contains("charsync_characters_requests_total 2"));
        assert!(text.contains("charsync_characters_processed_total 3"));
        assert!(text.contains(r#"charsync_characters_errors_total{kind="admission_denied"} 1"#));
        assert!(text.contains("charsync_characters_request_duration_seconds_count 2"));
    }

    #[test]
    fn test_instances_do_not_share_counts() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_request();

        assert!(rendered(&second).contains("charsync_characters_requests_total 0"));
    }
}
