use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};

/// Request metrics for the predict endpoint.
///
/// Without a configured meter provider the global no-op meter is used, so
/// recording is always safe.
#[derive(Clone)]
pub struct PredictMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    detections: Counter<u64>,
}

impl PredictMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0,
        ];
        let duration = meter
            .f64_histogram("predict_duration_seconds")
            .with_description("Time to decode, detect, annotate and save one upload")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build();
        let requests = meter
            .u64_counter("predict_requests_total")
            .with_description("Predict requests by outcome")
            .build();
        let detections = meter
            .u64_counter("detections_total")
            .with_description("Total detections returned")
            .build();

        Self {
            duration,
            requests,
            detections,
        }
    }

    pub fn record_success(&self, seconds: f64, detections: usize) {
        self.duration.record(seconds, &[]);
        self.requests
            .add(1, &[KeyValue::new("outcome", "success")]);
        self.detections.add(detections as u64, &[]);
    }

    pub fn record_failure(&self, outcome: &'static str) {
        self.requests.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}
