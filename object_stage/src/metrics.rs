//! Metrics for staging operations.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

#[derive(Clone)]
pub struct StageMetrics {
    pub operations: Histogram<f64>,
    pub errors: Counter<u64>,
}

impl StageMetrics {
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .f64_histogram("object_stage_operation_duration_seconds")
            .with_description("Duration of object stage operations in seconds")
            .build();

        let errors = meter
            .u64_counter("object_stage_errors_total")
            .with_description("Total number of object stage errors")
            .build();

        Self { operations, errors }
    }

    pub fn from_global() -> Self {
        Self::new(&opentelemetry::global::meter("object_stage"))
    }

    pub fn record_error(&self, operation: &'static str) {
        self.errors
            .add(1, &[KeyValue::new("operation", operation)]);
    }
}

/// Records the elapsed time into a histogram when dropped.
pub struct Timer {
    start: Instant,
    histogram: Histogram<f64>,
    labels: Vec<KeyValue>,
}

impl Timer {
    pub fn start_with_labels(histogram: &Histogram<f64>, labels: &[KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
            labels: labels.to_vec(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.record(duration, &self.labels);
    }
}
