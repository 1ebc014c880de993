use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};

use crate::router::PipelineStage;

#[derive(Clone)]
pub struct PipelineMetrics {
    pub started: Counter<u64>,
    pub finished: Counter<u64>,
    pub duration: Histogram<f64>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("processor_metrics");

        let started = meter
            .u64_counter("plan.pipelines_started")
            .with_description("Pipelines routed, by file kind")
            .build();

        let finished = meter
            .u64_counter("plan.pipelines_finished")
            .with_description("Pipelines that reached a terminal status")
            .build();

        let duration = meter
            .f64_histogram("plan.pipeline_duration")
            .with_unit("s")
            .with_description("Time from routing to terminal status in seconds")
            .build();

        Self {
            started,
            finished,
            duration,
        }
    }

    pub fn record_started(&self, kind: &str) {
        self.started.add(1, &[KeyValue::new("kind", kind.to_string())]);
    }

    /// `failed_at` is the stage the run failed in; `None` means it was
    /// processed.
    pub fn record_finished(&self, kind: &str, failed_at: Option<PipelineStage>, secs: f64) {
        let outcome = match failed_at {
            None => PipelineStage::Processed,
            Some(_) => PipelineStage::Failed,
        };
        let mut labels = vec![
            KeyValue::new("kind", kind.to_string()),
            KeyValue::new("outcome", outcome.as_ref().to_string()),
        ];
        if let Some(stage) = failed_at {
            labels.push(KeyValue::new("failed_at", stage.as_ref().to_string()));
        }
        self.finished.add(1, &labels);
        self.duration.record(secs, &labels[..2]);
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
