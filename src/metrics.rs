use std::time::Duration;

use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};

use crate::config::TelemetryConfig;

/// Installs the global meter provider. Without it every instrument in the
/// workspace records into a no-op meter.
pub fn init_provider(
    config: &TelemetryConfig,
    service_version: &str,
) -> Result<Option<SdkMeterProvider>> {
    if !config.enable_metrics {
        return Ok(None);
    }

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", "plan-pipeline-server"))
        .with_attribute(KeyValue::new(
            "service.version",
            service_version.to_string(),
        ))
        .build();

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = &config.endpoint {
        exporter = exporter.with_endpoint(endpoint.to_owned());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(config.metrics_interval_secs))
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(Some(provider))
}
