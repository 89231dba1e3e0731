use crate::config::Service;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("unknown metrics exporter: {0}")]
    UnknownMetricsExporter(String),
    #[error("unknown traces exporter: {0}")]
    UnknownTracesExporter(String),
    #[error("failed to build otlp exporter: {0}")]
    ExporterBuild(String),
}

/// The SDK providers backing the proxy's self-observability. The meter and
/// tracer handed to the data plane come from these; an exporter setting of
/// `none` leaves the corresponding provider unset so the global no-op
/// provider stays in place.
pub struct Providers {
    meter: Option<SdkMeterProvider>,
    tracer: Option<SdkTracerProvider>,
}

impl Providers {
    pub fn shutdown(self) {
        if let Some(provider) = self.meter
            && let Err(err) = provider.shutdown()
        {
            tracing::warn!(error = %err, "meter provider shutdown failed");
        }
        if let Some(provider) = self.tracer
            && let Err(err) = provider.shutdown()
        {
            tracing::warn!(error = %err, "tracer provider shutdown failed");
        }
    }
}

/// Builds and installs the global meter and tracer providers.
///
/// Exporter selection follows the standard environment variables:
/// `OTEL_SDK_DISABLED=true` disables everything, and
/// `OTEL_METRICS_EXPORTER` / `OTEL_TRACES_EXPORTER` each accept
/// `none`, `console` (the default), or `otlp` (http/protobuf, endpoint
/// taken from the usual `OTEL_EXPORTER_OTLP_*` variables).
pub fn init(service: &Service) -> Result<Providers, TelemetryError> {
    if std::env::var("OTEL_SDK_DISABLED").as_deref() == Ok("true") {
        return Ok(Providers {
            meter: None,
            tracer: None,
        });
    }

    let resource = Resource::builder()
        .with_service_name(service.name.clone())
        .with_attributes([KeyValue::new("service.version", service.version.clone())])
        .build();

    let meter = init_metrics(&resource)?;
    if let Some(provider) = &meter {
        global::set_meter_provider(provider.clone());
    }

    let tracer = init_traces(&resource)?;
    if let Some(provider) = &tracer {
        global::set_tracer_provider(provider.clone());
    }

    Ok(Providers { meter, tracer })
}

fn init_metrics(resource: &Resource) -> Result<Option<SdkMeterProvider>, TelemetryError> {
    let exporter = std::env::var("OTEL_METRICS_EXPORTER").unwrap_or_default();
    match exporter.as_str() {
        "none" => Ok(None),
        "" | "console" => Ok(Some(
            SdkMeterProvider::builder()
                .with_periodic_exporter(opentelemetry_stdout::MetricExporter::default())
                .with_resource(resource.clone())
                .build(),
        )),
        "otlp" => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .build()
                .map_err(|err| TelemetryError::ExporterBuild(err.to_string()))?;
            Ok(Some(
                SdkMeterProvider::builder()
                    .with_periodic_exporter(exporter)
                    .with_resource(resource.clone())
                    .build(),
            ))
        }
        other => Err(TelemetryError::UnknownMetricsExporter(other.to_string())),
    }
}

fn init_traces(resource: &Resource) -> Result<Option<SdkTracerProvider>, TelemetryError> {
    let exporter = std::env::var("OTEL_TRACES_EXPORTER").unwrap_or_default();
    match exporter.as_str() {
        "none" => Ok(None),
        "" | "console" => Ok(Some(
            SdkTracerProvider::builder()
                .with_batch_exporter(opentelemetry_stdout::SpanExporter::default())
                .with_resource(resource.clone())
                .build(),
        )),
        "otlp" => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .build()
                .map_err(|err| TelemetryError::ExporterBuild(err.to_string()))?;
            Ok(Some(
                SdkTracerProvider::builder()
                    .with_batch_exporter(exporter)
                    .with_resource(resource.clone())
                    .build(),
            ))
        }
        other => Err(TelemetryError::UnknownTracesExporter(other.to_string())),
    }
}
