use crate::codec;
use crate::config::Config;
use crate::http::RequestExecutor;
use crate::metrics_defs::SIGNAL_TYPE;
use crate::processor::Processor;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode};
use opentelemetry::global::BoxedTracer;
use opentelemetry::metrics::Meter;
use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use prost::Message;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Stateless facade over the three per-signal processors. Built once at
/// startup; the only per-signal differences are the container type and the
/// two functions handed to each processor.
pub struct Handlers {
    logs: Processor<ResourceLogs>,
    metrics: Processor<ResourceMetrics>,
    traces: Processor<ResourceSpans>,
}

impl Handlers {
    pub fn new(
        config: &Config,
        logs_executor: Arc<dyn RequestExecutor>,
        metrics_executor: Arc<dyn RequestExecutor>,
        traces_executor: Arc<dyn RequestExecutor>,
        meter: &Meter,
        tracer: Arc<BoxedTracer>,
    ) -> Self {
        let tenant = Arc::new(config.tenant.clone());

        let logs = Processor::new(
            tenant.clone(),
            Arc::new(config.logs.clone()),
            "logs",
            logs_executor,
            meter,
            tracer.clone(),
            logs_resource,
            encode_logs,
        );

        let metrics = Processor::new(
            tenant.clone(),
            Arc::new(config.metrics.clone()),
            "metrics",
            metrics_executor,
            meter,
            tracer.clone(),
            metrics_resource,
            encode_metrics,
        );

        let traces = Processor::new(
            tenant,
            Arc::new(config.traces.clone()),
            "traces",
            traces_executor,
            meter,
            tracer,
            traces_resource,
            encode_traces,
        );

        Handlers {
            logs,
            metrics,
            traces,
        }
    }

    pub async fn logs(&self, request: Request<Bytes>) -> Response<Full<Bytes>> {
        handle(&self.logs, request, |container: ExportLogsServiceRequest| {
            container.resource_logs
        })
        .await
    }

    pub async fn metrics(&self, request: Request<Bytes>) -> Response<Full<Bytes>> {
        handle(
            &self.metrics,
            request,
            |container: ExportMetricsServiceRequest| container.resource_metrics,
        )
        .await
    }

    pub async fn traces(&self, request: Request<Bytes>) -> Response<Full<Bytes>> {
        handle(
            &self.traces,
            request,
            |container: ExportTraceServiceRequest| container.resource_spans,
        )
        .await
    }

    pub fn health() -> Response<Full<Bytes>> {
        Response::new(Full::new(Bytes::from_static(b"OK")))
    }
}

fn logs_resource(item: &mut ResourceLogs) -> &mut Option<Resource> {
    &mut item.resource
}

fn metrics_resource(item: &mut ResourceMetrics) -> &mut Option<Resource> {
    &mut item.resource
}

fn traces_resource(item: &mut ResourceSpans) -> &mut Option<Resource> {
    &mut item.resource
}

fn encode_logs(items: Vec<ResourceLogs>) -> crate::errors::Result<Bytes> {
    codec::encode(&ExportLogsServiceRequest {
        resource_logs: items,
    })
}

fn encode_metrics(items: Vec<ResourceMetrics>) -> crate::errors::Result<Bytes> {
    codec::encode(&ExportMetricsServiceRequest {
        resource_metrics: items,
    })
}

fn encode_traces(items: Vec<ResourceSpans>) -> crate::errors::Result<Bytes> {
    codec::encode(&ExportTraceServiceRequest {
        resource_spans: items,
    })
}

/// Shared request path for all three signals: decode the container,
/// partition by tenant, fan out, and acknowledge with 202. The caller is
/// only told the batch was accepted for processing, never the per-tenant
/// outcomes.
async fn handle<C, T>(
    processor: &Processor<T>,
    request: Request<Bytes>,
    items_of: fn(C) -> Vec<T>,
) -> Response<Full<Bytes>>
where
    C: Message + Default + DeserializeOwned,
    T: Send + 'static,
{
    let cx = Context::new();
    let span = processor
        .tracer()
        .span_builder(format!("{}.handler", processor.signal_type()))
        .with_attributes([KeyValue::new(SIGNAL_TYPE, processor.signal_type())])
        .start_with_context(processor.tracer(), &cx);
    let cx = cx.with_span(span);

    let (parts, body) = request.into_parts();
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    let container: C = match codec::decode(content_type, &body, processor.signal_type()) {
        Ok(container) => container,
        Err(err) => {
            tracing::error!(
                signal_type = processor.signal_type(),
                error = %err,
                "failed to decode request body"
            );
            cx.span().record_error(&err);
            cx.span().set_status(Status::error(err.to_string()));
            cx.span().end();
            return message_response(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    let buckets = processor.partition(&cx, items_of(container));
    processor.dispatch(&cx, buckets).await;

    cx.span().set_status(Status::Ok);
    cx.span().end();

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::ACCEPTED;
    response
}

fn message_response(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response
}
