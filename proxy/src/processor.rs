use crate::config::{Endpoint, TenantConfig};
use crate::errors::{ProxyError, Result};
use crate::headers;
use crate::http::RequestExecutor;
use crate::metrics_defs::{
    PROXY_RECORDS_TOTAL, PROXY_REQUEST_DURATION_MS, PROXY_REQUESTS_TOTAL,
    SIGNAL_RESPONSE_STATUS_CODE, SIGNAL_TENANT, SIGNAL_TENANT_RECORDS, SIGNAL_TYPE,
};
use crate::tenant::{self, Resolution};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, Response};
use opentelemetry::global::BoxedTracer;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_proto::tonic::common::v1 as common;
use opentelemetry_proto::tonic::resource::v1::Resource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Generic per-signal processor: partitions a decoded batch by tenant and
/// fans out one concurrent request per tenant bucket.
///
/// The processor is decoupled from the concrete OTLP item types through two
/// function arguments fixed at construction: one yields an item's resource,
/// the other serialises a bucket back into the signal's container. One
/// instance per signal lives for the life of the process and is safe for
/// concurrent use; buckets and payload buffers are per-request.
pub struct Processor<T> {
    tenant: Arc<TenantConfig>,
    endpoint: Arc<Endpoint>,
    signal_type: &'static str,
    executor: Arc<dyn RequestExecutor>,
    tracer: Arc<BoxedTracer>,
    records_total: Counter<u64>,
    requests_total: Counter<u64>,
    request_duration: Histogram<u64>,
    resource_of: fn(&mut T) -> &mut Option<Resource>,
    encode_bucket: fn(Vec<T>) -> Result<Bytes>,
}

impl<T> Clone for Processor<T> {
    fn clone(&self) -> Self {
        Processor {
            tenant: self.tenant.clone(),
            endpoint: self.endpoint.clone(),
            signal_type: self.signal_type,
            executor: self.executor.clone(),
            tracer: self.tracer.clone(),
            records_total: self.records_total.clone(),
            requests_total: self.requests_total.clone(),
            request_duration: self.request_duration.clone(),
            resource_of: self.resource_of,
            encode_bucket: self.encode_bucket,
        }
    }
}

impl<T: Send + 'static> Processor<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant: Arc<TenantConfig>,
        endpoint: Arc<Endpoint>,
        signal_type: &'static str,
        executor: Arc<dyn RequestExecutor>,
        meter: &Meter,
        tracer: Arc<BoxedTracer>,
        resource_of: fn(&mut T) -> &mut Option<Resource>,
        encode_bucket: fn(Vec<T>) -> Result<Bytes>,
    ) -> Self {
        let records_total = meter
            .u64_counter(PROXY_RECORDS_TOTAL.name)
            .with_description(PROXY_RECORDS_TOTAL.description)
            .build();
        let requests_total = meter
            .u64_counter(PROXY_REQUESTS_TOTAL.name)
            .with_description(PROXY_REQUESTS_TOTAL.description)
            .build();
        let request_duration = meter
            .u64_histogram(PROXY_REQUEST_DURATION_MS.name)
            .with_description(PROXY_REQUEST_DURATION_MS.description)
            .with_unit(PROXY_REQUEST_DURATION_MS.unit)
            .build();

        Processor {
            tenant,
            endpoint,
            signal_type,
            executor,
            tracer,
            records_total,
            requests_total,
            request_duration,
            resource_of,
            encode_bucket,
        }
    }

    pub fn signal_type(&self) -> &'static str {
        self.signal_type
    }

    pub(crate) fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }

    /// Groups the batch by tenant identity, preserving input order within
    /// each bucket. Items resolved through the default tenant get the
    /// primary label written back onto their resource; unresolved items
    /// are dropped with a warning.
    pub fn partition(&self, cx: &Context, items: Vec<T>) -> HashMap<String, Vec<T>> {
        let span = self
            .tracer
            .span_builder(format!("{}.partition", self.signal_type))
            .with_attributes([KeyValue::new(SIGNAL_TYPE, self.signal_type)])
            .start_with_context(&*self.tracer, cx);
        let cx = cx.with_span(span);

        let mut buckets: HashMap<String, Vec<T>> = HashMap::new();

        for mut item in items {
            let resource = (self.resource_of)(&mut item);
            tracing::trace!(signal_type = self.signal_type, resource = ?resource, "partitioning resource item");

            let attributes = resource
                .as_ref()
                .map(|r| r.attributes.as_slice())
                .unwrap_or_default();

            let tenant = match tenant::resolve(attributes, &self.tenant) {
                Resolution::Identified(tenant) => tenant,
                Resolution::Defaulted(tenant) => {
                    // Make the tenant explicit for downstream consumers. The
                    // resource is owned by exactly one bucket, so mutating it
                    // here cannot be observed by another tenant's worker.
                    resource
                        .get_or_insert_with(Resource::default)
                        .attributes
                        .push(common::KeyValue {
                            key: self.tenant.label.clone(),
                            value: Some(common::AnyValue {
                                value: Some(common::any_value::Value::StringValue(tenant.clone())),
                            }),
                        });
                    tenant
                }
                Resolution::Unresolved => {
                    tracing::warn!(
                        signal_type = self.signal_type,
                        "no tenant found in resource attributes and no default tenant configured"
                    );
                    continue;
                }
            };

            buckets.entry(tenant).or_default().push(item);
        }

        cx.span().set_status(Status::Ok);
        cx.span().end();
        buckets
    }

    /// Sends every tenant bucket concurrently and records each worker's
    /// outcome. Returns once all workers have finished; a failing worker
    /// never cancels its peers.
    pub async fn dispatch(&self, cx: &Context, buckets: HashMap<String, Vec<T>>) {
        let mut workers = JoinSet::new();

        for (tenant, items) in buckets {
            let processor = self.clone();
            let cx = cx.clone();
            workers.spawn(async move { processor.run_worker(&cx, tenant, items).await });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "worker task panicked");
            }
        }
    }

    async fn run_worker(&self, cx: &Context, tenant: String, items: Vec<T>) {
        let span = self
            .tracer
            .span_builder(format!("{}.dispatch", self.signal_type))
            .with_attributes([
                KeyValue::new(SIGNAL_TYPE, self.signal_type),
                KeyValue::new(SIGNAL_TENANT, tenant.clone()),
            ])
            .start_with_context(&*self.tracer, cx);
        let cx = cx.with_span(span);

        let record_count = items.len() as u64;

        match self.send(&cx, &tenant, items).await {
            Ok(response) => {
                let status_code = response.status().as_u16().to_string();
                let attributes = [
                    KeyValue::new(SIGNAL_TYPE, self.signal_type),
                    KeyValue::new(SIGNAL_TENANT, tenant.clone()),
                    KeyValue::new(SIGNAL_RESPONSE_STATUS_CODE, status_code.clone()),
                ];
                self.records_total.add(record_count, &attributes);
                self.requests_total.add(1, &attributes);

                tracing::debug!(
                    signal_type = self.signal_type,
                    "sent {record_count} records status {status_code} for tenant {tenant}"
                );
                tracing::trace!(
                    signal_type = self.signal_type,
                    tenant = %tenant,
                    records = record_count,
                    "bucket forwarded"
                );
                cx.span().set_status(Status::Ok);
            }
            Err(err @ ProxyError::EncodeFailure(_)) => {
                tracing::error!(
                    signal_type = self.signal_type,
                    tenant = %tenant,
                    error = %err,
                    "failed to encode bucket"
                );
                cx.span().record_error(&err);
                cx.span().set_status(Status::error("failed to send"));
            }
            Err(err) => {
                // The exchange never completed, so there is no status code
                // to tag; the attempt still counts against the tenant.
                self.records_total.add(
                    record_count,
                    &[
                        KeyValue::new(SIGNAL_TYPE, self.signal_type),
                        KeyValue::new(SIGNAL_TENANT, tenant.clone()),
                    ],
                );
                tracing::error!(
                    signal_type = self.signal_type,
                    tenant = %tenant,
                    error = %err,
                    "failed to send"
                );
                cx.span().record_error(&err);
                cx.span().set_status(Status::error("failed to send"));
            }
        }

        cx.span().end();
    }

    /// Serialises one bucket and posts it to the endpoint with the tenant
    /// header applied. A non-2xx response is not an error here: the backend
    /// is authoritative and the outcome is reported upward as-is.
    async fn send(&self, cx: &Context, tenant: &str, items: Vec<T>) -> Result<Response<Bytes>> {
        let start = Instant::now();
        let record_count = items.len() as i64;

        let span = self
            .tracer
            .span_builder(format!("{}.send", self.signal_type))
            .with_attributes([
                KeyValue::new(SIGNAL_TYPE, self.signal_type),
                KeyValue::new(SIGNAL_TENANT, tenant.to_string()),
                KeyValue::new(SIGNAL_TENANT_RECORDS, record_count),
            ])
            .start_with_context(&*self.tracer, cx);
        let cx = cx.with_span(span);

        let result = self.exchange(tenant, items).await;

        match &result {
            Ok(response) => {
                let status_code = response.status().as_u16().to_string();
                cx.span()
                    .set_attribute(KeyValue::new(SIGNAL_RESPONSE_STATUS_CODE, status_code.clone()));
                cx.span().set_status(Status::Ok);

                self.request_duration.record(
                    start.elapsed().as_millis() as u64,
                    &[
                        KeyValue::new(SIGNAL_TYPE, self.signal_type),
                        KeyValue::new(SIGNAL_TENANT, tenant.to_string()),
                        KeyValue::new(SIGNAL_RESPONSE_STATUS_CODE, status_code),
                    ],
                );
            }
            Err(err) => {
                cx.span().record_error(err);
                cx.span().set_status(Status::error("failed to send"));
            }
        }

        cx.span().end();
        result
    }

    async fn exchange(&self, tenant: &str, items: Vec<T>) -> Result<Response<Bytes>> {
        let body = (self.encode_bucket)(items)?;

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.url.as_str())
            .body(Full::new(body))
            .map_err(|err| ProxyError::InternalError(format!("failed to build request: {err}")))?;

        headers::compose(
            request.headers_mut(),
            tenant,
            &self.tenant,
            &self.endpoint.headers,
        );

        self.executor.execute(request).await
    }
}
