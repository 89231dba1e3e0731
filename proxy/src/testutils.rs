use crate::config::{Endpoint, TlsOptions};
use crate::errors::{ProxyError, Result};
use crate::http::RequestExecutor;
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::noop::NoopTracer;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use url::Url;

pub(crate) fn string_attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

pub(crate) fn int_attr(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::IntValue(value)),
        }),
    }
}

pub(crate) fn resource_logs(attributes: &[(&str, &str)]) -> ResourceLogs {
    ResourceLogs {
        resource: Some(Resource {
            attributes: attributes
                .iter()
                .map(|(key, value)| string_attr(key, value))
                .collect(),
            ..Resource::default()
        }),
        ..ResourceLogs::default()
    }
}

pub(crate) fn test_endpoint(url: &str) -> Endpoint {
    Endpoint {
        url: Url::parse(url).expect("parse url"),
        headers: String::new(),
        timeout_secs: 5,
        tls: TlsOptions::default(),
    }
}

pub(crate) fn noop_tracer() -> Arc<BoxedTracer> {
    Arc::new(BoxedTracer::new(Box::new(NoopTracer::new())))
}

pub(crate) fn test_meter() -> (SdkMeterProvider, InMemoryMetricExporter) {
    let exporter = InMemoryMetricExporter::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter.clone()).build())
        .build();
    (provider, exporter)
}

pub(crate) struct RecordedRequest {
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Request executor that records every exchange and answers with a fixed
/// status, failing at the transport level for selected tenants.
pub(crate) struct MockExecutor {
    requests: Mutex<Vec<RecordedRequest>>,
    status: StatusCode,
    fail_tenants: HashSet<String>,
    tenant_header: &'static str,
}

impl MockExecutor {
    pub(crate) fn ok() -> Self {
        Self::with_status(StatusCode::OK)
    }

    pub(crate) fn with_status(status: StatusCode) -> Self {
        MockExecutor {
            requests: Mutex::new(Vec::new()),
            status,
            fail_tenants: HashSet::new(),
            tenant_header: "X-Scope-OrgID",
        }
    }

    pub(crate) fn failing_for(tenants: &[&str]) -> Self {
        MockExecutor {
            requests: Mutex::new(Vec::new()),
            status: StatusCode::OK,
            fail_tenants: tenants.iter().map(|tenant| tenant.to_string()).collect(),
            tenant_header: "X-Scope-OrgID",
        }
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    async fn execute(&self, request: Request<Full<Bytes>>) -> Result<Response<Bytes>> {
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .expect("collect mock request body")
            .to_bytes();

        let tenant = parts
            .headers
            .get(self.tenant_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        self.requests.lock().unwrap().push(RecordedRequest {
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body,
        });

        if self.fail_tenants.contains(&tenant) {
            return Err(ProxyError::TransportFailure(
                "backend".to_string(),
                "connection refused".to_string(),
            ));
        }

        Ok(Response::builder()
            .status(self.status)
            .body(Bytes::new())
            .expect("build mock response"))
    }
}

/// Sums the data points of a u64 counter from the most recent metric
/// snapshot, keeping only points that carry every `with` pair and none of
/// the `without` keys.
pub(crate) fn counter_sum(
    exporter: &InMemoryMetricExporter,
    name: &str,
    with: &[(&str, &str)],
    without: &[&str],
) -> u64 {
    let snapshots = exporter.get_finished_metrics().expect("metric snapshots");
    let Some(snapshot) = snapshots.last() else {
        return 0;
    };

    let mut total = 0;
    for scope in snapshot.scope_metrics() {
        for metric in scope.metrics() {
            if metric.name() != name {
                continue;
            }
            let AggregatedMetrics::U64(MetricData::Sum(sum)) = metric.data() else {
                continue;
            };
            for point in sum.data_points() {
                if matches_attributes(point.attributes(), with, without) {
                    total += point.value();
                }
            }
        }
    }
    total
}

/// Counts the recorded observations of a u64 histogram in the most recent
/// snapshot, filtered like [`counter_sum`].
pub(crate) fn histogram_count(
    exporter: &InMemoryMetricExporter,
    name: &str,
    with: &[(&str, &str)],
) -> u64 {
    let snapshots = exporter.get_finished_metrics().expect("metric snapshots");
    let Some(snapshot) = snapshots.last() else {
        return 0;
    };

    let mut total = 0;
    for scope in snapshot.scope_metrics() {
        for metric in scope.metrics() {
            if metric.name() != name {
                continue;
            }
            let AggregatedMetrics::U64(MetricData::Histogram(histogram)) = metric.data() else {
                continue;
            };
            for point in histogram.data_points() {
                if matches_attributes(point.attributes(), with, &[]) {
                    total += point.count();
                }
            }
        }
    }
    total
}

fn matches_attributes<'a>(
    attributes: impl Iterator<Item = &'a opentelemetry::KeyValue>,
    with: &[(&str, &str)],
    without: &[&str],
) -> bool {
    let attributes: Vec<(String, String)> = attributes
        .map(|kv| (kv.key.to_string(), kv.value.as_str().to_string()))
        .collect();

    with.iter().all(|(key, value)| {
        attributes
            .iter()
            .any(|(have_key, have_value)| have_key == key && have_value == value)
    }) && without
        .iter()
        .all(|key| !attributes.iter().any(|(have_key, _)| have_key == key))
}
