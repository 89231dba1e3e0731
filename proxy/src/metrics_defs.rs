/// Definition of a metric instrument recorded by the processor.
pub struct MetricDef {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
}

pub const PROXY_RECORDS_TOTAL: MetricDef = MetricDef {
    name: "proxy_records_total",
    description: "Number of resource items sent downstream, per tenant and attempt",
    unit: "",
};

pub const PROXY_REQUESTS_TOTAL: MetricDef = MetricDef {
    name: "proxy_requests_total",
    description: "Number of outbound requests that completed with a response",
    unit: "",
};

pub const PROXY_REQUEST_DURATION_MS: MetricDef = MetricDef {
    name: "proxy_request_duration_ms",
    description: "Outbound request latency",
    unit: "ms",
};

// Tag keys shared by metrics and spans. The status code tag is omitted
// from proxy_records_total when the exchange never produced a response.
pub const SIGNAL_TYPE: &str = "signal.type";
pub const SIGNAL_TENANT: &str = "signal.tenant";
pub const SIGNAL_TENANT_RECORDS: &str = "signal.tenant.records";
pub const SIGNAL_RESPONSE_STATUS_CODE: &str = "signal.response.status.code";
