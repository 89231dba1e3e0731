use serde::Deserialize;
use url::Url;

/// Configuration for the proxy data plane: the inbound listener, the
/// tenant resolution rules, and one outbound endpoint per signal.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub tenant: TenantConfig,
    pub logs: Endpoint,
    pub metrics: Endpoint,
    pub traces: Endpoint,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Listener {
    pub host: String,
    pub port: u16,
    pub tls: TlsOptions,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: TlsOptions::default(),
        }
    }
}

/// One downstream backend: where to forward a signal's buckets.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Endpoint {
    pub url: Url,
    /// Extra outbound headers in `k1=v1,k2=v2` form. Malformed pairs are skipped.
    #[serde(default)]
    pub headers: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub tls: TlsOptions,
}

/// TLS material for a listener or an endpoint. TLS is active only when
/// cert, key, and CA file are all set.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlsOptions {
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: String,
    pub client_auth: ClientAuthMode,
    pub insecure_skip_verify: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum ClientAuthMode {
    #[default]
    NoClientCert,
    RequestClientCert,
    RequireAnyClientCert,
    VerifyClientCertIfGiven,
    RequireAndVerifyClientCert,
}

/// How a tenant identity is resolved from resource attributes and how it
/// is carried on the outbound request.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TenantConfig {
    /// Primary attribute checked first; also the key written back when the
    /// default tenant is used.
    pub label: String,
    /// Ordered alternatives checked when the primary label is absent.
    pub fallback_labels: Vec<String>,
    /// Template for the outbound header value; every `%s` is replaced with
    /// the resolved identity.
    pub format: String,
    /// Outbound header name carrying the tenant identity.
    pub header: String,
    /// Identity used when resolution fails. Empty disables the default and
    /// causes unresolved items to be dropped.
    pub default: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        TenantConfig {
            label: "tenant.id".to_string(),
            fallback_labels: Vec::new(),
            format: "%s".to_string(),
            header: "X-Scope-OrgID".to_string(),
            default: "default".to_string(),
        }
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    15
}

fn default_timeout_secs() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_applies_defaults() {
        let yaml = r#"
            logs: {url: "http://loki:3100/otlp/v1/logs"}
            metrics: {url: "http://mimir:9009/otlp/v1/metrics"}
            traces: {url: "http://tempo:4318/v1/traces"}
            "#;
        let config: Config = serde_yaml::from_str(yaml).expect("parse config");

        assert_eq!(config.listener.host, "0.0.0.0");
        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.shutdown_timeout_secs, 15);
        assert_eq!(config.tenant.label, "tenant.id");
        assert_eq!(config.tenant.header, "X-Scope-OrgID");
        assert_eq!(config.tenant.format, "%s");
        assert_eq!(config.tenant.default, "default");
        assert!(config.tenant.fallback_labels.is_empty());
        assert_eq!(config.logs.timeout_secs, 15);
        assert_eq!(config.logs.headers, "");
        assert_eq!(config.logs.tls, TlsOptions::default());
        assert_eq!(config.logs.url.as_str(), "http://loki:3100/otlp/v1/logs");
    }

    #[test]
    fn endpoint_url_is_required() {
        let yaml = r#"
            logs: {url: "http://loki:3100/otlp/v1/logs"}
            metrics: {url: "http://mimir:9009/otlp/v1/metrics"}
            "#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn full_config_round_trip() {
        let yaml = r#"
            listener:
                host: 127.0.0.1
                port: 4318
                tls:
                    cert_file: /etc/tls/server.crt
                    key_file: /etc/tls/server.key
                    ca_file: /etc/tls/ca.crt
                    client_auth: RequireAndVerifyClientCert
            tenant:
                label: tenant.id
                fallback_labels: [tenantId, tenant_id]
                format: "team-%s"
                header: X-Scope-OrgID
                default: shared
            shutdown_timeout_secs: 5
            logs:
                url: "https://loki:3100/otlp/v1/logs"
                headers: "Authorization=Bearer abc,X-Env=prod"
                timeout_secs: 30
                tls:
                    insecure_skip_verify: true
            metrics: {url: "http://mimir:9009/otlp/v1/metrics"}
            traces: {url: "http://tempo:4318/v1/traces"}
            "#;
        let config: Config = serde_yaml::from_str(yaml).expect("parse config");

        assert_eq!(config.listener.port, 4318);
        assert_eq!(
            config.listener.tls.client_auth,
            ClientAuthMode::RequireAndVerifyClientCert
        );
        assert_eq!(
            config.tenant.fallback_labels,
            vec!["tenantId".to_string(), "tenant_id".to_string()]
        );
        assert_eq!(config.tenant.format, "team-%s");
        assert_eq!(config.tenant.default, "shared");
        assert_eq!(config.shutdown_timeout_secs, 5);
        assert_eq!(config.logs.timeout_secs, 30);
        assert!(config.logs.tls.insecure_skip_verify);
        assert_eq!(config.metrics.tls.client_auth, ClientAuthMode::NoClientCert);
    }

    #[test]
    fn unknown_client_auth_mode_is_rejected() {
        let yaml = r#"
            listener: {tls: {client_auth: SomethingElse}}
            logs: {url: "http://loki:3100/otlp/v1/logs"}
            metrics: {url: "http://mimir:9009/otlp/v1/metrics"}
            traces: {url: "http://tempo:4318/v1/traces"}
            "#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }
}
