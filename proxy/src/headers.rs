use crate::config::TenantConfig;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

/// Prepares an outbound request's headers: the protobuf content type, the
/// tenant-scoping header, and any extra headers configured on the endpoint.
///
/// The tenant header value is the configured format template with every
/// `%s` replaced by the identity. Extra headers come as `k1=v1,k2=v2`;
/// the first `=` delimits key from value and malformed pairs are skipped.
pub fn compose(headers: &mut HeaderMap, tenant: &str, config: &TenantConfig, extra: &str) {
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-protobuf"),
    );

    if let Ok(name) = HeaderName::from_bytes(config.header.as_bytes())
        && let Ok(value) = HeaderValue::from_str(&config.format.replace("%s", tenant))
    {
        headers.insert(name, value);
    }

    for pair in extra.split(',') {
        if let Some((key, value)) = pair.split_once('=')
            && let Ok(name) = HeaderName::from_bytes(key.trim().as_bytes())
            && let Ok(value) = HeaderValue::from_str(value)
        {
            headers.append(name, value);
        }
    }
}
