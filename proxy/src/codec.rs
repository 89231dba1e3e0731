use crate::errors::{ProxyError, Result};
use bytes::Bytes;
use prost::Message;
use serde::de::DeserializeOwned;

/// Decodes a request body into the signal's OTLP container.
///
/// The primary encoding is binary protobuf. When the media type indicates
/// JSON the body is read as OTLP/JSON instead, a compatibility path for
/// diagnostics clients; encoding out is always binary.
pub fn decode<C>(content_type: Option<&str>, body: &[u8], signal_type: &'static str) -> Result<C>
where
    C: Message + Default + DeserializeOwned,
{
    if content_type.is_some_and(|value| value.starts_with("application/json")) {
        serde_json::from_slice(body).map_err(|err| ProxyError::malformed(signal_type, err))
    } else {
        C::decode(body).map_err(|err| ProxyError::malformed(signal_type, err))
    }
}

/// Encodes an OTLP container to its binary wire form.
pub fn encode<C: Message>(container: &C) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(container.encoded_len());
    container
        .encode(&mut buf)
        .map_err(|err| ProxyError::EncodeFailure(err.to_string()))?;
    Ok(buf.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::resource_logs;
    use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;

    #[test]
    fn binary_round_trip() {
        let request = ExportLogsServiceRequest {
            resource_logs: vec![resource_logs(&[("tenant.id", "t1")])],
        };

        let encoded = encode(&request).expect("encode");
        let decoded: ExportLogsServiceRequest =
            decode(Some("application/x-protobuf"), &encoded, "logs").expect("decode");

        assert_eq!(decoded, request);
    }

    #[test]
    fn missing_content_type_decodes_as_binary() {
        let request = ExportLogsServiceRequest {
            resource_logs: vec![resource_logs(&[("tenant.id", "t1")])],
        };
        let encoded = encode(&request).expect("encode");
        let decoded: ExportLogsServiceRequest = decode(None, &encoded, "logs").expect("decode");
        assert_eq!(decoded, request);
    }

    #[test]
    fn json_body_decodes_when_media_type_says_json() {
        let body = br#"{
            "resourceLogs": [{
                "resource": {
                    "attributes": [
                        {"key": "tenant.id", "value": {"stringValue": "t1"}}
                    ]
                },
                "scopeLogs": []
            }]
        }"#;

        let decoded: ExportLogsServiceRequest =
            decode(Some("application/json"), body, "logs").expect("decode json");

        assert_eq!(decoded.resource_logs.len(), 1);
        let resource = decoded.resource_logs[0].resource.as_ref().expect("resource");
        assert_eq!(resource.attributes[0].key, "tenant.id");
    }

    #[test]
    fn malformed_binary_reports_signal_name() {
        let result: Result<ExportLogsServiceRequest> =
            decode(Some("application/x-protobuf"), b"not protobuf", "logs");

        let err = result.expect_err("must fail");
        assert_eq!(err.to_string(), "failed to unmarshal logs");
    }

    #[test]
    fn malformed_json_reports_signal_name() {
        let result: Result<ExportLogsServiceRequest> =
            decode(Some("application/json"), b"{not json", "traces");

        let err = result.expect_err("must fail");
        assert_eq!(err.to_string(), "failed to unmarshal traces");
    }
}
