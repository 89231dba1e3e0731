use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

/// Errors that can occur while accepting, partitioning, and forwarding
/// telemetry batches
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The request body could not be decoded as the signal's OTLP container.
    /// The display text doubles as the 400 response body.
    #[error("failed to unmarshal {signal}")]
    MalformedPayload {
        signal: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to marshal data: {0}")]
    EncodeFailure(String),

    #[error("failed to send request to {0}: {1}")]
    TransportFailure(String, String),

    #[error("upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("failed to read response body: {0}")]
    ResponseBodyError(String),

    #[error("invalid TLS configuration: {0}")]
    TlsConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl ProxyError {
    pub fn malformed(
        signal: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ProxyError::MalformedPayload {
            signal,
            source: Box::new(source),
        }
    }
}
