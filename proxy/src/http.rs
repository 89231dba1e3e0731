use crate::config::{Endpoint, Listener};
use crate::errors::{ProxyError, Result};
use crate::tls;
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Byte-level executor for one outbound request/response exchange.
///
/// The production implementation is a connection-pooling hyper client with
/// the endpoint's timeout; tests substitute recording or failing executors.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: Request<Full<Bytes>>) -> Result<Response<Bytes>>;
}

/// Outbound HTTP client bound to one endpoint.
pub struct HttpExecutor {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
    host: String,
}

impl HttpExecutor {
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        let tls_config = tls::client_config(&endpoint.tls)?;
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(HttpExecutor {
            client,
            timeout: Duration::from_secs(endpoint.timeout_secs),
            host: endpoint
                .url
                .host_str()
                .unwrap_or(endpoint.url.as_str())
                .to_string(),
        })
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    /// The timeout covers the entire exchange: connecting, sending, and
    /// collecting the complete response body. The body is always drained
    /// before the response is returned.
    async fn execute(&self, request: Request<Full<Bytes>>) -> Result<Response<Bytes>> {
        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(self.host.clone()))?
            .map_err(|err| ProxyError::TransportFailure(self.host.clone(), err.to_string()))?;

        let (parts, body) = response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|err| ProxyError::ResponseBodyError(err.to_string()))?;

        Ok(Response::from_parts(parts, body_bytes))
    }
}

/// Creates an error response with the status message as body.
pub fn make_error_response(status: StatusCode) -> Response<Full<Bytes>> {
    let message = status.canonical_reason().unwrap_or("an error occurred");
    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response
}

/// Binds the listener and serves connections until the token is cancelled,
/// then drains open connections up to the shutdown timeout. Connections
/// still open past the deadline are abandoned.
pub async fn run_http_service<S>(
    listener_config: &Listener,
    tls_acceptor: Option<TlsAcceptor>,
    service: S,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
) -> Result<()>
where
    S: Service<Request<Incoming>, Response = Response<Full<Bytes>>> + Clone + Send + Sync + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    let listener =
        TcpListener::bind(format!("{}:{}", listener_config.host, listener_config.port)).await?;
    let connections = TaskTracker::new();

    loop {
        let (stream, _peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = cancel.cancelled() => break,
        };
        let _ = stream.set_nodelay(true);

        let svc = service.clone();
        let cancel = cancel.clone();
        let tls_acceptor = tls_acceptor.clone();

        connections.spawn(async move {
            match tls_acceptor {
                Some(acceptor) => {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(err) => {
                            tracing::warn!(error = %err, "TLS handshake failed");
                            return;
                        }
                    };
                    serve_connection(TokioIo::new(tls_stream), svc, cancel).await;
                }
                None => serve_connection(TokioIo::new(stream), svc, cancel).await,
            }
        });
    }

    connections.close();
    if timeout(shutdown_timeout, connections.wait()).await.is_err() {
        tracing::warn!("shutdown deadline exceeded, abandoning open connections");
    }

    Ok(())
}

/// Serves one connection (h1/h2 auto-detected) until it finishes or the
/// token fires, in which case in-flight requests are allowed to complete.
async fn serve_connection<I, S>(io: I, service: S, cancel: CancellationToken)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    S: Service<Request<Incoming>, Response = Response<Full<Bytes>>> + Clone + Send + Sync + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    let builder = Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result {
                tracing::debug!(error = %err, "error serving connection");
            }
        }
        _ = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            let _ = conn.as_mut().await;
        }
    }
}
