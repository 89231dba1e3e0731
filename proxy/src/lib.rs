pub mod codec;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod headers;
pub mod http;
pub mod metrics_defs;
pub mod processor;
pub mod tenant;
pub mod tls;

#[cfg(test)]
mod testutils;

use crate::config::Config;
use crate::errors::{ProxyError, Result};
use crate::handlers::Handlers;
use crate::http::{HttpExecutor, RequestExecutor, make_error_response, run_http_service};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use opentelemetry::global::BoxedTracer;
use opentelemetry::metrics::Meter;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builds the three signal processors and serves the listener until a
/// shutdown signal arrives. The meter and tracer are the injected
/// self-observability handles; providers are owned by the binary.
pub async fn run(config: Config, meter: Meter, tracer: Arc<BoxedTracer>) -> Result<()> {
    let logs_executor: Arc<dyn RequestExecutor> = Arc::new(HttpExecutor::new(&config.logs)?);
    let metrics_executor: Arc<dyn RequestExecutor> =
        Arc::new(HttpExecutor::new(&config.metrics)?);
    let traces_executor: Arc<dyn RequestExecutor> = Arc::new(HttpExecutor::new(&config.traces)?);

    let handlers = Arc::new(Handlers::new(
        &config,
        logs_executor,
        metrics_executor,
        traces_executor,
        &meter,
        tracer,
    ));
    let service = ProxyService::new(handlers);

    let tls_acceptor = tls::server_acceptor(&config.listener.tls)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_shutdown().await;
            tracing::info!("shutdown signal received, draining");
            cancel.cancel();
        }
    });

    tracing::info!("receiving logs on /v1/logs");
    tracing::info!("receiving metrics on /v1/metrics");
    tracing::info!("receiving traces on /v1/traces");
    let scheme = if tls_acceptor.is_some() { "https" } else { "http" };
    tracing::info!(
        "starting {scheme} server on {}:{}",
        config.listener.host,
        config.listener.port
    );

    run_http_service(
        &config.listener,
        tls_acceptor,
        service,
        cancel,
        Duration::from_secs(config.shutdown_timeout_secs),
    )
    .await
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    tracing::error!(error = %err, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Routes ingress requests to the signal handlers.
#[derive(Clone)]
pub struct ProxyService {
    handlers: Arc<Handlers>,
}

impl ProxyService {
    pub fn new(handlers: Arc<Handlers>) -> Self {
        ProxyService { handlers }
    }
}

enum Signal {
    Logs,
    Metrics,
    Traces,
}

impl<B> Service<Request<B>> for ProxyService
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<Full<Bytes>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        if req.method() == Method::GET && req.uri().path() == "/health" {
            return Box::pin(async { Ok(Handlers::health()) });
        }

        let signal = match (req.method(), req.uri().path()) {
            (&Method::POST, "/v1/logs") => Signal::Logs,
            (&Method::POST, "/v1/metrics") => Signal::Metrics,
            (&Method::POST, "/v1/traces") => Signal::Traces,
            _ => return Box::pin(async { Ok(make_error_response(StatusCode::NOT_FOUND)) }),
        };
        let handlers = self.handlers.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body_bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => {
                    tracing::error!(error = %err, "failed to read request body");
                    return Ok(make_error_response(StatusCode::BAD_REQUEST));
                }
            };
            let request = Request::from_parts(parts, body_bytes);

            let response = match signal {
                Signal::Logs => handlers.logs(request).await,
                Signal::Metrics => handlers.metrics(request).await,
                Signal::Traces => handlers.traces(request).await,
            };
            Ok(response)
        })
    }
}
