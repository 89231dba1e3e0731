use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod telemetry;

use config::{Config, LogLevel};

/// Multi-tenant OTLP ingress proxy: partitions incoming batches by tenant
/// and fans them out to per-signal backends.
#[derive(Parser)]
#[command(name = "otel-lgtm-proxy")]
struct Cli {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("Failed to load config file: {0}")]
    ConfigLoadError(#[from] config::ConfigError),
    #[error("Failed to initialize telemetry: {0}")]
    TelemetryError(#[from] telemetry::TelemetryError),
    #[error("Failed to create runtime: {0}")]
    RuntimeError(#[from] std::io::Error),
    #[error(transparent)]
    ProxyError(#[from] proxy::errors::ProxyError),
}

fn main() {
    if let Err(e) = cli() {
        // Tracing may not be initialized yet when config loading fails.
        eprintln!("startup error: {e}");
        tracing::error!(error = %e, "Startup error");
        std::process::exit(1);
    }
}

fn cli() -> Result<(), CliError> {
    let args = Cli::parse();
    let config = Config::from_file(&args.config_file_path)?;

    init_tracing(config.log_level);

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let providers = telemetry::init(&config.service)?;
    let meter = opentelemetry::global::meter("otel-lgtm-proxy");
    let tracer = Arc::new(opentelemetry::global::tracer("otel-lgtm-proxy"));

    tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        "starting application"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(proxy::run(config.proxy, meter, tracer));

    providers.shutdown();
    result?;
    Ok(())
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_filter())),
        )
        .init();
}
