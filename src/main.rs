//! Tubely Uploadr - authenticated thumbnail and video uploads

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tubely_uploadr::metrics::server::MetricsServer;
use tubely_uploadr::store::InMemoryVideoStore;
use tubely_uploadr::{config::Config, server::Server, storage};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Tubely Uploadr - authenticated media uploads
#[derive(Parser, Debug)]
#[command(name = "tubely-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    match args.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_current_span(true),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init()?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!(version = tubely_uploadr::VERSION, "Starting Tubely Uploadr");

    let config = Config::load(&args.config)?;
    info!(path = ?args.config, backend = ?config.storage.backend, "Loaded configuration");

    let mut metrics_server = None;
    if config.metrics.enabled {
        let mut server = MetricsServer::from_config(&config.metrics);
        server.start().await?;
        metrics_server = Some(server);
    }

    let backend = storage::from_config(&config.storage, &config.server.public_url).await?;
    let videos = Arc::new(InMemoryVideoStore::new());

    let server = Server::new(&config, videos, backend).await?;
    server.run().await?;

    if let Some(mut server) = metrics_server {
        server.shutdown().await;
    }
    Ok(())
}
