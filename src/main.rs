//! Demo server for the handler timeout middleware.
//!
//! ```text
//! curl -i http://localhost:8080/short   # 200 after 1s
//! curl -i http://localhost:8080/long    # fallback after the deadline
//! curl -i http://localhost:8080/long2   # fallback, handler stops early
//! curl -i http://localhost:8080/panic   # 500 from the recovery layer
//! curl -i http://localhost:8080/health  # never subject to the deadline
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use handler_timeout::config::{load_config, validation::validate_config, AppConfig};
use handler_timeout::observability::{logging, metrics};
use handler_timeout::HttpServer;

#[derive(Parser)]
#[command(name = "handler-timeout")]
#[command(about = "Demo server enforcing handler deadlines", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        if let Err(errors) = validate_config(&config) {
            return Err(format!("invalid --bind: {:?}", errors).into());
        }
    }

    logging::init_logging(&config.observability);
    tracing::info!("handler-timeout v0.1.0 starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        timeout_ms = config.timeout.timeout_ms,
        error_status = config.timeout.error_status,
        skip_paths = ?config.timeout.skip_paths,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config)?;
    server.run(listener, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
