use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use distri_gateway::config::{ConfigManager, GatewayConfig};
use distri_gateway::monitoring::{install_prometheus_exporter, MetricsSink};
use distri_gateway::proxy::GatewayServer;
use distri_gateway::Gateway;

#[derive(Parser)]
#[command(name = "distri-gateway")]
#[command(about = "API gateway for the DistriSchool microservices")]
struct Args {
    #[arg(short, long, default_value = "config/gateway.toml")]
    config: String,

    /// Overrides `server.bind` from the configuration file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    #[arg(short, long)]
    verbose: bool,

    /// Disable configuration hot reload
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("distri_gateway={},hyper=warn", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting distri-gateway");

    let config = GatewayConfig::from_file_with_env(&args.config).await?;
    let bind = args.bind.unwrap_or(config.server.bind);

    if let Some(metrics_bind) = config.monitoring.metrics_bind {
        install_prometheus_exporter(metrics_bind)?;
    }

    let gateway = Arc::new(
        Gateway::new(&config, Arc::new(MetricsSink)).context("invalid gateway configuration")?,
    );

    let mut config_manager = ConfigManager::new(&args.config, Arc::clone(&gateway));
    if !args.no_watch {
        if let Err(e) = config_manager.start_hot_reload().await {
            warn!("Config hot reload disabled: {}", e);
        }
    }

    // Bind failure is fatal
    let server = GatewayServer::bind(gateway, bind).context("failed to start gateway listener")?;

    let shutdown_signal = async {
        match signal::ctrl_c().await {
            Ok(()) => warn!("Received CTRL+C, shutting down gracefully..."),
            Err(e) => {
                error!("Failed to listen for CTRL+C: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    server.run_until(shutdown_signal).await?;

    info!("distri-gateway shutdown complete");
    Ok(())
}
