use anyhow::Result;
use clap::Parser;
use pve_exporter::{
    client::PveClient, config::Settings, metrics::MetricsCollector, selfupdate,
    server::start_server,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const COMMIT: &str = match option_env!("GIT_COMMIT") {
    Some(commit) => commit,
    None => "none",
};
const BUILD_DATE: &str = match option_env!("BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};

/// Prometheus metrics exporter for Proxmox VE clusters
#[derive(Parser, Debug)]
#[command(author, about, long_about = None, disable_version_flag = true)]
struct Args {
    /// Path to YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Print version and exit
    #[arg(long)]
    version: bool,

    /// Update to the latest release and restart
    #[arg(long)]
    selfupdate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        println!("pve-exporter version={VERSION} commit={COMMIT} date={BUILD_DATE}");
        return Ok(());
    }

    init_logging();

    if args.selfupdate {
        selfupdate::self_update(VERSION).await?;
        return Ok(());
    }

    info!("Starting pve-exporter version={VERSION} commit={COMMIT} date={BUILD_DATE}");

    let settings = Settings::load(args.config.as_deref())?;
    info!(
        "Connecting to Proxmox at {}:{}",
        settings.proxmox.host, settings.proxmox.port
    );

    let client = Arc::new(PveClient::new(settings.proxmox.clone())?);
    let metrics = Arc::new(MetricsCollector::new(client, settings.smart.clone())?);

    info!("Metrics available at {}", settings.server.metrics_path);

    start_server(
        &settings.server.bind_address(),
        &settings.server.metrics_path,
        VERSION,
        metrics,
    )
    .await?;

    info!("Exporter stopped");
    Ok(())
}

/// Initialize structured logging with tracing.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
