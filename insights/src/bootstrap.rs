//! Executable startup: args, config, tracing, metrics.

use clap::Parser;
use common::config::Config;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::error::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "target/debug/config/total_config.yaml")]
    pub config: String,
}

pub fn initialize_executable() -> Result<Config, Box<dyn Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    Ok(config)
}

/// RUST_LOG wins over the configured level when set.
pub fn initialize_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();
}

/// Install the Prometheus recorder with its default scrape listener.
/// A failure here (port taken, recorder already set) only costs metrics,
/// so it is logged rather than fatal.
pub fn initialize_metrics() {
    if let Err(e) = PrometheusBuilder::new().install() {
        tracing::warn!(error = %e, "metrics exporter not installed");
    }
}
