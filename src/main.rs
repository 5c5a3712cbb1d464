use anyhow::Context;
use cerberus::config::ProxyConfig;
use cerberus::directory::MemoryDirectory;
use cerberus::proxy::ProxyServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config =
        ProxyConfig::load(config_path.as_deref()).context("loading configuration")?;

    let directory = match &config.directory_file {
        Some(path) => MemoryDirectory::from_file(path).context("loading client directory")?,
        None => {
            warn!("no directory_file configured; starting with an empty client directory");
            MemoryDirectory::new()
        }
    };
    info!(clients = directory.len(), version = cerberus::VERSION, "starting proxy");

    ProxyServer::new(config, Arc::new(directory)).serve().await?;
    Ok(())
}
