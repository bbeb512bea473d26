use std::sync::Arc;

use clawminer_coordinator::clock::SystemClock;
use clawminer_coordinator::config::Config;
use clawminer_coordinator::coordinator::Coordinator;
use clawminer_coordinator::server::ApiServer;
use clawminer_coordinator::store::FileStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    config.validate()?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if config.uses_dev_secret() {
        warn!("COORDINATOR_HMAC_SECRET not set, tokens are signed with the development secret");
    }

    let mut coordinator = Coordinator::new(&config, Arc::new(SystemClock));
    if let Some(path) = &config.state_path {
        info!(path = %path.display(), "recording state to file");
        coordinator = coordinator.with_store(Arc::new(FileStore::open(path.clone())));
    }
    let config_view = coordinator.config_view();
    info!(
        chain_id = config_view.chain_id,
        signer = ?config_view.coordinator_signer,
        mining_contract = ?config_view.mining_contract,
        "coordinator configured"
    );

    let server = Arc::new(ApiServer::new(Arc::new(coordinator), config.metrics_enabled));
    let listener = ApiServer::bind(&config.bind_addr).await?;

    tokio::select! {
        res = server.serve(listener) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
