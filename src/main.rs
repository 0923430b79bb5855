//! Fleet runtime server entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use fleet::config::{ApprovalWaitSecs, FleetConfig};
use fleet::{Collaborators, Router};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("fleet=info".parse()?),
        )
        .init();

    info!("starting fleet runtime server");

    let config = load_config()?;
    info!(data_dir = %config.data_dir.display(), port = config.port, "configuration loaded");

    let collaborators = Collaborators {
        model: Arc::new(fleet::collaborators::NullModelClient),
        vector: Arc::new(fleet::collaborators::NullVectorStore),
        workflow: Arc::new(fleet::collaborators::NullWorkflowDispatcher),
        bus: Arc::new(fleet::collaborators::NullMessageBus),
        approval: Arc::new(fleet::collaborators::AutoApproveHook::new(config.approval_wait_secs)),
    };

    std::fs::create_dir_all(&config.data_dir)?;
    let port = config.port;
    let router = Router::new(config, collaborators);
    let app = fleet::server::create_router(router);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = fleet::server::bind(addr).await?;
    info!(%addr, "fleet runtime listening");

    fleet::server::serve(listener, app).await?;

    info!("fleet runtime shutting down");
    Ok(())
}

fn load_config() -> Result<FleetConfig> {
    let mut config = FleetConfig::default();

    if let Ok(raw) = std::env::var("FLEET_DATA_DIR") {
        config.data_dir = PathBuf::from(raw);
    }
    if let Ok(raw) = std::env::var("FLEET_PORT") {
        config.port = raw.parse()?;
    }
    if let Ok(raw) = std::env::var("FLEET_APPROVAL_WAIT_SECS") {
        config.approval_wait_secs = ApprovalWaitSecs::try_new(raw.parse()?)
            .map_err(|e| anyhow::anyhow!("FLEET_APPROVAL_WAIT_SECS: {e}"))?;
    }

    Ok(config)
}
