//! pxp Provider
//!
//! Connectivity check for the provider core: loads `PM_*` settings, logs in
//! to the Proxmox VE API, and reports the next free VM id without allocating
//! it.

use anyhow::{Context, Result};
use pxp_provider::{ProviderConfig, Session};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = ProviderConfig::from_env().context("Failed to load provider configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        api_url = %config.api_url,
        user = %config.user,
        parallel = config.parallel.get(),
        "Starting pxp provider"
    );

    let session = Session::configure(&config)
        .await
        .context("Failed to configure provider session")?;

    let next_free = session
        .api()
        .next_free_id(0)
        .await
        .context("Failed to query next free VM id")?;

    info!(
        next_free_id = %next_free,
        max_concurrent = session.gate().max_concurrent(),
        "Provider session ready"
    );

    Ok(())
}
