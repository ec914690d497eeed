//! Runtime exporter: configuration, privilege handling and the serve loop.

pub mod config;
pub mod metrics;
pub mod runner;
pub mod server;

pub use config::ServeConfig;

use anyhow::{Context, Result, anyhow};
use log::info;
use std::sync::Arc;

use crate::runtime::Runtime;
use metrics::Metrics;
use runner::CliRunner;
use server::{ExporterServer, ExporterState};

/// Run the exporter until shutdown.
#[tracing::instrument(skip(runtime, config))]
pub async fn serve<R: Runtime + 'static>(runtime: &R, config: ServeConfig) -> Result<()> {
    drop_privileges(runtime, &config.user)?;

    let runner = CliRunner::new(
        config.binary.clone(),
        config.server_id,
        config.run_timeout,
    );
    let state = Arc::new(ExporterState::new(
        Metrics::new(),
        Box::new(runner),
        config.cache_timeout,
    ));

    let server = ExporterServer::bind(config.bind_address()?, state).await?;
    server.run_until_shutdown().await
}

/// The exporter never serves traffic as a privileged account: when started
/// as root, switch to the designated service account before binding.
fn drop_privileges<R: Runtime>(runtime: &R, user: &str) -> Result<()> {
    if !runtime.is_privileged() {
        return Ok(());
    }

    let account = runtime
        .lookup_account(user)?
        .ok_or_else(|| anyhow!("Service account {:?} does not exist", user))?;
    runtime
        .become_account(&account)
        .with_context(|| format!("Failed to drop privileges to {}", user))?;

    info!("Dropped privileges to {}", user);
    Ok(())
}
