//! Application orchestrator: wires the agent components together.

use courier_archive::Archiver;
use courier_pipeline::{Pipeline, wait_for_signal};
use courier_transfer::UploadClient;

use crate::config::Config;

/// Runs the agent until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let client = UploadClient::new(config.client_config())?;
    tracing::info!(endpoint = client.endpoint(), "using upload endpoint");

    let archiver = Archiver::new(&config.directories.archive_dir);
    let pipeline = Pipeline::new(config.pipeline_config(), client, archiver);
    let cancel = pipeline.cancel_token();

    let handle = pipeline.start();
    tracing::info!("agent ready");

    wait_for_signal(cancel).await;

    tracing::info!("stopping services...");
    let stats = handle.stats();
    if !handle.shutdown(config.shutdown_grace()).await {
        tracing::warn!("some uploads did not finish before shutdown");
    }

    tracing::info!(summary = %stats.snapshot(), "transfer totals");
    Ok(())
}
