//! rhizomed — the bundle payload fetch daemon.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use rhizome_core::config::RhizomeConfig;
use rhizomed::glue;
use rhizomed::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing — RUST_LOG controls verbosity
    // e.g. RUST_LOG=debug cargo run -p rhizomed
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RhizomeConfig::load()?;
    tracing::info!(
        scratch_dir = %config.scheduler.scratch_dir.display(),
        tiers = config.scheduler.tiers.len(),
        "rhizomed starting"
    );

    std::fs::create_dir_all(&config.scheduler.scratch_dir)?;
    let data_dir = config
        .scheduler
        .scratch_dir
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| config.scheduler.scratch_dir.clone());

    let store = Arc::new(glue::FsManifestStore::new(data_dir.clone()));
    let verifier = Arc::new(glue::TrustingVerifier);
    let importer = Arc::new(glue::FsBundleImporter::new(data_dir));
    let sink = Arc::new(glue::LoggingDatagramSink);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = Scheduler::spawn(config, store, verifier, importer, sink, shutdown_rx);

    tokio::signal::ctrl_c().await?;
    tracing::info!("ctrl-c received, shutting down");

    let _ = shutdown_tx.send(());
    if let Some(snapshot) = scheduler.snapshot().await {
        tracing::info!(
            tiers = snapshot.tier_count,
            queued = ?snapshot.queued_per_tier,
            active = ?snapshot.active_per_tier,
            "final scheduler state"
        );
    }

    Ok(())
}
