//! MediaWatch Scheduler
//!
//! Fires the two pipeline triggers on their configured cadence:
//! list scraping for every publisher, and an analysis batch.
//!
//! Only useful over a shared broker. With the in-memory broker the worker
//! schedules its own triggers and this binary refuses to start.

use mediawatch_common::{config::AppConfig, queue::create_broker, telemetry, VERSION};
use mediawatch_pipeline::{ensure_shared_broker, run_schedule, shutdown_signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    telemetry::init_tracing(&config.observability)?;

    ensure_shared_broker(&config.broker)?;

    info!(env = %config.app.env, "Starting MediaWatch scheduler v{}", VERSION);

    let broker = create_broker(&config).await?;

    let shutdown = CancellationToken::new();
    let schedule = tokio::spawn(run_schedule(broker, config.pipeline.clone(), shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();
    schedule.await?;

    info!("Scheduler shutdown complete");
    Ok(())
}
