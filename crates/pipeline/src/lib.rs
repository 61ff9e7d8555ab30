//! MediaWatch Pipeline
//!
//! Event-driven ingestion and analysis stages:
//! list scraping → existence check → content scraping → save,
//! and, on a separate trigger, batch analysis of unanalyzed news.

pub mod analysis;
pub mod consumers;
pub mod context;
pub mod handlers;
pub mod publishers;
pub mod source;
pub mod triggers;

pub use consumers::start_consumers;
pub use context::PipelineContext;
pub use publishers::{Publisher, PublisherRegistry};
pub use triggers::{ensure_shared_broker, run_schedule, trigger_analysis_batch, trigger_list_scraping};

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, starting shutdown..."),
    }
}
