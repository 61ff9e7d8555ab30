//! Scheduler entry points
//!
//! The two triggers can be fired by the standalone `scheduler` binary over a
//! shared broker, or by the worker itself when the broker is in-process.

use chrono::Utc;
use mediawatch_common::config::{BrokerConfig, BrokerProvider, PipelineConfig};
use mediawatch_common::errors::{AppError, Result};
use mediawatch_common::events::{AnalysisGetEvent, ArticleListScrapingEvent};
use mediawatch_common::{Broker, BrokerExt, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Ask every publisher's list-scraping consumer for a fresh listing
pub async fn trigger_list_scraping(broker: &dyn Broker) -> Result<String> {
    let event = ArticleListScrapingEvent {
        triggered_at: Some(Utc::now()),
    };
    let message_id = broker.publish(Topic::ArticleListScraping, &event).await?;

    info!(message_id = %message_id, "List scraping triggered");
    Ok(message_id)
}

/// Ask the analysis consumer to score up to `analysis_count` rows
pub async fn trigger_analysis_batch(broker: &dyn Broker, analysis_count: u32) -> Result<String> {
    let message_id = broker
        .publish(Topic::AnalysisGet, &AnalysisGetEvent { analysis_count })
        .await?;

    info!(message_id = %message_id, analysis_count, "Analysis batch triggered");
    Ok(message_id)
}

/// Fail unless the broker is reachable from other processes
pub fn ensure_shared_broker(config: &BrokerConfig) -> Result<()> {
    match config.provider {
        BrokerProvider::Sqs => Ok(()),
        BrokerProvider::Memory => Err(AppError::Configuration {
            message: "a standalone scheduler needs broker.provider = \"sqs\"; \
                      the in-memory broker is scheduled by pipeline-worker"
                .to_string(),
        }),
    }
}

/// Fire both triggers on their configured intervals until `shutdown` is cancelled.
///
/// Both fire once immediately. A failed publish is logged and retried on the
/// next tick.
pub async fn run_schedule(broker: Arc<dyn Broker>, config: PipelineConfig, shutdown: CancellationToken) {
    let mut list_tick = interval(Duration::from_secs(config.list_scraping_interval_secs.max(1)));
    let mut analysis_tick = interval(Duration::from_secs(config.analysis_interval_secs.max(1)));
    list_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    analysis_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        list_interval_secs = config.list_scraping_interval_secs,
        analysis_interval_secs = config.analysis_interval_secs,
        batch_size = config.analysis_batch_size,
        "Schedule started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = list_tick.tick() => {
                if let Err(e) = trigger_list_scraping(broker.as_ref()).await {
                    error!(error = %e, "Failed to trigger list scraping");
                }
            }
            _ = analysis_tick.tick() => {
                if let Err(e) = trigger_analysis_batch(broker.as_ref(), config.analysis_batch_size).await {
                    error!(error = %e, "Failed to trigger analysis batch");
                }
            }
        }
    }

    info!("Schedule stopped");
}
