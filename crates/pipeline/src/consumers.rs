//! Consumer wiring
//!
//! Binds every stage handler to its subscription. The list-scraping topic
//! gets one subscription per enabled publisher; every other topic has a
//! single shared subscription.

use crate::context::PipelineContext;
use crate::handlers::{
    AnalysisBatchHandler, CheckExistenceHandler, ContentScrapingHandler, ListScrapingHandler,
    SaveNewsHandler,
};
use mediawatch_common::errors::Result;
use mediawatch_common::queue::{MessageHandler, SubscriptionId};
use mediawatch_common::Topic;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Start all consumers; they stop when `shutdown` is cancelled
pub async fn start_consumers(
    ctx: Arc<PipelineContext>,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>> {
    let env = ctx.env().to_string();
    let mut bindings: Vec<(Topic, SubscriptionId, Arc<dyn MessageHandler>)> = Vec::new();

    for publisher in ctx.registry.publishers() {
        bindings.push((
            Topic::ArticleListScraping,
            SubscriptionId::for_publisher(Topic::ArticleListScraping, &env, publisher.media_id()),
            Arc::new(ListScrapingHandler::new(ctx.clone(), publisher)),
        ));
    }

    let shared: [(Topic, Arc<dyn MessageHandler>); 4] = [
        (Topic::NewsCheck, Arc::new(CheckExistenceHandler::new(ctx.clone()))),
        (Topic::ArticleContentScraping, Arc::new(ContentScrapingHandler::new(ctx.clone()))),
        (Topic::NewsSave, Arc::new(SaveNewsHandler::new(ctx.clone()))),
        (Topic::AnalysisGet, Arc::new(AnalysisBatchHandler::new(ctx.clone()))),
    ];
    for (topic, handler) in shared {
        bindings.push((topic, SubscriptionId::shared(topic, &env), handler));
    }

    let mut handles = Vec::with_capacity(bindings.len());
    for (topic, subscription, handler) in bindings {
        handles.push(
            ctx.broker
                .subscribe(topic, subscription, handler, shutdown.clone())
                .await?,
        );
    }

    info!(consumers = handles.len(), "Consumers started");
    Ok(handles)
}
