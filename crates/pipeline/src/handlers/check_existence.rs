//! Existence-check stage: diff candidates against the datastore and fan out

use crate::context::PipelineContext;
use async_trait::async_trait;
use mediawatch_common::errors::Result;
use mediawatch_common::events::{ArticleContentScrapingEvent, NewsCheckEvent};
use mediawatch_common::metrics;
use mediawatch_common::queue::{Delivery, MessageHandler};
use mediawatch_common::{BrokerExt, Topic};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct CheckExistenceHandler {
    ctx: Arc<PipelineContext>,
}

impl CheckExistenceHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Publish one content-scraping event per id not yet stored.
    ///
    /// Returns the number of events published. A failed publish is logged
    /// and the remaining ids are still attempted.
    #[instrument(skip(self, event), fields(media_id = event.media_id, requested = event.news_id_list.len()))]
    pub async fn check(&self, event: NewsCheckEvent) -> Result<usize> {
        self.ctx.registry.ensure_enabled(event.media_id)?;

        let missing = self
            .ctx
            .repository
            .find_missing_news_ids(event.media_id, &event.news_id_list)
            .await?;

        if missing.is_empty() {
            debug!("All candidate ids already stored");
            return Ok(0);
        }

        let mut published = 0;
        for news_id in missing {
            let fetch = ArticleContentScrapingEvent {
                media_id: event.media_id,
                news_id,
            };

            match self.ctx.broker.publish(Topic::ArticleContentScraping, &fetch).await {
                Ok(_) => published += 1,
                Err(e) => {
                    metrics::record_fanout_failure(Topic::ArticleContentScraping);
                    warn!(news_id = %fetch.news_id, error = %e, "Failed to publish content-scraping event");
                }
            }
        }

        info!(published, "Content scraping requested for missing ids");
        Ok(published)
    }
}

#[async_trait]
impl MessageHandler for CheckExistenceHandler {
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        let event: NewsCheckEvent = delivery.decode()?;
        self.check(event).await.map(|_| ())
    }
}
