//! List-scraping stage: one consumer per publisher

use crate::context::PipelineContext;
use crate::publishers::Publisher;
use async_trait::async_trait;
use mediawatch_common::errors::Result;
use mediawatch_common::events::{ArticleListScrapingEvent, NewsCheckEvent};
use mediawatch_common::queue::{Delivery, MessageHandler};
use mediawatch_common::{BrokerExt, Topic};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct ListScrapingHandler {
    ctx: Arc<PipelineContext>,
    publisher: Publisher,
}

impl ListScrapingHandler {
    pub fn new(ctx: Arc<PipelineContext>, publisher: Publisher) -> Self {
        Self { ctx, publisher }
    }

    /// Fetch the candidate ids and publish them as one existence check.
    ///
    /// Nothing is published when the listing fetch fails.
    #[instrument(skip(self), fields(media_id = self.publisher.media_id()))]
    pub async fn scrape_list(&self) -> Result<()> {
        let media_id = self.publisher.media_id();
        let adapter = self.ctx.registry.adapter(media_id)?;

        let news_id_list = adapter.fetch_id_list().await?;
        let count = news_id_list.len();

        self.ctx
            .broker
            .publish(Topic::NewsCheck, &NewsCheckEvent { media_id, news_id_list })
            .await?;

        info!(count, "Candidate ids published for existence check");
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for ListScrapingHandler {
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        let _trigger: ArticleListScrapingEvent = delivery.decode()?;
        self.scrape_list().await
    }
}
