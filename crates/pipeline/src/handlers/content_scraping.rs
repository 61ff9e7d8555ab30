//! Content-scraping stage: fetch one article and hand it to the save stage

use crate::context::PipelineContext;
use async_trait::async_trait;
use mediawatch_common::errors::Result;
use mediawatch_common::events::{ArticleContentScrapingEvent, NewsSaveEvent};
use mediawatch_common::queue::{Delivery, MessageHandler};
use mediawatch_common::{BrokerExt, Topic};
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct ContentScrapingHandler {
    ctx: Arc<PipelineContext>,
}

impl ContentScrapingHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, event), fields(media_id = event.media_id, news_id = %event.news_id))]
    pub async fn scrape(&self, event: ArticleContentScrapingEvent) -> Result<()> {
        let adapter = self.ctx.registry.adapter(event.media_id)?;
        let article = adapter.fetch_article(&event.news_id).await?;

        let save = NewsSaveEvent {
            media_id: event.media_id,
            news_id: event.news_id,
            title: article.title,
            content: article.content,
            url: article.url,
            author_name: article.author_name,
            published_at: article.published_at,
            category: article.category,
        };

        self.ctx.broker.publish(Topic::NewsSave, &save).await?;

        debug!("Article fetched and queued for saving");
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for ContentScrapingHandler {
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        let event: ArticleContentScrapingEvent = delivery.decode()?;
        self.scrape(event).await
    }
}
