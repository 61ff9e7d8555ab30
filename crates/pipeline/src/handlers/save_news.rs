//! Save stage: author get-or-create and news insert in one transaction

use crate::context::PipelineContext;
use async_trait::async_trait;
use mediawatch_common::db::{NewArticle, SaveOutcome};
use mediawatch_common::errors::Result;
use mediawatch_common::events::NewsSaveEvent;
use mediawatch_common::metrics;
use mediawatch_common::queue::{Delivery, MessageHandler};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct SaveNewsHandler {
    ctx: Arc<PipelineContext>,
}

impl SaveNewsHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, event), fields(media_id = event.media_id, news_id = %event.news_id))]
    pub async fn save(&self, event: NewsSaveEvent) -> Result<SaveOutcome> {
        self.ctx.registry.ensure_enabled(event.media_id)?;

        let article = NewArticle {
            media_id: event.media_id,
            news_id: event.news_id,
            title: event.title,
            content: event.content,
            url: event.url,
            author_name: event.author_name,
            category: event.category,
            published_at: event.published_at,
        };

        let outcome = self
            .ctx
            .repository
            .save_article(&article, self.ctx.save_timeout())
            .await?;

        metrics::record_article_saved(article.media_id, outcome.inserted);
        if outcome.inserted {
            info!(author_id = %outcome.author_id, "Article saved");
        } else {
            info!(author_id = %outcome.author_id, "Article already stored");
        }

        Ok(outcome)
    }
}

#[async_trait]
impl MessageHandler for SaveNewsHandler {
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        let event: NewsSaveEvent = delivery.decode()?;
        self.save(event).await.map(|_| ())
    }
}
