//! Analysis stage: score unanalyzed rows and persist the batch
//!
//! A row whose scoring or normalization fails is skipped; the rest of the
//! batch still proceeds. Persistence is a single transaction, so a failure
//! there fails the whole delivery.

use crate::analysis::normalize;
use crate::context::PipelineContext;
use async_trait::async_trait;
use mediawatch_common::errors::Result;
use mediawatch_common::events::AnalysisGetEvent;
use mediawatch_common::metrics;
use mediawatch_common::queue::{Delivery, MessageHandler};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of one batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub selected: usize,
    pub scored: usize,
    pub skipped: usize,
    pub persisted: usize,
}

pub struct AnalysisBatchHandler {
    ctx: Arc<PipelineContext>,
}

impl AnalysisBatchHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, event), fields(analysis_count = event.analysis_count))]
    pub async fn run_batch(&self, event: AnalysisGetEvent) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        if event.analysis_count == 0 {
            return Ok(report);
        }

        let rows = self
            .ctx
            .repository
            .news()
            .find_unanalyzed(u64::from(event.analysis_count))
            .await?;
        report.selected = rows.len();

        if rows.is_empty() {
            debug!("No unanalyzed news");
            return Ok(report);
        }

        let mut drafts = Vec::with_capacity(rows.len() * 2);
        for news in &rows {
            let scored = match self.ctx.scorer.analyze(&news.title, &news.content).await {
                Ok(analytics) => normalize(news, &analytics),
                Err(e) => Err(e),
            };

            match scored {
                Ok(row_drafts) => {
                    report.scored += 1;
                    drafts.extend(row_drafts);
                }
                Err(e) => {
                    report.skipped += 1;
                    warn!(
                        news_id = %news.news_id,
                        media_id = news.media_id,
                        error = %e,
                        code = e.code().as_code(),
                        "Scoring failed, row skipped"
                    );
                }
            }
        }

        report.persisted = self.ctx.repository.save_analysis_batch(&drafts).await?;
        metrics::record_analyses_persisted(report.persisted);

        info!(
            selected = report.selected,
            scored = report.scored,
            skipped = report.skipped,
            persisted = report.persisted,
            model = %self.ctx.scorer.model_name(),
            "Analysis batch complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl MessageHandler for AnalysisBatchHandler {
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        let event: AnalysisGetEvent = delivery.decode()?;
        self.run_batch(event).await.map(|_| ())
    }
}
