//! Analysis normalization
//!
//! Turns one scorer reply into the two persisted analyses of a news row.
//! Scores run from 0 to 10 and are rounded half away from zero to two
//! decimal places. Metric keys are lower-cased
//! and trimmed; keys outside the analysis type's vocabulary are dropped, and
//! a key repeated within one analysis keeps its first occurrence.

use mediawatch_common::db::models::{AnalysisKind, News};
use mediawatch_common::db::{AnalysisDraft, MetricDraft};
use mediawatch_common::errors::{AppError, Result};
use mediawatch_common::scoring::{Analytics, NewsAnalytics};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashSet;
use tracing::warn;

/// Highest score accepted from the scorer
const MAX_SCORE: f64 = 10.0;

/// Title and content analyses for one news row
pub fn normalize(news: &News, analytics: &NewsAnalytics) -> Result<Vec<AnalysisDraft>> {
    Ok(vec![
        draft(news, AnalysisKind::Title, &analytics.title_analytics)?,
        draft(news, AnalysisKind::Content, &analytics.content_analytics)?,
    ])
}

fn draft(news: &News, kind: AnalysisKind, analytics: &Analytics) -> Result<AnalysisDraft> {
    let vocabulary = kind.metric_vocabulary();
    let mut seen = HashSet::new();
    let mut metrics = Vec::with_capacity(vocabulary.len());

    for metric in &analytics.metric_list {
        let key = metric.metric_key.trim().to_lowercase();

        if !vocabulary.contains(&key.as_str()) {
            warn!(
                news_id = %news.news_id,
                kind = kind.as_str(),
                metric_key = %metric.metric_key,
                "Dropping metric outside vocabulary"
            );
            continue;
        }
        if !seen.insert(key.clone()) {
            warn!(news_id = %news.news_id, kind = kind.as_str(), metric_key = %key, "Dropping repeated metric");
            continue;
        }

        metrics.push(MetricDraft {
            score: to_score(metric.score, &key)?,
            key,
            reason: metric.reason.trim().to_string(),
        });
    }

    Ok(AnalysisDraft {
        news_id: news.news_id.clone(),
        media_id: news.media_id,
        kind,
        score: to_score(analytics.score, kind.as_str())?,
        reason: analytics.reason.trim().to_string(),
        metrics,
    })
}

fn to_score(value: f64, field: &str) -> Result<Decimal> {
    if !value.is_finite() || !(0.0..=MAX_SCORE).contains(&value) {
        return Err(AppError::malformed_response(format!(
            "score {} for {} is out of range",
            value, field
        )));
    }

    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .ok_or_else(|| AppError::malformed_response(format!("score {} for {} is not a decimal", value, field)))
}
