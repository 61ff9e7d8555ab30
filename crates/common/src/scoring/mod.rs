//! AI scoring client abstraction
//!
//! Provides a unified interface over content-scoring services:
//! - Gemini (`generateContent` with a reusable primed session)
//! - Mock (deterministic scores for local runs)
//!
//! A scorer returns the raw analytics reply; turning it into persisted
//! analyses is the pipeline's job.

mod extract;
mod gemini;
mod session;

pub use extract::{extract_json_block, parse_analytics};
pub use gemini::{GeminiScorer, PrimedSession, DEFAULT_API_BASE, DEFAULT_PROMPT};
pub use session::SessionCache;

use crate::config::{ScoringConfig, ScoringProvider};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One named sub-score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricScore {
    pub metric_key: String,
    pub score: f64,
    #[serde(default)]
    pub reason: String,
}

/// Aggregate score for one part of an article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub score: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub metric_list: Vec<MetricScore>,
}

/// Scoring result for one article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsAnalytics {
    pub title_analytics: Analytics,
    pub content_analytics: Analytics,
}

/// Trait for article scoring
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score an article's title and body
    async fn analyze(&self, title: &str, content: &str) -> Result<NewsAnalytics>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Mock scorer for local runs and tests
pub struct MockScorer;

impl MockScorer {
    fn analytics(text: &str, keys: &[&str]) -> Analytics {
        let base = (text.chars().count() % 50) as f64 / 10.0 + 5.0;
        Analytics {
            score: base,
            reason: "mock analysis".to_string(),
            metric_list: keys
                .iter()
                .enumerate()
                .map(|(i, key)| MetricScore {
                    metric_key: key.to_string(),
                    score: (base + i as f64 * 0.25).min(10.0),
                    reason: format!("mock {}", key),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Scorer for MockScorer {
    async fn analyze(&self, title: &str, content: &str) -> Result<NewsAnalytics> {
        use crate::db::models::AnalysisKind;

        Ok(NewsAnalytics {
            title_analytics: Self::analytics(title, AnalysisKind::Title.metric_vocabulary()),
            content_analytics: Self::analytics(content, AnalysisKind::Content.metric_vocabulary()),
        })
    }

    fn model_name(&self) -> &str {
        "mock-scorer"
    }
}

/// Create a scorer based on configuration
pub fn create_scorer(config: &ScoringConfig) -> Result<Arc<dyn Scorer>> {
    match config.provider {
        ScoringProvider::Gemini => {
            let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "scoring.api_key is required for the gemini provider".to_string(),
            })?;

            let prompt = match &config.prompt_path {
                Some(path) => std::fs::read_to_string(path).map_err(|e| AppError::Configuration {
                    message: format!("Failed to read prompt {}: {}", path, e),
                })?,
                None => DEFAULT_PROMPT.to_string(),
            };

            Ok(Arc::new(GeminiScorer::new(
                api_key,
                config.model.clone(),
                config.api_base.clone(),
                prompt,
                Duration::from_secs(config.timeout_secs),
                config.session_max_uses,
            )?))
        }
        ScoringProvider::Mock => Ok(Arc::new(MockScorer)),
    }
}
