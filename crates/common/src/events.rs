//! Event payloads carried between pipeline stages
//!
//! Every payload is a flat JSON object with snake_case fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trigger for the list-scraping stage; every publisher receives a copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleListScrapingEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<DateTime<Utc>>,
}

/// Candidate article ids for one publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsCheckEvent {
    pub media_id: i32,
    pub news_id_list: Vec<String>,
}

/// One article to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleContentScrapingEvent {
    pub media_id: i32,
    pub news_id: String,
}

/// Fully fetched article awaiting persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsSaveEvent {
    pub media_id: i32,
    pub news_id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    #[serde(default)]
    pub author_name: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub category: String,
}

/// Trigger for the analysis-batch stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisGetEvent {
    pub analysis_count: u32,
}
