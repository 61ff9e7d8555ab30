//! Source adapters
//!
//! A source adapter knows how to list a publisher's current article ids and
//! how to fetch one article. Stage handlers only see this trait.

mod sitemap;

pub use sitemap::{extract_ids, parse_article, SitemapAdapter};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediawatch_common::errors::Result;

/// Article as read from the publisher's page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedArticle {
    pub title: String,
    pub content: String,
    pub author_name: String,
    pub published_at: DateTime<Utc>,
    pub category: String,
    pub url: String,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Current candidate article ids, in listing order without duplicates
    async fn fetch_id_list(&self) -> Result<Vec<String>>;

    /// Fetch one article by the publisher's id
    async fn fetch_article(&self, news_id: &str) -> Result<ScrapedArticle>;
}
