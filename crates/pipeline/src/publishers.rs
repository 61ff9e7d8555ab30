//! Publisher registry
//!
//! The set of publishers is closed: each one is a `Publisher` variant with
//! its media id, listing endpoint and article URL shape. Enabled publishers
//! are resolved from configuration at startup and an unknown media id fails
//! the process before any consumer starts.

use crate::source::{SitemapAdapter, SourceAdapter};
use mediawatch_common::config::ScraperConfig;
use mediawatch_common::errors::{AppError, Result};
use mediawatch_common::Repository;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Publisher {
    CtiNews,
    Setn,
}

impl Publisher {
    pub const ALL: [Publisher; 2] = [Publisher::CtiNews, Publisher::Setn];

    pub fn from_media_id(media_id: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.media_id() == media_id)
            .ok_or(AppError::UnknownPublisher { media_id })
    }

    pub fn media_id(&self) -> i32 {
        match self {
            Publisher::CtiNews => 1,
            Publisher::Setn => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Publisher::CtiNews => "CtiNews",
            Publisher::Setn => "SETN",
        }
    }

    pub fn home_url(&self) -> &'static str {
        match self {
            Publisher::CtiNews => "https://ctinews.com",
            Publisher::Setn => "https://www.setn.com",
        }
    }

    /// News sitemap listing the current candidate articles
    pub fn listing_url(&self) -> &'static str {
        match self {
            Publisher::CtiNews => "https://ctinews.com/rss/sitemap-news.xml",
            Publisher::Setn => "https://www.setn.com/sitemapGoogleNews.xml",
        }
    }

    pub fn article_url(&self, news_id: &str) -> String {
        match self {
            Publisher::CtiNews => format!("https://ctinews.com/news/items/{}", news_id),
            Publisher::Setn => format!("https://www.setn.com/News.aspx?NewsID={}", news_id),
        }
    }

    /// Pattern whose first capture group is the article id inside a listing URL
    pub fn id_pattern(&self) -> &'static str {
        match self {
            Publisher::CtiNews => r"ctinews\.com/news/items/([A-Za-z0-9_-]+)",
            Publisher::Setn => r"setn\.com/News\.aspx\?NewsID=(\d+)",
        }
    }

    /// Page element holding the body when the structured data omits it
    pub fn body_selector(&self) -> Option<&'static str> {
        match self {
            Publisher::CtiNews => None,
            Publisher::Setn => Some("div#ckuse div#Content1"),
        }
    }
}

impl fmt::Display for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.media_id())
    }
}

/// Enabled publishers with their source adapters
pub struct PublisherRegistry {
    entries: Vec<(Publisher, Arc<dyn SourceAdapter>)>,
}

impl PublisherRegistry {
    /// Build the registry for the configured media ids, using the sitemap adapter
    pub fn from_config(media_ids: &[i32], config: &ScraperConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let mut entries: Vec<(Publisher, Arc<dyn SourceAdapter>)> = Vec::new();
        for media_id in media_ids {
            let publisher = Publisher::from_media_id(*media_id)?;
            let adapter: Arc<dyn SourceAdapter> =
                Arc::new(SitemapAdapter::new(publisher, client.clone())?);
            entries.push((publisher, adapter));
        }

        Self::with_adapters(entries)
    }

    /// Build the registry from explicit adapters
    pub fn with_adapters(entries: Vec<(Publisher, Arc<dyn SourceAdapter>)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(AppError::Configuration {
                message: "no publishers enabled".to_string(),
            });
        }

        for (i, (publisher, _)) in entries.iter().enumerate() {
            if entries[..i].iter().any(|(p, _)| p == publisher) {
                return Err(AppError::Configuration {
                    message: format!("publisher {} enabled twice", publisher),
                });
            }
        }

        Ok(Self { entries })
    }

    pub fn publishers(&self) -> impl Iterator<Item = Publisher> + '_ {
        self.entries.iter().map(|(p, _)| *p)
    }

    pub fn media_ids(&self) -> Vec<i32> {
        self.publishers().map(|p| p.media_id()).collect()
    }

    /// Adapter of an enabled publisher
    pub fn adapter(&self, media_id: i32) -> Result<Arc<dyn SourceAdapter>> {
        self.entries
            .iter()
            .find(|(p, _)| p.media_id() == media_id)
            .map(|(_, adapter)| adapter.clone())
            .ok_or(AppError::UnknownPublisher { media_id })
    }

    /// Fail with `UnknownPublisher` unless `media_id` is enabled
    pub fn ensure_enabled(&self, media_id: i32) -> Result<Publisher> {
        self.publishers()
            .find(|p| p.media_id() == media_id)
            .ok_or(AppError::UnknownPublisher { media_id })
    }

    /// Insert the media reference row of every enabled publisher
    pub async fn seed_media(&self, repository: &Repository) -> Result<()> {
        for publisher in self.publishers() {
            repository
                .media()
                .ensure(publisher.media_id(), publisher.name(), publisher.home_url())
                .await?;
            info!(publisher = %publisher, "Media row ready");
        }
        Ok(())
    }
}
