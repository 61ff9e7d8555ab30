//! Sitemap + structured-data adapter
//!
//! Ids come from the `<loc>` entries of the publisher's news sitemap. An
//! article is read from the `NewsArticle` object in the page's
//! `application/ld+json` script, with an optional page selector as the body
//! fallback.

use super::{ScrapedArticle, SourceAdapter};
use crate::publishers::Publisher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediawatch_common::errors::{AppError, Result};
use regex_lite::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

const LD_JSON_SELECTOR: &str = "script[type='application/ld+json']";

pub struct SitemapAdapter {
    publisher: Publisher,
    client: reqwest::Client,
    loc: Regex,
    id_pattern: Regex,
}

impl SitemapAdapter {
    pub fn new(publisher: Publisher, client: reqwest::Client) -> Result<Self> {
        Ok(Self {
            publisher,
            client,
            loc: compile(r"(?s)<loc>(.*?)</loc>")?,
            id_pattern: compile(publisher.id_pattern())?,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(|e| AppError::Scraping {
            message: format!("GET {} failed: {}", url, e),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Scraping {
                message: format!("GET {} returned {}", url, status),
            });
        }

        response.text().await.map_err(|e| AppError::Scraping {
            message: format!("Failed to read body of {}: {}", url, e),
        })
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Configuration {
        message: format!("Invalid pattern {}: {}", pattern, e),
    })
}

#[async_trait]
impl SourceAdapter for SitemapAdapter {
    #[instrument(skip(self), fields(publisher = %self.publisher))]
    async fn fetch_id_list(&self) -> Result<Vec<String>> {
        let xml = self.get_text(self.publisher.listing_url()).await?;
        let ids = extract_ids(&xml, &self.loc, &self.id_pattern);

        if ids.is_empty() {
            warn!(bytes = xml.len(), "Listing contained no article ids");
        } else {
            debug!(count = ids.len(), "Listing fetched");
        }
        Ok(ids)
    }

    #[instrument(skip(self), fields(publisher = %self.publisher))]
    async fn fetch_article(&self, news_id: &str) -> Result<ScrapedArticle> {
        let url = self.publisher.article_url(news_id);
        let html = self.get_text(&url).await?;
        parse_article(&html, self.publisher, news_id)
    }
}

/// Article ids from every `<loc>` matching `id_pattern`, deduplicated in order
pub fn extract_ids(xml: &str, loc: &Regex, id_pattern: &Regex) -> Vec<String> {
    let mut seen = HashSet::new();

    loc.captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|m| clean_loc(m.as_str()))
        .filter_map(|url| {
            id_pattern
                .captures(&url)
                .and_then(|caps| caps.get(1))
                .map(|id| id.as_str().to_string())
        })
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn clean_loc(raw: &str) -> String {
    let trimmed = raw.trim();
    let unwrapped = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(trimmed);
    unwrapped.trim().replace("&amp;", "&")
}

/// Read the article out of a fetched page
pub fn parse_article(html: &str, publisher: Publisher, news_id: &str) -> Result<ScrapedArticle> {
    let document = Html::parse_document(html);
    let scripts = selector(LD_JSON_SELECTOR)?;

    let article = document
        .select(&scripts)
        .filter_map(|script| {
            let text = script.text().collect::<String>();
            serde_json::from_str::<Value>(text.trim()).ok()
        })
        .find_map(|value| find_news_article(&value).cloned())
        .ok_or_else(|| AppError::Scraping {
            message: format!("{} article {}: no NewsArticle structured data", publisher, news_id),
        })?;

    let title = first_text(article.get("headline"))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Scraping {
            message: format!("{} article {}: missing headline", publisher, news_id),
        })?;

    let mut content = first_text(article.get("articleBody")).unwrap_or_default();
    if content.is_empty() {
        if let Some(css) = publisher.body_selector() {
            let body = selector(css)?;
            content = document
                .select(&body)
                .map(|el| el.text().collect::<String>())
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
        }
    }
    if content.is_empty() {
        return Err(AppError::Scraping {
            message: format!("{} article {}: empty body", publisher, news_id),
        });
    }

    let published_at = first_text(article.get("datePublished"))
        .and_then(|raw| parse_timestamp(&raw))
        .ok_or_else(|| AppError::Scraping {
            message: format!("{} article {}: missing or invalid datePublished", publisher, news_id),
        })?;

    Ok(ScrapedArticle {
        title,
        content,
        author_name: author_name(article.get("author")),
        published_at,
        category: first_text(article.get("articleSection")).unwrap_or_default(),
        url: first_text(article.get("url"))
            .filter(|u| u.starts_with("http"))
            .unwrap_or_else(|| publisher.article_url(news_id)),
    })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::Internal {
        message: format!("Invalid selector {}: {}", css, e),
    })
}

fn find_news_article(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_news_article),
        Value::Object(map) => {
            let is_article = match map.get("@type") {
                Some(Value::String(t)) => t == "NewsArticle",
                Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("NewsArticle")),
                _ => false,
            };
            if is_article {
                Some(value)
            } else {
                map.get("@graph").and_then(find_news_article)
            }
        }
        _ => None,
    }
}

/// A string field, or the first string of an array field, trimmed
fn first_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str()).map(|s| s.trim().to_string()),
        _ => None,
    }
}

fn author_name(value: Option<&Value>) -> String {
    match value {
        Some(Value::Object(map)) => first_text(map.get("name")).unwrap_or_default(),
        Some(Value::Array(items)) => items
            .first()
            .map(|first| author_name(Some(first)))
            .unwrap_or_default(),
        Some(Value::String(name)) => name.trim().to_string(),
        _ => String::new(),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
