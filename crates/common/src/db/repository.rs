//! Repository pattern for database operations
//!
//! `Repository` owns the pool and exposes the multi-statement operations
//! (transactional save, batch persistence). The per-table repositories are
//! cheap views borrowed over any `ConnectionTrait`, so the same query code runs
//! against the pool or against a `DatabaseTransaction` without rebinding
//! shared state.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Article ready to be persisted by the save stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArticle {
    pub media_id: i32,
    pub news_id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub author_name: String,
    pub category: String,
    pub published_at: DateTime<Utc>,
}

/// Result of a save-stage transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub author_id: Uuid,
    /// False when the (news_id, media_id) row already existed
    pub inserted: bool,
}

/// Normalized analysis ready for persistence
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisDraft {
    pub news_id: String,
    pub media_id: i32,
    pub kind: AnalysisKind,
    pub score: Decimal,
    pub reason: String,
    pub metrics: Vec<MetricDraft>,
}

/// One named sub-metric of an analysis
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDraft {
    pub key: String,
    pub score: Decimal,
    pub reason: String,
}

/// Persisted analysis loaded together with its metrics
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisWithMetrics {
    pub analysis: Analysis,
    pub metrics: Vec<AnalysisMetric>,
}

/// Author name stored when the source has none
const UNKNOWN_AUTHOR: &str = "unknown";

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.connection()
    }

    // ========================================================================
    // Scoped Views
    // ========================================================================

    pub fn media(&self) -> MediaRepository<'_, DatabaseConnection> {
        MediaRepository::new(self.conn())
    }

    pub fn authors(&self) -> AuthorRepository<'_, DatabaseConnection> {
        AuthorRepository::new(self.conn())
    }

    pub fn news(&self) -> NewsRepository<'_, DatabaseConnection> {
        NewsRepository::new(self.conn())
    }

    pub fn analyses(&self) -> AnalysisRepository<'_, DatabaseConnection> {
        AnalysisRepository::new(self.conn())
    }

    // ========================================================================
    // Dedup
    // ========================================================================

    /// Ids from `requested` that have no News row for `media_id`.
    ///
    /// Order of `requested` is preserved and duplicates within it are
    /// collapsed to their first occurrence. Always read from the datastore;
    /// nothing is cached between calls.
    #[instrument(skip(self, requested), fields(requested = requested.len()))]
    pub async fn find_missing_news_ids(&self, media_id: i32, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let existing: HashSet<String> = self
            .news()
            .find_existing_ids(media_id, requested)
            .await?
            .into_iter()
            .collect();

        let mut seen = HashSet::with_capacity(requested.len());
        let missing: Vec<String> = requested
            .iter()
            .filter(|id| !existing.contains(*id) && seen.insert(id.as_str()))
            .cloned()
            .collect();

        debug!(existing = existing.len(), missing = missing.len(), "Existence check complete");
        Ok(missing)
    }

    // ========================================================================
    // Save Stage
    // ========================================================================

    /// Get-or-create the author and insert the news row in one transaction.
    ///
    /// Exceeding `deadline` drops the transaction, which rolls it back.
    #[instrument(skip(self, article), fields(media_id = article.media_id, news_id = %article.news_id))]
    pub async fn save_article(&self, article: &NewArticle, deadline: Duration) -> Result<SaveOutcome> {
        match tokio::time::timeout(deadline, self.save_article_tx(article)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::TransactionTimeout {
                timeout_ms: deadline.as_millis() as u64,
            }),
        }
    }

    async fn save_article_tx(&self, article: &NewArticle) -> Result<SaveOutcome> {
        let txn = self.conn().begin().await?;

        let author = AuthorRepository::new(&txn)
            .get_or_create(&article.author_name, article.media_id)
            .await?;

        let inserted = NewsRepository::new(&txn)
            .insert_if_absent(article, author.id)
            .await?;

        txn.commit().await?;

        debug!(author_id = %author.id, inserted, "Article saved");
        Ok(SaveOutcome { author_id: author.id, inserted })
    }

    // ========================================================================
    // Analysis Stage
    // ========================================================================

    /// Persist a batch of analyses and their metrics in one transaction.
    ///
    /// Returns the number of analyses created; drafts whose
    /// (news_id, media_id, type) already exists are skipped.
    #[instrument(skip(self, drafts), fields(drafts = drafts.len()))]
    pub async fn save_analysis_batch(&self, drafts: &[AnalysisDraft]) -> Result<usize> {
        if drafts.is_empty() {
            return Ok(0);
        }

        let txn = self.conn().begin().await?;
        let analyses = AnalysisRepository::new(&txn);

        let mut created = 0;
        for draft in drafts {
            if analyses.insert_with_metrics(draft).await?.is_some() {
                created += 1;
            }
        }

        txn.commit().await?;

        info!(created, skipped = drafts.len() - created, "Analysis batch persisted");
        Ok(created)
    }
}

// ============================================================================
// Media
// ============================================================================

pub struct MediaRepository<'c, C: ConnectionTrait> {
    conn: &'c C,
}

impl<'c, C: ConnectionTrait> MediaRepository<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    /// Insert the media reference row unless it already exists
    pub async fn ensure(&self, id: i32, name: &str, url: &str) -> Result<()> {
        let media = MediaActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            url: Set(url.to_string()),
        };

        MediaEntity::insert(media)
            .on_conflict(OnConflict::column(MediaColumn::Id).do_nothing().to_owned())
            .exec_without_returning(self.conn)
            .await?;

        Ok(())
    }}

// ============================================================================
// Author
// ============================================================================

pub struct AuthorRepository<'c, C: ConnectionTrait> {
    conn: &'c C,
}

impl<'c, C: ConnectionTrait> AuthorRepository<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    /// Get or create an author by its natural key (name, media_id).
    ///
    /// The insert ignores a conflict on the unique key, so concurrent callers
    /// converge on the same row.
    pub async fn get_or_create(&self, name: &str, media_id: i32) -> Result<Author> {
        let name = normalize_author_name(name);

        let author = AuthorActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.clone()),
            media_id: Set(media_id),
            created_at: Set(Utc::now().into()),
        };

        AuthorEntity::insert(author)
            .on_conflict(
                OnConflict::columns([AuthorColumn::Name, AuthorColumn::MediaId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await?;

        self.find(&name, media_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "author".to_string(),
                id: format!("{}@{}", name, media_id),
            })
    }

    pub async fn find(&self, name: &str, media_id: i32) -> Result<Option<Author>> {
        AuthorEntity::find()
            .filter(AuthorColumn::Name.eq(name))
            .filter(AuthorColumn::MediaId.eq(media_id))
            .one(self.conn)
            .await
            .map_err(Into::into)
    }

    pub async fn count_for_media(&self, media_id: i32) -> Result<u64> {
        use sea_orm::PaginatorTrait;

        AuthorEntity::find()
            .filter(AuthorColumn::MediaId.eq(media_id))
            .count(self.conn)
            .await
            .map_err(Into::into)
    }
}

fn normalize_author_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        UNKNOWN_AUTHOR.to_string()
    } else {
        trimmed.to_string()
    }
}

// ============================================================================
// News
// ============================================================================

pub struct NewsRepository<'c, C: ConnectionTrait> {
    conn: &'c C,
}

impl<'c, C: ConnectionTrait> NewsRepository<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    /// Ids among `ids` already stored for `media_id`, soft-deleted rows included
    pub async fn find_existing_ids(&self, media_id: i32, ids: &[String]) -> Result<Vec<String>> {
        NewsEntity::find()
            .select_only()
            .column(NewsColumn::NewsId)
            .filter(NewsColumn::MediaId.eq(media_id))
            .filter(NewsColumn::NewsId.is_in(ids.iter().cloned()))
            .into_tuple::<String>()
            .all(self.conn)
            .await
            .map_err(Into::into)
    }

    /// Insert the row, ignoring a conflict on the primary key.
    ///
    /// Returns whether a row was written. A conflict on any other unique
    /// column (url) is still an error.
    pub async fn insert_if_absent(&self, article: &NewArticle, author_id: Uuid) -> Result<bool> {
        let now = Utc::now();

        let news = NewsActiveModel {
            news_id: Set(article.news_id.clone()),
            media_id: Set(article.media_id),
            title: Set(article.title.clone()),
            content: Set(article.content.clone()),
            url: Set(article.url.clone()),
            author_id: Set(author_id),
            category: Set(article.category.clone()),
            published_at: Set(article.published_at.into()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        };

        let rows = NewsEntity::insert(news)
            .on_conflict(
                OnConflict::columns([NewsColumn::NewsId, NewsColumn::MediaId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await?;

        Ok(rows > 0)
    }

    pub async fn find_by_key(&self, news_id: &str, media_id: i32) -> Result<Option<News>> {
        NewsEntity::find_by_id((news_id.to_string(), media_id))
            .one(self.conn)
            .await
            .map_err(Into::into)
    }

    /// Up to `limit` live news rows missing a title or a content analysis,
    /// oldest publication first.
    pub async fn find_unanalyzed(&self, limit: u64) -> Result<Vec<News>> {
        NewsEntity::find()
            .filter(NewsColumn::DeletedAt.is_null())
            .filter(
                Condition::any()
                    .add(missing_analysis(AnalysisKind::Title))
                    .add(missing_analysis(AnalysisKind::Content)),
            )
            .order_by_asc(NewsColumn::PublishedAt)
            .order_by_asc(NewsColumn::MediaId)
            .order_by_asc(NewsColumn::NewsId)
            .limit(limit)
            .all(self.conn)
            .await
            .map_err(Into::into)
    }

    /// Mark a row deleted without removing it
    pub async fn soft_delete(&self, news_id: &str, media_id: i32) -> Result<bool> {
        let result = NewsEntity::update_many()
            .col_expr(NewsColumn::DeletedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(NewsColumn::NewsId.eq(news_id))
            .filter(NewsColumn::MediaId.eq(media_id))
            .filter(NewsColumn::DeletedAt.is_null())
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }
}

/// `NOT EXISTS (SELECT 1 FROM analyses WHERE <same news> AND type = kind)`
fn missing_analysis(kind: AnalysisKind) -> sea_orm::sea_query::SimpleExpr {
    Expr::exists(
        Query::select()
            .expr(Expr::val(1))
            .from(AnalysisEntity)
            .and_where(
                Expr::col((AnalysisEntity, AnalysisColumn::NewsId))
                    .equals((NewsEntity, NewsColumn::NewsId)),
            )
            .and_where(
                Expr::col((AnalysisEntity, AnalysisColumn::MediaId))
                    .equals((NewsEntity, NewsColumn::MediaId)),
            )
            .and_where(Expr::col((AnalysisEntity, AnalysisColumn::Kind)).eq(kind.as_str()))
            .to_owned(),
    )
    .not()
}

// ============================================================================
// Analysis
// ============================================================================

pub struct AnalysisRepository<'c, C: ConnectionTrait> {
    conn: &'c C,
}

impl<'c, C: ConnectionTrait> AnalysisRepository<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    /// Insert one analysis and, only if it was created, its metrics.
    ///
    /// Returns the new analysis id, or `None` when an analysis of the same
    /// type already exists for the news item. Callers wanting both-or-neither
    /// semantics must run this inside a transaction.
    pub async fn insert_with_metrics(&self, draft: &AnalysisDraft) -> Result<Option<Uuid>> {
        let id = Uuid::new_v4();

        let analysis = AnalysisActiveModel {
            id: Set(id),
            news_id: Set(draft.news_id.clone()),
            media_id: Set(draft.media_id),
            kind: Set(draft.kind),
            score: Set(draft.score),
            reason: Set(draft.reason.clone()),
            created_at: Set(Utc::now().into()),
        };

        let rows = AnalysisEntity::insert(analysis)
            .on_conflict(
                OnConflict::columns([
                    AnalysisColumn::NewsId,
                    AnalysisColumn::MediaId,
                    AnalysisColumn::Kind,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await?;

        if rows == 0 {
            debug!(news_id = %draft.news_id, kind = draft.kind.as_str(), "Analysis already present");
            return Ok(None);
        }

        if !draft.metrics.is_empty() {
            let metrics = draft.metrics.iter().map(|m| AnalysisMetricActiveModel {
                analysis_id: Set(id),
                metric_key: Set(m.key.clone()),
                score: Set(m.score),
                reason: Set(m.reason.clone()),
            });

            AnalysisMetricEntity::insert_many(metrics)
                .exec_without_returning(self.conn)
                .await?;
        }

        Ok(Some(id))
    }

    /// All analyses for a news item with their metrics, ordered by type
    pub async fn find_for_news(&self, news_id: &str, media_id: i32) -> Result<Vec<AnalysisWithMetrics>> {
        let analyses = AnalysisEntity::find()
            .filter(AnalysisColumn::NewsId.eq(news_id))
            .filter(AnalysisColumn::MediaId.eq(media_id))
            .order_by_asc(AnalysisColumn::Kind)
            .all(self.conn)
            .await?;

        if analyses.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = analyses.iter().map(|a| a.id).collect();
        let mut metrics_by_analysis: HashMap<Uuid, Vec<AnalysisMetric>> = HashMap::new();
        for metric in AnalysisMetricEntity::find()
            .filter(AnalysisMetricColumn::AnalysisId.is_in(ids))
            .order_by_asc(AnalysisMetricColumn::MetricKey)
            .all(self.conn)
            .await?
        {
            metrics_by_analysis.entry(metric.analysis_id).or_default().push(metric);
        }

        Ok(analyses
            .into_iter()
            .map(|analysis| {
                let metrics = metrics_by_analysis.remove(&analysis.id).unwrap_or_default();
                AnalysisWithMetrics { analysis, metrics }
            })
            .collect())
    }

    pub async fn count_for_news(&self, news_id: &str, media_id: i32, kind: AnalysisKind) -> Result<u64> {
        use sea_orm::PaginatorTrait;

        AnalysisEntity::find()
            .filter(AnalysisColumn::NewsId.eq(news_id))
            .filter(AnalysisColumn::MediaId.eq(media_id))
            .filter(AnalysisColumn::Kind.eq(kind))
            .count(self.conn)
            .await
            .map_err(Into::into)
    }
}
