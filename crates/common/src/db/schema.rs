//! Schema bootstrap
//!
//! Creates the five tables from the entity definitions together with the
//! unique indexes the repositories rely on for conflict handling. Every
//! statement is `IF NOT EXISTS`, so running it against an existing schema is
//! a no-op.

use crate::db::models::*;
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement, TableCreateStatement};
use sea_orm::{ConnectionTrait, EntityTrait, Schema};
use tracing::info;

/// Create all tables and indexes
pub async fn create_schema<C: ConnectionTrait>(conn: &C) -> Result<()> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    // Parents before children so foreign keys resolve
    let tables: Vec<TableCreateStatement> = vec![
        table(&schema, MediaEntity),
        table(&schema, AuthorEntity),
        table(&schema, NewsEntity),
        table(&schema, AnalysisEntity),
        table(&schema, AnalysisMetricEntity),
    ];

    for stmt in &tables {
        conn.execute(backend.build(stmt)).await?;
    }

    for stmt in indexes() {
        conn.execute(backend.build(&stmt)).await?;
    }

    info!(tables = tables.len(), "Schema ready");
    Ok(())
}

fn table<E: EntityTrait>(schema: &Schema, entity: E) -> TableCreateStatement {
    schema.create_table_from_entity(entity).if_not_exists().to_owned()
}

fn indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("idx_authors_name_media")
            .table(AuthorEntity)
            .col(AuthorColumn::Name)
            .col(AuthorColumn::MediaId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_analyses_news_media_type")
            .table(AnalysisEntity)
            .col(AnalysisColumn::NewsId)
            .col(AnalysisColumn::MediaId)
            .col(AnalysisColumn::Kind)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_news_published_at")
            .table(NewsEntity)
            .col(NewsColumn::PublishedAt)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_news_deleted_at")
            .table(NewsEntity)
            .col(NewsColumn::DeletedAt)
            .if_not_exists()
            .to_owned(),
    ]
}
