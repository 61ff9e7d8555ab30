//! Analysis entity: one aggregate score per news item and analysis type

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Which part of the article an analysis scores
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    #[sea_orm(string_value = "title")]
    Title,
    #[sea_orm(string_value = "content")]
    Content,
}

const TITLE_METRICS: &[&str] = &["accuracy", "clarity", "objectivity", "relevance", "attractiveness"];
const CONTENT_METRICS: &[&str] = &["accuracy", "objectivity", "timeliness", "importance", "presentation"];

impl AnalysisKind {
    /// Metric keys accepted for this analysis type
    pub fn metric_vocabulary(&self) -> &'static [&'static str] {
        match self {
            AnalysisKind::Title => TITLE_METRICS,
            AnalysisKind::Content => CONTENT_METRICS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Title => "title",
            AnalysisKind::Content => "content",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "analyses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub news_id: String,

    pub media_id: i32,

    #[sea_orm(column_name = "type")]
    pub kind: AnalysisKind,

    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub score: Decimal,

    #[sea_orm(column_type = "Text")]
    pub reason: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::news::Entity",
        from = "(Column::NewsId, Column::MediaId)",
        to = "(super::news::Column::NewsId, super::news::Column::MediaId)",
        on_delete = "Cascade"
    )]
    News,

    #[sea_orm(has_many = "super::analysis_metric::Entity")]
    Metrics,
}

impl Related<super::news::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::News.def()
    }
}

impl Related<super::analysis_metric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Metrics.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
