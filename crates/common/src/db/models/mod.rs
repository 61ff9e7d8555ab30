//! SeaORM entity models
//!
//! Database entities for MediaWatch

mod media;
mod author;
mod news;
mod analysis;
mod analysis_metric;

pub use media::{
    Entity as MediaEntity,
    Model as Media,
    ActiveModel as MediaActiveModel,
    Column as MediaColumn,
};

pub use author::{
    Entity as AuthorEntity,
    Model as Author,
    ActiveModel as AuthorActiveModel,
    Column as AuthorColumn,
};

pub use news::{
    Entity as NewsEntity,
    Model as News,
    ActiveModel as NewsActiveModel,
    Column as NewsColumn,
};

pub use analysis::{
    Entity as AnalysisEntity,
    Model as Analysis,
    ActiveModel as AnalysisActiveModel,
    Column as AnalysisColumn,
    AnalysisKind,
};

pub use analysis_metric::{
    Entity as AnalysisMetricEntity,
    Model as AnalysisMetric,
    ActiveModel as AnalysisMetricActiveModel,
    Column as AnalysisMetricColumn,
};
