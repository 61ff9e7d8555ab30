//! Pipeline stage handlers
//!
//! One handler per consumed topic. Handlers never call each other; every
//! hand-off is a published event. Returning an error nacks the delivery.

mod analysis_batch;
mod check_existence;
mod content_scraping;
mod list_scraping;
mod save_news;

pub use analysis_batch::{AnalysisBatchHandler, BatchReport};
pub use check_existence::CheckExistenceHandler;
pub use content_scraping::ContentScrapingHandler;
pub use list_scraping::ListScrapingHandler;
pub use save_news::SaveNewsHandler;
