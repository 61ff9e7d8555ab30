//! Database layer for MediaWatch
//!
//! Provides:
//! - SeaORM entity models
//! - Repository pattern for data access, with scoped views bound to an
//!   explicit connection or transaction
//! - Connection pool management
//! - Schema bootstrap

pub mod models;
pub mod schema;
mod repository;

pub use repository::{
    AnalysisDraft, AnalysisRepository, AnalysisWithMetrics, AuthorRepository, MediaRepository,
    MetricDraft, NewArticle, NewsRepository, Repository, SaveOutcome,
};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e)
            })?;

        info!("Database connection established");

        Ok(Self { conn })
    }

    /// Single-connection in-memory SQLite pool, used by tests and local runs
    pub async fn in_memory() -> Result<Self> {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to open in-memory database: {}", e)
            })?;

        Ok(Self { conn })
    }

    /// Get the shared connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }}
