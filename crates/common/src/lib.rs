//! MediaWatch Common Library
//!
//! Shared code for the MediaWatch pipeline binaries including:
//! - Database models, repositories and schema bootstrap
//! - Message broker abstraction and event payloads
//! - AI scoring client abstraction
//! - Error types and handling
//! - Configuration management
//! - Tracing bootstrap and metrics

pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod queue;
pub mod scoring;
pub mod telemetry;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use queue::{Broker, BrokerExt, Topic};
pub use scoring::Scorer;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
