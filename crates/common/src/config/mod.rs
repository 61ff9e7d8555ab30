//! Configuration management for MediaWatch services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Deployment identity
    #[serde(default)]
    pub app: AppSection,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Message broker configuration
    #[serde(default)]
    pub broker: BrokerConfig,

    /// AI scoring service configuration
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Pipeline behaviour
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Source adapter HTTP settings
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppSection {
    /// Environment suffix appended to every topic and subscription name
    #[serde(default = "default_env")]
    pub env: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (postgres:// in production, sqlite:: in tests)
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerProvider {
    Sqs,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Broker backend
    #[serde(default = "default_broker_provider")]
    pub provider: BrokerProvider,

    /// Custom SQS endpoint (local emulators)
    pub endpoint_url: Option<String>,

    /// Maximum in-flight handler invocations per subscription
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,

    /// Visibility timeout in seconds (acts as the ack deadline)
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: i32,

    /// Long polling timeout in seconds
    #[serde(default = "default_wait_time")]
    pub wait_time_seconds: i32,

    /// Maximum messages to receive per poll
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,

    /// Delay before a nacked message is redelivered (in-memory broker)
    #[serde(default = "default_redelivery_delay")]
    pub redelivery_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringProvider {
    Gemini,
    Mock,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    /// Scoring provider: gemini, mock
    #[serde(default = "default_scoring_provider")]
    pub provider: ScoringProvider,

    /// API key for the scoring service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_scoring_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_scoring_timeout")]
    pub timeout_secs: u64,

    /// Number of analyses served by one primed session before it is recreated
    #[serde(default = "default_session_max_uses")]
    pub session_max_uses: u32,

    /// Override for the built-in priming prompt
    pub prompt_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Enabled publishers by media id
    #[serde(default = "default_publishers")]
    pub publishers: Vec<i32>,

    /// Number of news rows analysed per batch trigger
    #[serde(default = "default_analysis_batch_size")]
    pub analysis_batch_size: u32,

    /// Deadline for the save-news transaction in seconds
    #[serde(default = "default_save_timeout")]
    pub save_timeout_secs: u64,

    /// Cadence of the list-scraping trigger in seconds
    #[serde(default = "default_list_interval")]
    pub list_scraping_interval_secs: u64,

    /// Cadence of the analysis-batch trigger in seconds
    #[serde(default = "default_analysis_interval")]
    pub analysis_interval_secs: u64,

    /// Create tables and indexes on startup
    #[serde(default)]
    pub bootstrap_schema: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// User agent sent to publisher sites
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "default_scraper_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for log records
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_env() -> String { "dev".to_string() }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_broker_provider() -> BrokerProvider { BrokerProvider::Memory }
fn default_max_outstanding() -> usize { 15 }
fn default_visibility_timeout() -> i32 { 20 }
fn default_wait_time() -> i32 { 20 }
fn default_max_messages() -> i32 { 10 }
fn default_redelivery_delay() -> u64 { 1000 }
fn default_scoring_provider() -> ScoringProvider { ScoringProvider::Gemini }
fn default_scoring_model() -> String { "gemini-2.0-flash-lite-001".to_string() }
fn default_scoring_timeout() -> u64 { 60 }
fn default_session_max_uses() -> u32 { 10 }
fn default_publishers() -> Vec<i32> { vec![1, 2] }
fn default_analysis_batch_size() -> u32 { 2 }
fn default_save_timeout() -> u64 { 10 }
fn default_list_interval() -> u64 { 3600 }
fn default_analysis_interval() -> u64 { 60 }
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string()
}
fn default_scraper_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "mediawatch".to_string() }

impl Default for AppSection {
    fn default() -> Self {
        Self { env: default_env() }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            provider: default_broker_provider(),
            endpoint_url: None,
            max_outstanding: default_max_outstanding(),
            visibility_timeout_secs: default_visibility_timeout(),
            wait_time_seconds: default_wait_time(),
            max_messages: default_max_messages(),
            redelivery_delay_ms: default_redelivery_delay(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            provider: default_scoring_provider(),
            api_key: None,
            api_base: None,
            model: default_scoring_model(),
            timeout_secs: default_scoring_timeout(),
            session_max_uses: default_session_max_uses(),
            prompt_path: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publishers: default_publishers(),
            analysis_batch_size: default_analysis_batch_size(),
            save_timeout_secs: default_save_timeout(),
            list_scraping_interval_secs: default_list_interval(),
            analysis_interval_secs: default_analysis_interval(),
            bootstrap_schema: false,
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_scraper_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__PIPELINE__ANALYSIS_BATCH_SIZE=5
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("pipeline.publishers")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Deadline for the save-news transaction
    pub fn save_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.save_timeout_secs)
    }

    /// Delay before the in-memory broker redelivers a nacked message
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.broker.redelivery_delay_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/mediawatch".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            broker: BrokerConfig::default(),
            scoring: ScoringConfig::default(),
            pipeline: PipelineConfig::default(),
            scraper: ScraperConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
