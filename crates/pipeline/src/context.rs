//! Shared state handed to every stage handler

use crate::publishers::PublisherRegistry;
use mediawatch_common::{AppConfig, Broker, Repository, Scorer};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators of the pipeline stages
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<AppConfig>,
    pub broker: Arc<dyn Broker>,
    pub repository: Repository,
    pub scorer: Arc<dyn Scorer>,
    pub registry: Arc<PublisherRegistry>,
}

impl PipelineContext {
    pub fn new(
        config: Arc<AppConfig>,
        broker: Arc<dyn Broker>,
        repository: Repository,
        scorer: Arc<dyn Scorer>,
        registry: Arc<PublisherRegistry>,
    ) -> Self {
        Self {
            config,
            broker,
            repository,
            scorer,
            registry,
        }
    }

    /// Deadline of the save-news transaction
    pub fn save_timeout(&self) -> Duration {
        self.config.save_timeout()
    }

    /// Environment suffix of topics and subscriptions
    pub fn env(&self) -> &str {
        &self.config.app.env
    }
}
