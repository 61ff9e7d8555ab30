//! Topic-based message broker abstraction
//!
//! Provides:
//! - The topic registry and environment-namespaced subscription identities
//! - The `Broker` / `MessageHandler` traits the pipeline stages are wired through
//! - An in-process broker (tests, local runs) and an SQS-backed broker
//!
//! Delivery is at-least-once: a handler error nacks the message and it is
//! delivered again later with an incremented attempt number.

mod memory;
mod sqs;

pub use memory::InMemoryBroker;
pub use sqs::SqsBroker;

use crate::config::{AppConfig, BrokerProvider};
use crate::errors::{AppError, ErrorClass, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

/// Pipeline topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    ArticleListScraping,
    NewsCheck,
    ArticleContentScraping,
    NewsSave,
    AnalysisGet,
    /// Declared for compatibility; analyses are persisted by the batch stage
    AnalysisSave,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::ArticleListScraping,
        Topic::NewsCheck,
        Topic::ArticleContentScraping,
        Topic::NewsSave,
        Topic::AnalysisGet,
        Topic::AnalysisSave,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ArticleListScraping => "article_list_scraping",
            Topic::NewsCheck => "news_check",
            Topic::ArticleContentScraping => "article_content_scraping",
            Topic::NewsSave => "news_save",
            Topic::AnalysisGet => "analysis_get",
            Topic::AnalysisSave => "analysis_save",
        }
    }

    /// Topic name namespaced by deployment environment
    pub fn qualified(&self, env: &str) -> String {
        format!("{}_{}", self.as_str(), env)
    }

    /// Whether every publisher consumes this topic through its own subscription
    pub fn is_per_publisher(&self) -> bool {
        matches!(self, Topic::ArticleListScraping)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of one consumer group on a topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Single consumer group shared by all workers
    pub fn shared(topic: Topic, env: &str) -> Self {
        Self(format!("{}_sub", topic.qualified(env)))
    }

    /// Independent consumer group for one publisher
    pub fn for_publisher(topic: Topic, env: &str, media_id: i32) -> Self {
        Self(format!("{}_{}_sub", topic.qualified(env), media_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every subscription that exists for each consumed topic
#[derive(Debug, Clone, Default)]
pub struct Topology {
    env: String,
    subscriptions: BTreeMap<Topic, Vec<SubscriptionId>>,
}

impl Topology {
    /// Build the topology for an environment and the enabled publishers
    pub fn new(env: &str, publishers: &[i32]) -> Self {
        let mut subscriptions = BTreeMap::new();

        for topic in Topic::ALL {
            if topic == Topic::AnalysisSave {
                continue;
            }

            let subs = if topic.is_per_publisher() {
                publishers
                    .iter()
                    .map(|media_id| SubscriptionId::for_publisher(topic, env, *media_id))
                    .collect()
            } else {
                vec![SubscriptionId::shared(topic, env)]
            };
            subscriptions.insert(topic, subs);
        }

        Self {
            env: env.to_string(),
            subscriptions,
        }
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Subscriptions that receive a copy of each message published to `topic`
    pub fn subscriptions(&self, topic: Topic) -> &[SubscriptionId] {
        self.subscriptions
            .get(&topic)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Topic a subscription belongs to
    pub fn topic_of(&self, subscription: &SubscriptionId) -> Option<Topic> {
        self.subscriptions
            .iter()
            .find(|(_, subs)| subs.contains(subscription))
            .map(|(topic, _)| *topic)
    }

    pub fn all_subscriptions(&self) -> impl Iterator<Item = (Topic, &SubscriptionId)> {
        self.subscriptions
            .iter()
            .flat_map(|(topic, subs)| subs.iter().map(move |s| (*topic, s)))
    }
}

/// One delivery of a message to a subscription
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub topic: Topic,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u32,
}

impl Delivery {
    /// Decode the JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            AppError::malformed_payload(format!("{} message {}: {}", self.topic, self.message_id, e))
        })
    }
}

/// Consumer callback. `Ok` acks the delivery, `Err` nacks it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<()>;
}

/// Publish/subscribe client
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish raw bytes to every subscription of `topic`, returning the message id
    async fn publish_raw(&self, topic: Topic, payload: Vec<u8>) -> Result<String>;

    /// Start consuming `subscription` on `topic`.
    ///
    /// The subscription is registered before this returns, so messages
    /// published afterwards are delivered. Consumption stops when `shutdown`
    /// is cancelled; the returned handle completes once in-flight handlers
    /// have finished.
    async fn subscribe(
        &self,
        topic: Topic,
        subscription: SubscriptionId,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>>;
}

/// Typed publishing on top of any broker
#[async_trait]
pub trait BrokerExt: Broker {
    async fn publish<T: Serialize + Sync>(&self, topic: Topic, event: &T) -> Result<String> {
        let payload = serde_json::to_vec(event)?;
        self.publish_raw(topic, payload).await
    }
}

impl<B: Broker + ?Sized> BrokerExt for B {}

/// Run one delivery through its handler inside a per-message span.
///
/// Returns whether the delivery should be acked.
pub(crate) async fn dispatch(
    handler: &dyn MessageHandler,
    subscription: &SubscriptionId,
    delivery: Delivery,
) -> bool {
    let span = info_span!(
        "message",
        topic = %delivery.topic,
        subscription = %subscription,
        message_id = %delivery.message_id,
        attempt = delivery.attempt,
    );

    async move {
        let topic = delivery.topic;
        let start = Instant::now();

        match handler.handle(delivery).await {
            Ok(()) => {
                metrics::record_message(topic, "ack", start.elapsed().as_secs_f64());
                debug!("Message acked");
                true
            }
            Err(e) => {
                metrics::record_message(topic, "nack", start.elapsed().as_secs_f64());
                match e.class() {
                    ErrorClass::MalformedData | ErrorClass::Internal => {
                        error!(error = %e, code = e.code().as_code(), "Handler failed, message nacked")
                    }
                    ErrorClass::Transport | ErrorClass::Transactional => {
                        warn!(error = %e, code = e.code().as_code(), "Handler failed, message nacked")
                    }
                }
                false
            }
        }
    }
    .instrument(span)
    .await
}

/// Create the broker selected by configuration
pub async fn create_broker(config: &AppConfig) -> Result<Arc<dyn Broker>> {
    let topology = Topology::new(&config.app.env, &config.pipeline.publishers);

    match config.broker.provider {
        BrokerProvider::Memory => Ok(Arc::new(InMemoryBroker::new(
            topology,
            config.broker.max_outstanding,
            config.redelivery_delay(),
        ))),
        BrokerProvider::Sqs => {
            let broker = SqsBroker::connect(topology, &config.broker).await?;
            broker.ensure_queues().await?;
            Ok(Arc::new(broker))
        }
    }
}
