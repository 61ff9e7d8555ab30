//! SQS-backed broker
//!
//! Provides:
//! - One SQS queue per subscription, named by the subscription id
//! - Fan-out publish to every subscription queue of a topic
//! - Long-polling consumers with bounded in-flight handlers
//! - Queue provisioning with retry at startup
//!
//! Ack deletes the message; nack resets its visibility so SQS redelivers it
//! immediately. The receive count SQS tracks becomes the delivery attempt.
//! While a handler runs, its message's visibility is extended every half
//! timeout so slow handlers are not redelivered mid-flight.

use super::{dispatch, Broker, Delivery, MessageHandler, SubscriptionId, Topic, Topology};
use crate::config::BrokerConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client as SqsClient;
use backoff::{future::retry, ExponentialBackoff};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receive settings shared by every consumer
#[derive(Debug, Clone)]
struct ReceiveSettings {
    max_outstanding: usize,
    visibility_timeout: i32,
    wait_time_seconds: i32,
    max_messages: i32,
}

pub struct SqsBroker {
    client: SqsClient,
    topology: Topology,
    settings: ReceiveSettings,
    /// Queue url per subscription, filled by `ensure_queues`
    queue_urls: RwLock<HashMap<SubscriptionId, String>>,
}

impl SqsBroker {
    /// Create a broker from the default AWS credential chain
    pub async fn connect(topology: Topology, config: &BrokerConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        Ok(Self::with_client(SqsClient::new(&aws_config), topology, config))
    }

    /// Create with an existing SQS client
    pub fn with_client(client: SqsClient, topology: Topology, config: &BrokerConfig) -> Self {
        Self {
            client,
            topology,
            settings: ReceiveSettings {
                max_outstanding: config.max_outstanding.max(1),
                visibility_timeout: config.visibility_timeout_secs,
                wait_time_seconds: config.wait_time_seconds,
                max_messages: config.max_messages.clamp(1, 10),
            },
            queue_urls: RwLock::new(HashMap::new()),
        }
    }

    /// Get-or-create the queue of every subscription in the topology
    pub async fn ensure_queues(&self) -> Result<()> {
        for (topic, subscription) in self.topology.all_subscriptions() {
            let url = self.ensure_queue(subscription).await?;
            info!(topic = %topic, subscription = %subscription, queue_url = %url, "Queue ready");
            self.queue_urls.write().await.insert(subscription.clone(), url);
        }
        Ok(())
    }

    async fn ensure_queue(&self, subscription: &SubscriptionId) -> Result<String> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(policy, || async move {
            // CreateQueue returns the existing url when the queue already exists
            let result = self
                .client
                .create_queue()
                .queue_name(subscription.as_str())
                .send()
                .await
                .map_err(|e| {
                    warn!(subscription = %subscription, error = %e, "Queue provisioning failed, retrying");
                    backoff::Error::transient(AppError::QueueError {
                        message: format!("Failed to create queue {}: {}", subscription, e),
                    })
                })?;

            result.queue_url.ok_or_else(|| {
                backoff::Error::permanent(AppError::QueueError {
                    message: format!("No url returned for queue {}", subscription),
                })
            })
        })
        .await
    }

    async fn queue_url(&self, subscription: &SubscriptionId) -> Result<String> {
        if let Some(url) = self.queue_urls.read().await.get(subscription) {
            return Ok(url.clone());
        }

        let url = self.ensure_queue(subscription).await?;
        self.queue_urls.write().await.insert(subscription.clone(), url.clone());
        Ok(url)
    }

    async fn send(&self, queue_url: &str, body: &str) -> Result<String> {
        let result = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send message: {}", e),
            })?;

        Ok(result.message_id.unwrap_or_default())
    }
}

#[async_trait]
impl Broker for SqsBroker {
    async fn publish_raw(&self, topic: Topic, payload: Vec<u8>) -> Result<String> {
        let body = String::from_utf8(payload).map_err(|e| AppError::QueueError {
            message: format!("Payload is not UTF-8: {}", e),
        })?;

        let subscriptions = self.topology.subscriptions(topic);
        if subscriptions.is_empty() {
            return Err(AppError::QueueError {
                message: format!("Topic {} has no subscriptions", topic),
            });
        }

        let mut urls = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            urls.push(self.queue_url(subscription).await?);
        }

        let results = futures::future::join_all(urls.iter().map(|url| self.send(url, &body))).await;

        let mut message_id = String::new();
        for result in results {
            let id = result?;
            if message_id.is_empty() {
                message_id = id;
            }
        }

        debug!(topic = %topic, message_id = %message_id, copies = urls.len(), "Message published");
        Ok(message_id)
    }

    async fn subscribe(
        &self,
        topic: Topic,
        subscription: SubscriptionId,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        if self.topology.topic_of(&subscription) != Some(topic) {
            return Err(AppError::QueueError {
                message: format!("Subscription {} does not belong to topic {}", subscription, topic),
            });
        }

        let consumer = Consumer {
            client: self.client.clone(),
            queue_url: self.queue_url(&subscription).await?,
            topic,
            subscription,
            settings: self.settings.clone(),
        };

        info!(topic = %topic, subscription = %consumer.subscription, "Consumer started");
        Ok(tokio::spawn(consumer.run(handler, shutdown)))
    }
}

struct Consumer {
    client: SqsClient,
    queue_url: String,
    topic: Topic,
    subscription: SubscriptionId,
    settings: ReceiveSettings,
}

impl Consumer {
    async fn run(self, handler: Arc<dyn MessageHandler>, shutdown: CancellationToken) {
        let consumer = Arc::new(self);
        let limit = Arc::new(Semaphore::new(consumer.settings.max_outstanding));
        let mut in_flight = JoinSet::new();

        loop {
            let free = limit.available_permits() as i32;
            if free == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = in_flight.join_next() => continue,
                }
            }

            let batch = free.min(consumer.settings.max_messages);
            let messages = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = consumer.receive(batch) => received,
            };

            let messages = match messages {
                Ok(messages) => messages,
                Err(e) => {
                    error!(subscription = %consumer.subscription, error = %e, "Receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };

            for message in messages {
                let permit = match limit.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let consumer = consumer.clone();
                let handler = handler.clone();

                in_flight.spawn(async move {
                    let _permit = permit;
                    consumer.process(handler.as_ref(), message).await;
                });
            }

            while in_flight.try_join_next().is_some() {}
        }

        // Unreceived messages stay in the queue; in-flight ones finish here
        while in_flight.join_next().await.is_some() {}
        info!(subscription = %consumer.subscription, "Consumer stopped");
    }

    async fn receive(&self, max_messages: i32) -> Result<Vec<Message>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .visibility_timeout(self.settings.visibility_timeout)
            .wait_time_seconds(self.settings.wait_time_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        Ok(result.messages.unwrap_or_default())
    }

    async fn process(&self, handler: &dyn MessageHandler, message: Message) {
        let Some(receipt_handle) = message.receipt_handle.clone() else {
            warn!(subscription = %self.subscription, "Message without receipt handle ignored");
            return;
        };

        let attempt = message
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        let delivery = Delivery {
            message_id: message.message_id.unwrap_or_default(),
            topic: self.topic,
            payload: message.body.unwrap_or_default().into_bytes(),
            attempt,
        };

        let receipt = receipt_handle.as_str();
        let handled = keep_visible(
            dispatch(handler, &self.subscription, delivery),
            heartbeat_interval(self.settings.visibility_timeout),
            move || self.set_visibility(receipt, self.settings.visibility_timeout),
        )
        .await;

        let outcome = if handled {
            self.ack(&receipt_handle).await
        } else {
            self.nack(&receipt_handle).await
        };

        if let Err(e) = outcome {
            // Visibility timeout expiry redelivers it anyway
            warn!(subscription = %self.subscription, error = %e, "Failed to settle message");
        }
    }

    async fn ack(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<()> {
        self.set_visibility(receipt_handle, 0).await
    }

    async fn set_visibility(&self, receipt_handle: &str, seconds: i32) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to change message visibility: {}", e),
            })?;
        Ok(())
    }
}

/// Half the visibility timeout, at least one second
fn heartbeat_interval(visibility_timeout: i32) -> Duration {
    Duration::from_secs((visibility_timeout / 2).max(1) as u64)
}

/// Drive `work` to completion, calling `extend` every `every` meanwhile.
///
/// A failed extension is logged; the message may then be redelivered while
/// still in flight, which handlers tolerate.
async fn keep_visible<W, F, Fut>(work: W, every: Duration, mut extend: F) -> W::Output
where
    W: Future,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    tokio::pin!(work);
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = heartbeat.tick() => {
                match extend().await {
                    Ok(()) => debug!(every_ms = every.as_millis() as u64, "Message visibility extended"),
                    Err(e) => warn!(error = %e, "Failed to extend message visibility"),
                }
            }
        }
    }
}
