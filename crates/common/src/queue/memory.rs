//! In-process broker
//!
//! Each subscription in the topology owns an unbounded channel created up
//! front, so messages published before a consumer attaches are retained the
//! way a durable subscription would retain them. Nacked deliveries are sent
//! back to the same channel after the redelivery delay.
//!
//! Published payloads are only kept for inspection when the broker is built
//! with `InMemoryBroker::recording`.

use super::{dispatch, Broker, Delivery, MessageHandler, SubscriptionId, Topic, Topology};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Sender = mpsc::UnboundedSender<Delivery>;
type Receiver = mpsc::UnboundedReceiver<Delivery>;

pub struct InMemoryBroker {
    topology: Topology,
    max_outstanding: usize,
    redelivery_delay: Duration,
    senders: HashMap<SubscriptionId, Sender>,
    /// Receivers not yet claimed by a consumer
    receivers: Mutex<HashMap<SubscriptionId, Receiver>>,
    history: Option<Mutex<Vec<(Topic, Vec<u8>)>>>,
}

impl InMemoryBroker {
    pub fn new(topology: Topology, max_outstanding: usize, redelivery_delay: Duration) -> Self {
        Self::build(topology, max_outstanding, redelivery_delay, false)
    }

    /// Broker that also keeps every published payload for `published`
    pub fn recording(topology: Topology, max_outstanding: usize, redelivery_delay: Duration) -> Self {
        Self::build(topology, max_outstanding, redelivery_delay, true)
    }

    fn build(topology: Topology, max_outstanding: usize, redelivery_delay: Duration, record: bool) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();

        for (_, subscription) in topology.all_subscriptions() {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(subscription.clone(), tx);
            receivers.insert(subscription.clone(), rx);
        }

        Self {
            topology,
            max_outstanding: max_outstanding.max(1),
            redelivery_delay,
            senders,
            receivers: Mutex::new(receivers),
            history: record.then(|| Mutex::new(Vec::new())),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Raw payloads published to `topic`, oldest first; empty unless recording
    pub async fn published(&self, topic: Topic) -> Vec<Vec<u8>> {
        let Some(history) = &self.history else {
            return Vec::new();
        };

        history
            .lock()
            .await
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Decoded events published to `topic`, oldest first
    pub async fn published_events<T: DeserializeOwned>(&self, topic: Topic) -> Result<Vec<T>> {
        self.published(topic)
            .await
            .iter()
            .map(|payload| serde_json::from_slice(payload).map_err(AppError::from))
            .collect()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish_raw(&self, topic: Topic, payload: Vec<u8>) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();

        for subscription in self.topology.subscriptions(topic) {
            if let Some(tx) = self.senders.get(subscription) {
                let delivery = Delivery {
                    message_id: message_id.clone(),
                    topic,
                    payload: payload.clone(),
                    attempt: 1,
                };
                tx.send(delivery).map_err(|_| AppError::QueueError {
                    message: format!("Subscription {} is closed", subscription),
                })?;
            }
        }

        if let Some(history) = &self.history {
            history.lock().await.push((topic, payload));
        }

        debug!(topic = %topic, message_id = %message_id, "Message published");
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

        let mut rx = self.receivers.lock().await.remove(&subscription).ok_or_else(|| {
            AppError::QueueError {
                message: format!("Subscription {} already has a consumer", subscription),
            }
        })?;

        let tx = self
            .senders
            .get(&subscription)
            .cloned()
            .ok_or_else(|| AppError::QueueError {
                message: format!("Unknown subscription {}", subscription),
            })?;

        let limit = Arc::new(Semaphore::new(self.max_outstanding));
        let redelivery_delay = self.redelivery_delay;

        info!(topic = %topic, subscription = %subscription, "Consumer started");

        let handle = tokio::spawn(async move {
            let mut in_flight = JoinSet::new();

            loop {
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = limit.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let delivery = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    delivery = rx.recv() => match delivery {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };

                let handler = handler.clone();
                let subscription = subscription.clone();
                let tx = tx.clone();

                in_flight.spawn(async move {
                    let _permit = permit;
                    let retry = delivery.clone();

                    if !dispatch(handler.as_ref(), &subscription, delivery).await {
                        tokio::spawn(async move {
                            tokio::time::sleep(redelivery_delay).await;
                            let redelivery = Delivery {
                                attempt: retry.attempt + 1,
                                ..retry
                            };
                            if tx.send(redelivery).is_err() {
                                warn!(subscription = %subscription, "Redelivery dropped, subscription closed");
                            }
                        });
                    }
                });

                while in_flight.try_join_next().is_some() {}
            }

            while in_flight.join_next().await.is_some() {}
            info!(subscription = %subscription, "Consumer stopped");
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::assert_err;

    struct FailFirst {
        calls: AtomicU32,
        attempts: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl MessageHandler for FailFirst {
        async fn handle(&self, delivery: Delivery) -> Result<()> {
            self.attempts.lock().await.push(delivery.attempt);
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(AppError::Scraping { message: "upstream down".into() });
            }
            Ok(())
        }
    }

    struct Count(AtomicU32);

    #[async_trait]
    impl MessageHandler for Count {
        async fn handle(&self, _delivery: Delivery) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn broker() -> InMemoryBroker {
        InMemoryBroker::recording(Topology::new("test", &[1, 2]), 4, Duration::from_millis(10))
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_nacked_message_is_redelivered_with_next_attempt() {
        let broker = broker();
        let handler = Arc::new(FailFirst {
            calls: AtomicU32::new(0),
            attempts: Mutex::new(Vec::new()),
        });
        let shutdown = CancellationToken::new();

        broker
            .subscribe(
                Topic::NewsSave,
                SubscriptionId::shared(Topic::NewsSave, "test"),
                handler.clone(),
                shutdown.clone(),
            )
            .await
            .unwrap();

        broker.publish_raw(Topic::NewsSave, b"{}".to_vec()).await.unwrap();

        wait_until(|| handler.calls.load(Ordering::SeqCst) >= 2).await;
        assert_eq!(*handler.attempts.lock().await, vec![1, 2]);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_each_publisher_subscription_receives_a_copy() {
        let broker = broker();
        let first = Arc::new(Count(AtomicU32::new(0)));
        let second = Arc::new(Count(AtomicU32::new(0)));
        let shutdown = CancellationToken::new();

        for (media_id, handler) in [(1, first.clone()), (2, second.clone())] {
            broker
                .subscribe(
                    Topic::ArticleListScraping,
                    SubscriptionId::for_publisher(Topic::ArticleListScraping, "test", media_id),
                    handler,
                    shutdown.clone(),
                )
                .await
                .unwrap();
        }

        broker.publish_raw(Topic::ArticleListScraping, b"{}".to_vec()).await.unwrap();

        wait_until(|| {
            first.0.load(Ordering::SeqCst) == 1 && second.0.load(Ordering::SeqCst) == 1
        })
        .await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_messages_published_before_subscribe_are_retained() {
        let broker = broker();
        broker.publish_raw(Topic::NewsCheck, b"{}".to_vec()).await.unwrap();

        let handler = Arc::new(Count(AtomicU32::new(0)));
        let shutdown = CancellationToken::new();
        broker
            .subscribe(
                Topic::NewsCheck,
                SubscriptionId::shared(Topic::NewsCheck, "test"),
                handler.clone(),
                shutdown.clone(),
            )
            .await
            .unwrap();

        wait_until(|| handler.0.load(Ordering::SeqCst) == 1).await;
        assert_eq!(broker.published(Topic::NewsCheck).await.len(), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_second_consumer_on_subscription_is_rejected() {
        let broker = broker();
        let sub = SubscriptionId::shared(Topic::AnalysisGet, "test");
        let handler = Arc::new(Count(AtomicU32::new(0)));
        let shutdown = CancellationToken::new();

        broker
            .subscribe(Topic::AnalysisGet, sub.clone(), handler.clone(), shutdown.clone())
            .await
            .unwrap();

        assert_err!(broker.subscribe(Topic::AnalysisGet, sub, handler, shutdown.clone()).await);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_stops_consumer() {
        let broker = broker();
        let shutdown = CancellationToken::new();
        let handle = broker
            .subscribe(
                Topic::NewsCheck,
                SubscriptionId::shared(Topic::NewsCheck, "test"),
                Arc::new(Count(AtomicU32::new(0))),
                shutdown.clone(),
            )
            .await
            .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_default_broker_keeps_no_payloads() {
        let broker = InMemoryBroker::new(Topology::new("test", &[1]), 4, Duration::from_millis(10));
        let body = vec![b'x'; 10_000];

        for _ in 0..100 {
            broker.publish_raw(Topic::NewsSave, body.clone()).await.unwrap();
        }

        assert!(broker.published(Topic::NewsSave).await.is_empty());
    }
}
