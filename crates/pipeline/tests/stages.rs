//! Stage handlers against an in-memory database and broker

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mediawatch_common::config::AppConfig;
use mediawatch_common::db::models::AnalysisKind;
use mediawatch_common::db::{schema, DbPool};
use mediawatch_common::errors::{AppError, Result};
use mediawatch_common::events::{
    AnalysisGetEvent, ArticleContentScrapingEvent, NewsCheckEvent, NewsSaveEvent,
};
use mediawatch_common::queue::{
    Broker, Delivery, InMemoryBroker, MessageHandler, SubscriptionId, Topology,
};
use mediawatch_common::scoring::{Analytics, MetricScore, MockScorer, NewsAnalytics, Scorer};
use mediawatch_common::{Repository, Topic};
use mediawatch_pipeline::handlers::{
    AnalysisBatchHandler, CheckExistenceHandler, ContentScrapingHandler, ListScrapingHandler,
    SaveNewsHandler,
};
use mediawatch_pipeline::source::{ScrapedArticle, SourceAdapter};
use mediawatch_pipeline::{
    start_consumers, trigger_analysis_batch, trigger_list_scraping, PipelineContext, Publisher,
    PublisherRegistry,
};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const ENV: &str = "test";
const MEDIA_ID: i32 = 2;

// ============================================================================
// Fixtures
// ============================================================================

/// Publisher stand-in with a fixed listing
struct StubSource {
    ids: Option<Vec<String>>,
}

#[async_trait]
impl SourceAdapter for StubSource {
    async fn fetch_id_list(&self) -> Result<Vec<String>> {
        self.ids.clone().ok_or_else(|| AppError::Scraping {
            message: "listing unavailable".to_string(),
        })
    }

    async fn fetch_article(&self, news_id: &str) -> Result<ScrapedArticle> {
        Ok(ScrapedArticle {
            title: format!("Headline {}", news_id),
            content: format!("Body of {}", news_id),
            author_name: "Reporter".to_string(),
            published_at: day(1),
            category: "politics".to_string(),
            url: Publisher::Setn.article_url(news_id),
        })
    }
}

/// Fails for one title, scores everything else with the mock
struct FailOnTitle(&'static str);

#[async_trait]
impl Scorer for FailOnTitle {
    async fn analyze(&self, title: &str, content: &str) -> Result<NewsAnalytics> {
        if title == self.0 {
            return Err(AppError::Scoring {
                message: "upstream 503".to_string(),
            });
        }
        MockScorer.analyze(title, content).await
    }

    fn model_name(&self) -> &str {
        "fail-on-title"
    }
}

/// Returns the same reply for every article
struct FixedScorer(NewsAnalytics);

#[async_trait]
impl Scorer for FixedScorer {
    async fn analyze(&self, _title: &str, _content: &str) -> Result<NewsAnalytics> {
        Ok(self.0.clone())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Broker whose publish fails on one chosen call
struct FlakyBroker {
    fail_on_call: usize,
    calls: AtomicUsize,
    accepted: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn publish_raw(&self, _topic: Topic, payload: Vec<u8>) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_on_call {
            return Err(AppError::QueueError {
                message: "publish timed out".to_string(),
            });
        }
        self.accepted.lock().await.push(payload);
        Ok(format!("msg-{}", call))
    }

    async fn subscribe(
        &self,
        _topic: Topic,
        subscription: SubscriptionId,
        _handler: Arc<dyn MessageHandler>,
        _shutdown: CancellationToken,
    ) -> Result<tokio::task::JoinHandle<()>> {
        Err(AppError::QueueError {
            message: format!("cannot consume {}", subscription),
        })
    }
}

struct Harness {
    ctx: Arc<PipelineContext>,
    broker: Arc<InMemoryBroker>,
    repository: Repository,
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, d, 0, 30, 0).unwrap()
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.app.env = ENV.to_string();
    config.pipeline.publishers = vec![MEDIA_ID];
    config
}

async fn repository() -> Repository {
    let pool = DbPool::in_memory().await.unwrap();
    schema::create_schema(pool.connection()).await.unwrap();
    Repository::new(pool)
}

async fn harness_with(source: StubSource, scorer: Arc<dyn Scorer>, broker: Option<Arc<dyn Broker>>) -> Harness {
    let memory = Arc::new(InMemoryBroker::recording(
        Topology::new(ENV, &[MEDIA_ID]),
        4,
        Duration::from_millis(10),
    ));
    let broker: Arc<dyn Broker> = match broker {
        Some(broker) => broker,
        None => memory.clone(),
    };

    let repository = repository().await;
    let adapter: Arc<dyn SourceAdapter> = Arc::new(source);
    let registry = PublisherRegistry::with_adapters(vec![(Publisher::Setn, adapter)]).unwrap();
    registry.seed_media(&repository).await.unwrap();

    let ctx = Arc::new(PipelineContext::new(
        Arc::new(config()),
        broker,
        repository.clone(),
        scorer,
        Arc::new(registry),
    ));

    Harness {
        ctx,
        broker: memory,
        repository,
    }
}

async fn harness() -> Harness {
    harness_with(StubSource { ids: Some(vec![]) }, Arc::new(MockScorer), None).await
}

fn save_event(news_id: &str, published_at: DateTime<Utc>) -> NewsSaveEvent {
    NewsSaveEvent {
        media_id: MEDIA_ID,
        news_id: news_id.to_string(),
        title: format!("Headline {}", news_id),
        content: format!("Body of {}", news_id),
        url: Publisher::Setn.article_url(news_id),
        author_name: "Reporter".to_string(),
        published_at,
        category: "politics".to_string(),
    }
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn store(h: &Harness, news_id: &str, published_at: DateTime<Utc>) {
    let saver = SaveNewsHandler::new(h.ctx.clone());
    assert_ok!(saver.save(save_event(news_id, published_at)).await);
}

// ============================================================================
// List scraping
// ============================================================================

#[tokio::test]
async fn test_list_scraping_publishes_one_check_event() {
    let h = harness_with(
        StubSource { ids: Some(ids(&["1500123", "1500100"])) },
        Arc::new(MockScorer),
        None,
    )
    .await;

    let handler = ListScrapingHandler::new(h.ctx.clone(), Publisher::Setn);
    assert_ok!(handler.scrape_list().await);

    let events: Vec<NewsCheckEvent> = h.broker.published_events(Topic::NewsCheck).await.unwrap();
    assert_eq!(
        events,
        vec![NewsCheckEvent {
            media_id: MEDIA_ID,
            news_id_list: ids(&["1500123", "1500100"]),
        }]
    );
}

#[tokio::test]
async fn test_list_fetch_failure_publishes_nothing() {
    let h = harness_with(StubSource { ids: None }, Arc::new(MockScorer), None).await;

    let handler = ListScrapingHandler::new(h.ctx.clone(), Publisher::Setn);
    let err = handler.scrape_list().await.unwrap_err();

    assert!(matches!(err, AppError::Scraping { .. }));
    assert!(h.broker.published(Topic::NewsCheck).await.is_empty());
}

// ============================================================================
// Existence check
// ============================================================================

#[tokio::test]
async fn test_check_emits_only_missing_ids() {
    let h = harness().await;
    store(&h, "1", day(1)).await;

    let handler = CheckExistenceHandler::new(h.ctx.clone());
    let published = handler
        .check(NewsCheckEvent {
            media_id: MEDIA_ID,
            news_id_list: ids(&["1", "2", "3"]),
        })
        .await
        .unwrap();

    assert_eq!(published, 2);
    let events: Vec<ArticleContentScrapingEvent> = h
        .broker
        .published_events(Topic::ArticleContentScraping)
        .await
        .unwrap();
    let fetched: Vec<_> = events.iter().map(|e| e.news_id.as_str()).collect();
    assert_eq!(fetched, vec!["2", "3"]);
    assert!(events.iter().all(|e| e.media_id == MEDIA_ID));
}

#[tokio::test]
async fn test_stored_ids_are_never_refetched() {
    let h = harness().await;
    for id in ["1", "2", "3"] {
        store(&h, id, day(1)).await;
    }

    let handler = CheckExistenceHandler::new(h.ctx.clone());
    let published = handler
        .check(NewsCheckEvent {
            media_id: MEDIA_ID,
            news_id_list: ids(&["3", "1", "2"]),
        })
        .await
        .unwrap();

    assert_eq!(published, 0);
    assert!(h.broker.published(Topic::ArticleContentScraping).await.is_empty());
}

#[tokio::test]
async fn test_failed_fanout_publish_does_not_abort_remaining_ids() {
    let flaky = Arc::new(FlakyBroker {
        fail_on_call: 1,
        calls: AtomicUsize::new(0),
        accepted: Mutex::new(Vec::new()),
    });
    let broker: Arc<dyn Broker> = flaky.clone();
    let h = harness_with(StubSource { ids: Some(vec![]) }, Arc::new(MockScorer), Some(broker)).await;

    let handler = CheckExistenceHandler::new(h.ctx.clone());
    let published = handler
        .check(NewsCheckEvent {
            media_id: MEDIA_ID,
            news_id_list: ids(&["a", "b", "c"]),
        })
        .await
        .unwrap();

    assert_eq!(published, 2);
    let accepted: Vec<ArticleContentScrapingEvent> = flaky
        .accepted
        .lock()
        .await
        .iter()
        .map(|p| serde_json::from_slice(p).unwrap())
        .collect();
    let fetched: Vec<_> = accepted.iter().map(|e| e.news_id.as_str()).collect();
    assert_eq!(fetched, vec!["a", "c"]);
}

#[tokio::test]
async fn test_unknown_publisher_is_rejected() {
    let h = harness().await;

    let check = CheckExistenceHandler::new(h.ctx.clone())
        .check(NewsCheckEvent {
            media_id: 1,
            news_id_list: ids(&["x"]),
        })
        .await;
    assert!(matches!(check, Err(AppError::UnknownPublisher { media_id: 1 })));

    let scrape = ContentScrapingHandler::new(h.ctx.clone())
        .scrape(ArticleContentScrapingEvent {
            media_id: 7,
            news_id: "x".to_string(),
        })
        .await;
    assert!(matches!(scrape, Err(AppError::UnknownPublisher { media_id: 7 })));

    let mut event = save_event("x", day(1));
    event.media_id = 9;
    let save = SaveNewsHandler::new(h.ctx.clone()).save(event).await;
    assert!(matches!(save, Err(AppError::UnknownPublisher { media_id: 9 })));
}

// ============================================================================
// Content scraping
// ============================================================================

#[tokio::test]
async fn test_content_scraping_publishes_save_event() {
    let h = harness().await;

    let handler = ContentScrapingHandler::new(h.ctx.clone());
    assert_ok!(
        handler
            .scrape(ArticleContentScrapingEvent {
                media_id: MEDIA_ID,
                news_id: "1500123".to_string(),
            })
            .await
    );

    let events: Vec<NewsSaveEvent> = h.broker.published_events(Topic::NewsSave).await.unwrap();
    assert_eq!(events, vec![save_event("1500123", day(1))]);
}

// ============================================================================
// Save
// ============================================================================

#[tokio::test]
async fn test_redelivered_save_is_idempotent() {
    let h = harness().await;
    let handler = SaveNewsHandler::new(h.ctx.clone());

    let first = handler.save(save_event("1500123", day(1))).await.unwrap();
    let second = handler.save(save_event("1500123", day(1))).await.unwrap();

    assert!(first.inserted);
    assert!(!second.inserted);
    assert_eq!(first.author_id, second.author_id);
    assert_eq!(h.repository.authors().count_for_media(MEDIA_ID).await.unwrap(), 1);

    let stored = h.repository.news().find_by_key("1500123", MEDIA_ID).await.unwrap().unwrap();
    assert_eq!(stored.author_id, first.author_id);
    assert_eq!(stored.title, "Headline 1500123");
}

#[tokio::test]
async fn test_failed_save_retry_reuses_one_author() {
    let h = harness().await;
    store(&h, "1", day(1)).await;
    let handler = SaveNewsHandler::new(h.ctx.clone());

    let mut clash = save_event("2", day(2));
    clash.author_name = "Desk Editor".to_string();
    clash.url = Publisher::Setn.article_url("1");
    assert_err!(handler.save(clash.clone()).await);
    assert!(h.repository.authors().find("Desk Editor", MEDIA_ID).await.unwrap().is_none());

    clash.url = Publisher::Setn.article_url("2");
    let retried = handler.save(clash.clone()).await.unwrap();
    let redelivered = handler.save(clash).await.unwrap();

    assert!(retried.inserted);
    assert_eq!(retried.author_id, redelivered.author_id);
    assert_eq!(h.repository.authors().count_for_media(MEDIA_ID).await.unwrap(), 2);
}

#[tokio::test]
async fn test_retry_after_failed_insert_keeps_committed_author() {
    let h = harness().await;
    store(&h, "1", day(1)).await;
    let committed = h.repository.authors().get_or_create("Desk Editor", MEDIA_ID).await.unwrap();
    let handler = SaveNewsHandler::new(h.ctx.clone());

    let mut event = save_event("2", day(2));
    event.author_name = "Desk Editor".to_string();
    event.url = Publisher::Setn.article_url("1");
    assert_err!(handler.save(event.clone()).await);

    event.url = Publisher::Setn.article_url("2");
    let retried = handler.save(event).await.unwrap();

    assert!(retried.inserted);
    assert_eq!(retried.author_id, committed.id);
    assert_eq!(h.repository.authors().count_for_media(MEDIA_ID).await.unwrap(), 2);
}

#[tokio::test]
async fn test_malformed_payload_is_nacked() {
    let h = harness().await;
    let handler = SaveNewsHandler::new(h.ctx.clone());

    let err = handler
        .handle(Delivery {
            message_id: "m-1".to_string(),
            topic: Topic::NewsSave,
            payload: br#"{"media_id": 2, "news_id": 5}"#.to_vec(),
            attempt: 1,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::MalformedPayload { .. }));
}

// ============================================================================
// Analysis batch
// ============================================================================

#[tokio::test]
async fn test_batch_persists_two_analyses_per_row() {
    let h = harness().await;
    store(&h, "1", day(1)).await;
    store(&h, "2", day(2)).await;

    let report = AnalysisBatchHandler::new(h.ctx.clone())
        .run_batch(AnalysisGetEvent { analysis_count: 2 })
        .await
        .unwrap();

    assert_eq!(report.selected, 2);
    assert_eq!(report.persisted, 4);
    for id in ["1", "2"] {
        for kind in [AnalysisKind::Title, AnalysisKind::Content] {
            assert_eq!(h.repository.analyses().count_for_news(id, MEDIA_ID, kind).await.unwrap(), 1);
        }
    }
}

#[tokio::test]
async fn test_scoring_failure_skips_only_that_row() {
    let h = harness_with(
        StubSource { ids: Some(vec![]) },
        Arc::new(FailOnTitle("Headline 1")),
        None,
    )
    .await;
    store(&h, "1", day(1)).await;
    store(&h, "2", day(2)).await;

    let report = AnalysisBatchHandler::new(h.ctx.clone())
        .run_batch(AnalysisGetEvent { analysis_count: 2 })
        .await
        .unwrap();

    assert_eq!(report.scored, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.persisted, 2);
    assert!(h.repository.analyses().find_for_news("1", MEDIA_ID).await.unwrap().is_empty());
    assert_eq!(h.repository.analyses().find_for_news("2", MEDIA_ID).await.unwrap().len(), 2);

    // The skipped row is picked up again by the next batch
    let pending = h.repository.news().find_unanalyzed(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].news_id, "1");
}

#[tokio::test]
async fn test_repeated_batches_keep_one_analysis_per_type() {
    let h = harness().await;
    store(&h, "1", day(1)).await;
    let handler = AnalysisBatchHandler::new(h.ctx.clone());

    let first = handler.run_batch(AnalysisGetEvent { analysis_count: 5 }).await.unwrap();
    let second = handler.run_batch(AnalysisGetEvent { analysis_count: 5 }).await.unwrap();

    assert_eq!(first.persisted, 2);
    assert_eq!(second.selected, 0);
    assert_eq!(second.persisted, 0);
    assert_eq!(
        h.repository.analyses().count_for_news("1", MEDIA_ID, AnalysisKind::Title).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_zero_count_batch_does_nothing() {
    let h = harness().await;
    store(&h, "1", day(1)).await;

    let report = AnalysisBatchHandler::new(h.ctx.clone())
        .run_batch(AnalysisGetEvent { analysis_count: 0 })
        .await
        .unwrap();

    assert_eq!(report, Default::default());
}

#[tokio::test]
async fn test_persisted_analysis_matches_scorer_reply() {
    let reply = NewsAnalytics {
        title_analytics: Analytics {
            score: 7.456,
            reason: "Clear and factual".to_string(),
            metric_list: vec![
                MetricScore {
                    metric_key: "Clarity".to_string(),
                    score: 8.0,
                    reason: "plain wording".to_string(),
                },
                MetricScore {
                    metric_key: "accuracy".to_string(),
                    score: 7.5,
                    reason: "matches body".to_string(),
                },
            ],
        },
        content_analytics: Analytics {
            score: 6.0,
            reason: "Thin sourcing".to_string(),
            metric_list: vec![MetricScore {
                metric_key: "timeliness".to_string(),
                score: 9.0,
                reason: "same day".to_string(),
            }],
        },
    };
    let h = harness_with(StubSource { ids: Some(vec![]) }, Arc::new(FixedScorer(reply)), None).await;
    store(&h, "1", day(1)).await;

    AnalysisBatchHandler::new(h.ctx.clone())
        .run_batch(AnalysisGetEvent { analysis_count: 1 })
        .await
        .unwrap();

    let stored = h.repository.analyses().find_for_news("1", MEDIA_ID).await.unwrap();
    let title = stored.iter().find(|a| a.analysis.kind == AnalysisKind::Title).unwrap();
    let content = stored.iter().find(|a| a.analysis.kind == AnalysisKind::Content).unwrap();

    assert_eq!(title.analysis.score.round_dp(2), Decimal::new(746, 2));
    assert_eq!(title.analysis.reason, "Clear and factual");
    let keys: Vec<_> = title.metrics.iter().map(|m| m.metric_key.as_str()).collect();
    assert_eq!(keys, vec!["accuracy", "clarity"]);
    assert_eq!(title.metrics[1].reason, "plain wording");

    assert_eq!(content.analysis.score.round_dp(2), Decimal::new(600, 2));
    assert_eq!(content.metrics.len(), 1);
    assert_eq!(content.metrics[0].score.round_dp(2), Decimal::new(900, 2));
}

// ============================================================================
// Wiring
// ============================================================================

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_triggers_drive_articles_through_every_stage() {
    let h = harness_with(
        StubSource { ids: Some(ids(&["1500123", "1500100"])) },
        Arc::new(MockScorer),
        None,
    )
    .await;
    let shutdown = CancellationToken::new();
    let consumers = start_consumers(h.ctx.clone(), shutdown.clone()).await.unwrap();
    assert_eq!(consumers.len(), 5);

    assert_ok!(trigger_list_scraping(h.broker.as_ref()).await);
    let repository = &h.repository;
    eventually("articles to be saved", || async move {
        repository.news().find_by_key("1500123", MEDIA_ID).await.unwrap().is_some()
            && repository.news().find_by_key("1500100", MEDIA_ID).await.unwrap().is_some()
    })
    .await;

    assert_ok!(trigger_analysis_batch(h.broker.as_ref(), 2).await);
    eventually("analyses to be persisted", || async move {
        repository.news().find_unanalyzed(10).await.unwrap().is_empty()
    })
    .await;

    for id in ["1500123", "1500100"] {
        assert_eq!(repository.analyses().find_for_news(id, MEDIA_ID).await.unwrap().len(), 2);
    }

    shutdown.cancel();
    for consumer in consumers {
        assert_ok!(consumer.await);
    }
}

#[tokio::test]
async fn test_consumers_fail_to_start_when_broker_refuses() {
    let flaky: Arc<dyn Broker> = Arc::new(FlakyBroker {
        fail_on_call: usize::MAX,
        calls: AtomicUsize::new(0),
        accepted: Mutex::new(Vec::new()),
    });
    let h = harness_with(StubSource { ids: Some(vec![]) }, Arc::new(MockScorer), Some(flaky)).await;

    let err = start_consumers(h.ctx.clone(), CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AppError::QueueError { .. }));
}
