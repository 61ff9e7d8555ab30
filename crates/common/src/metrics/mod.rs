//! Metrics and observability utilities
//!
//! Prometheus metrics for the pipeline with standardized naming. Recording is
//! a no-op until a recorder is installed, so library code and tests can call
//! these helpers freely.

use crate::queue::Topic;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all MediaWatch metrics
pub const METRICS_PREFIX: &str = "mediawatch";

/// Buckets for handler latency (in seconds)
pub const HANDLER_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00, 30.00,
];

/// Buckets for scoring latency (model calls are slow)
pub const SCORING_BUCKETS: &[f64] = &[
    0.250, 0.500, 1.000, 2.000, 5.000, 10.00, 20.00, 30.00, 60.00,
];

/// Bucket layout of every histogram, keyed by full metric name
pub fn histogram_buckets() -> Vec<(String, &'static [f64])> {
    vec![
        (format!("{}_handler_duration_seconds", METRICS_PREFIX), HANDLER_BUCKETS),
        (format!("{}_scoring_duration_seconds", METRICS_PREFIX), SCORING_BUCKETS),
    ]
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Broker metrics
    describe_counter!(
        format!("{}_messages_total", METRICS_PREFIX),
        Unit::Count,
        "Messages handled per topic and outcome (ack, nack)"
    );

    describe_histogram!(
        format!("{}_handler_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Handler latency in seconds"
    );

    describe_counter!(
        format!("{}_fanout_publish_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Per-item publishes that failed during fan-out"
    );

    // Persistence metrics
    describe_counter!(
        format!("{}_articles_saved_total", METRICS_PREFIX),
        Unit::Count,
        "Save-stage outcomes per media (inserted, present)"
    );

    describe_counter!(
        format!("{}_analyses_persisted_total", METRICS_PREFIX),
        Unit::Count,
        "Analyses created by the batch stage"
    );

    // Scoring metrics
    describe_counter!(
        format!("{}_scoring_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Scoring requests per model and outcome"
    );

    describe_histogram!(
        format!("{}_scoring_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Scoring latency in seconds"
    );

    describe_counter!(
        format!("{}_scoring_sessions_created_total", METRICS_PREFIX),
        Unit::Count,
        "Primed scoring sessions created"
    );

    tracing::info!("Metrics registered");
}

/// Record one handled message
pub fn record_message(topic: Topic, outcome: &'static str, duration_secs: f64) {
    counter!(
        format!("{}_messages_total", METRICS_PREFIX),
        "topic" => topic.as_str(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        format!("{}_handler_duration_seconds", METRICS_PREFIX),
        "topic" => topic.as_str()
    )
    .record(duration_secs);
}

/// Record a failed publish inside a fan-out
pub fn record_fanout_failure(topic: Topic) {
    counter!(
        format!("{}_fanout_publish_failures_total", METRICS_PREFIX),
        "topic" => topic.as_str()
    )
    .increment(1);
}

/// Record a save-stage outcome
pub fn record_article_saved(media_id: i32, inserted: bool) {
    let outcome = if inserted { "inserted" } else { "present" };

    counter!(
        format!("{}_articles_saved_total", METRICS_PREFIX),
        "media" => media_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record analyses created by one batch
pub fn record_analyses_persisted(count: usize) {
    counter!(format!("{}_analyses_persisted_total", METRICS_PREFIX)).increment(count as u64);
}

/// Record one scoring request
pub fn record_scoring(model: &str, outcome: &'static str, duration_secs: f64) {
    counter!(
        format!("{}_scoring_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    if outcome == "success" {
        histogram!(
            format!("{}_scoring_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Record a primed session creation
pub fn record_session_created() {
    counter!(format!("{}_scoring_sessions_created_total", METRICS_PREFIX)).increment(1);
}
