//! MediaWatch Pipeline Worker
//!
//! Runs every stage consumer:
//! 1. Loads configuration and installs tracing and metrics
//! 2. Connects to the database, optionally bootstrapping the schema
//! 3. Seeds media rows for the enabled publishers
//! 4. Subscribes all stage handlers and runs until a shutdown signal
//!
//! With the in-memory broker no other process can reach the consumers, so the
//! worker also runs the trigger schedule itself.

use mediawatch_common::{
    config::{AppConfig, BrokerProvider},
    db::{schema, DbPool},
    metrics,
    queue::create_broker,
    scoring::create_scorer,
    telemetry, Repository, VERSION,
};
use mediawatch_pipeline::{
    run_schedule, shutdown_signal, start_consumers, PipelineContext, PublisherRegistry,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    // Initialize tracing
    telemetry::init_tracing(&config.observability)?;

    info!(
        env = %config.app.env,
        service = %config.observability.service_name,
        "Starting MediaWatch pipeline worker v{}", VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        for (name, buckets) in metrics::histogram_buckets() {
            builder = builder.set_buckets_for_metric(Matcher::Full(name), buckets)?;
        }
        builder.install()?;
        info!(%addr, "Prometheus exporter listening");
    }
    metrics::register_metrics();

    // Validate publishers before touching any external system
    let registry = Arc::new(PublisherRegistry::from_config(
        &config.pipeline.publishers,
        &config.scraper,
    )?);

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    if config.pipeline.bootstrap_schema {
        schema::create_schema(db.connection()).await?;
    }
    let repository = Repository::new(db);
    registry.seed_media(&repository).await?;

    // Initialize broker and scorer
    let broker = create_broker(&config).await?;
    let scorer = create_scorer(&config.scoring)?;
    info!(model = %scorer.model_name(), "Scorer initialized");

    let ctx = Arc::new(PipelineContext::new(
        config.clone(),
        broker,
        repository,
        scorer,
        registry,
    ));

    let shutdown = CancellationToken::new();
    let mut tasks = start_consumers(ctx.clone(), shutdown.clone()).await?;

    if config.broker.provider == BrokerProvider::Memory {
        info!("In-memory broker, scheduling triggers in-process");
        tasks.push(tokio::spawn(run_schedule(
            ctx.broker.clone(),
            config.pipeline.clone(),
            shutdown.clone(),
        )));
    }

    shutdown_signal().await;
    shutdown.cancel();

    // In-flight handlers finish; anything unacked is redelivered later
    futures::future::join_all(tasks).await;

    info!("Worker shutdown complete");
    Ok(())
}
