use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use broker_assist::channels::{
    DryRunGateway, HttpGateway, OutboundGateway, WebhookState, webhook_routes,
};
use broker_assist::clock::{Clock, SystemClock};
use broker_assist::config::{AppConfig, GeneratorConfig, RateLimitScope};
use broker_assist::error::{ChannelError, ConfigError};
use broker_assist::media::{HttpEnricher, MediaEnricher, NoopEnricher};
use broker_assist::pipeline::{AdmissionClassifier, Orchestrator};
use broker_assist::queue::{QueueWorker, spawn_worker_loop};
use broker_assist::reply::{LlmReplyGenerator, ReplyGenerator};
use broker_assist::store::LibSqlBackend;

/// Log to stderr, and to a daily rolling file when `log_dir` is set.
///
/// The returned guard must be held until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "broker-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = std::env::var("BROKER_ASSIST_LOG_DIR").ok().map(PathBuf::from);
    let _log_guard = init_tracing(log_dir.as_deref())?;

    let config = AppConfig::from_env()?;
    let generator_config = GeneratorConfig::from_env()?;

    eprintln!("🏠 Broker Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", generator_config.model);
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", config.port);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!(
        "   Queue: tick {}s, cooldown {}s ({}), max retries {}",
        config.queue.tick_interval.as_secs(),
        config.queue.rate_limit_interval.as_secs(),
        match config.queue.rate_limit_scope {
            RateLimitScope::Global => "global",
            RateLimitScope::PerCounterparty => "per counterparty",
        },
        config.queue.max_retries,
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);

    // ── Collaborators ───────────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let enricher: Arc<dyn MediaEnricher> = match &config.extractor_url {
        Some(url) => {
            eprintln!("   Media extractor: {url}");
            Arc::new(HttpEnricher::new(url.clone()))
        }
        None => {
            eprintln!("   Media extractor: disabled (fallback text only)");
            Arc::new(NoopEnricher)
        }
    };

    let gateway: Arc<dyn OutboundGateway> = match config.gateway.clone() {
        Some(gateway_config) => {
            eprintln!("   Gateway: {}", gateway_config.send_url);
            Arc::new(HttpGateway::new(gateway_config))
        }
        None => {
            warn!("BROKER_ASSIST_GATEWAY_URL not set, replies will only be logged");
            eprintln!("   Gateway: dry-run");
            Arc::new(DryRunGateway)
        }
    };

    let generator: Arc<dyn ReplyGenerator> =
        Arc::new(LlmReplyGenerator::new(generator_config, db.clone()));

    // ── Pipeline ────────────────────────────────────────────────────────
    let classifier = AdmissionClassifier::new(db.clone(), &config.admission);
    let orchestrator = Arc::new(Orchestrator::new(
        classifier,
        db.clone(),
        db.clone(),
        db.clone(),
        enricher,
        config.media_fallback.clone(),
        config.queue.max_retries,
    ));

    // ── Queue worker ────────────────────────────────────────────────────
    let worker = Arc::new(QueueWorker::new(
        db.clone(),
        db.clone(),
        generator,
        gateway,
        clock,
        config.queue.clone(),
    ));
    let recovered = worker.recover_stale_jobs().await?;
    if recovered > 0 {
        eprintln!("   Recovered {recovered} interrupted job(s)");
    }
    let (worker_handle, worker_shutdown) = spawn_worker_loop(Arc::clone(&worker));

    // ── Webhook server ──────────────────────────────────────────────────
    let app = webhook_routes(WebhookState {
        orchestrator,
        jobs: db.clone(),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "webhook".into(),
            reason: e.to_string(),
        })?;
    info!(port = config.port, "Webhook server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker_shutdown.store(true, Ordering::Relaxed);
    let grace = config.queue.tick_interval + Duration::from_secs(5);
    if tokio::time::timeout(grace, worker_handle).await.is_err() {
        warn!("Queue worker did not stop in time; an interrupted job is retried on next start");
    }

    Ok(())
}
