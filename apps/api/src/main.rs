mod analysis;
mod config;
mod db;
mod errors;
mod llm_client;
mod models;
mod routes;
mod sanitize;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::aggregator::AggregatorSettings;
use crate::analysis::classify::{Classifier, HeadingClassifier, LlmClassifier};
use crate::analysis::collaborators::{LogNotifier, Notifier, PgCollaborators, WebhookNotifier};
use crate::analysis::controller::AnalysisController;
use crate::analysis::inference::LlmInference;
use crate::analysis::lease::RedisLeaseStore;
use crate::analysis::lock::{CancellationFlags, LockService};
use crate::analysis::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::analysis::store::PgAnalysisStore;
use crate::analysis::worker::AnalysisWorker;
use crate::config::{ClassifierKind, Config};
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting analysis API v{}", env!("CARGO_PKG_VERSION"));

    let settings = &config.analysis;
    let pool_size = settings.pool_size();

    // Initialize PostgreSQL (one connection per worker plus headroom for the API)
    let db = create_pool(&config.database_url, pool_size as u32 + 5).await?;

    // Initialize Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    let leases = Arc::new(RedisLeaseStore::new(redis));
    info!("Redis client initialized");

    // Initialize LLM client
    let llm = LlmClient::new(
        config.anthropic_api_key.clone(),
        settings.inference_timeout,
        settings.llm_max_retries,
    )?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let classifier: Arc<dyn Classifier> = match settings.classifier {
        ClassifierKind::Heading => Arc::new(HeadingClassifier),
        ClassifierKind::Llm => Arc::new(LlmClassifier(llm.clone())),
    };
    info!("Resume classifier: {:?}", settings.classifier);

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => {
            info!("Batch-complete notifications go to webhook");
            Arc::new(WebhookNotifier::new(url.clone())?)
        }
        None => Arc::new(LogNotifier),
    };

    // Wire the analysis core
    let collaborators = Arc::new(PgCollaborators::new(db.clone()));
    let store = Arc::new(PgAnalysisStore::new(db));
    let locks = LockService::new(leases.clone());
    let cancellation = CancellationFlags::new(leases, settings.cancel_ttl);

    let worker = AnalysisWorker::new(
        collaborators.clone(),
        classifier,
        Arc::new(LlmInference::new(llm)),
        settings.inference_timeout,
    );
    let orchestrator = Orchestrator::new(
        worker,
        store.clone(),
        locks.clone(),
        cancellation.clone(),
        notifier,
        OrchestratorSettings {
            pool_size,
            lock_ttl: settings.lock_ttl,
            renew_interval: settings.lock_renew_interval,
            cancel_poll_interval: settings.cancel_poll_interval,
            transient_retries: settings.transient_retries,
            aggregator: AggregatorSettings {
                batch_size: settings.batch_size,
                flush_interval: settings.flush_interval,
                ..AggregatorSettings::default()
            },
        },
    );
    info!("Analysis worker pool size: {pool_size}");

    let state = AppState {
        analysis: AnalysisController::new(collaborators, store, locks, cancellation, orchestrator),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the admin UI host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
