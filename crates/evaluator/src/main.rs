use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tripwire_evaluator::alarm::load_definitions;
use tripwire_evaluator::api::{self, ApiState};
use tripwire_evaluator::cache::AlarmCache;
use tripwire_evaluator::config::EvaluatorConfig;
use tripwire_evaluator::dispatch::{ActionDispatcher, DefaultExecutor};
use tripwire_evaluator::metrics::EngineMetrics;
use tripwire_evaluator::shutdown::wait_for_shutdown;
use tripwire_evaluator::store::{InMemoryStore, PgStore, Store, create_pool, migrator};
use tripwire_evaluator::EvaluationEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = EvaluatorConfig::load()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.db_max_connections).await?;
            let applied = migrator::run_migrations(&pool).await?;
            tracing::info!(applied = applied.len(), "database ready");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("no database_url configured, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let metrics = EngineMetrics::new();
    let secret = config.webhook_secret.as_ref().map(|s| s.as_bytes().to_vec());
    let executor = Arc::new(DefaultExecutor::new(config.webhook_timeout(), secret)?);
    let engine = Arc::new(
        EvaluationEngine::new(
            store,
            Arc::new(AlarmCache::new()),
            ActionDispatcher::new(executor, metrics.clone()),
            metrics,
        )
        .with_policy(config.window_policy)
        .with_retry(config.store_retry()),
    );

    if let Some(path) = &config.alarms_file {
        let definitions = load_definitions(path)?;
        let added = engine.seed(definitions).await?;
        tracing::info!(path = %path.display(), added, "seeded alarm definitions");
    }
    let loaded = engine.reload().await?;
    tracing::info!(alarms = loaded, policy = ?config.window_policy, "alarm cache loaded");

    let listener = tokio::net::TcpListener::bind(&config.api_addr).await?;
    tracing::info!(api_addr = %config.api_addr, "evaluator API server starting");
    api::serve(
        listener,
        ApiState {
            engine: engine.clone(),
        },
        wait_for_shutdown(),
    )
    .await?;

    engine.shutdown();
    Ok(())
}
