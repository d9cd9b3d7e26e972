//! Axum server setup and process wiring.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use pagesmith_core::queue::memory::MemoryQueue;
use pagesmith_core::store::memory::MemoryStore;
use pagesmith_core::store::StateStore;
use pagesmith_core::{Orchestrator, SqliteStore, WorkerPool};

use crate::adapters::{CommandConverter, CommandSplitter, HttpFetcher};
use crate::api;
use crate::config::ServerConfig;
use crate::state::AppState;

/// Build the API router for the given state.
pub fn router(state: AppState) -> Router {
    // Multipart framing overhead on top of the document itself.
    let body_limit = state.engine.config().max_file_size_bytes() as usize + 64 * 1024;

    Router::new()
        .route("/upload", post(api::jobs::upload))
        .route("/convert", post(api::jobs::convert))
        .route("/jobs", get(api::jobs::list_jobs))
        .route(
            "/jobs/:id",
            get(api::jobs::get_job).delete(api::jobs::delete_job),
        )
        .route("/jobs/:id/result", get(api::jobs::get_result))
        .route("/jobs/:id/pages", get(api::pages::list_pages))
        .route("/jobs/:id/pages/:page/status", get(api::pages::page_status))
        .route("/jobs/:id/pages/:page/result", get(api::pages::page_result))
        .route("/jobs/:id/pages/:page/retry", post(api::pages::retry_page))
        .route("/health", get(api::health::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire the store, queue, engine and worker pool, then serve until ctrl-c.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let store: Arc<dyn StateStore> = if config.db_path == "memory" {
        info!("using in-memory state store");
        Arc::new(MemoryStore::new(config.engine.status_ttl()))
    } else {
        info!(path = %config.db_path, "opening sqlite state store");
        Arc::new(SqliteStore::open(&config.db_path, config.engine.status_ttl()).await?)
    };

    let queue = Arc::new(MemoryQueue::new(config.engine.retry_policy()));
    let fetcher = Arc::new(HttpFetcher::new(config.engine.max_file_size_bytes()));
    let converter = Arc::new(CommandConverter::new(config.convert_command.clone()));
    let splitter = Arc::new(CommandSplitter::new(
        config.split_command.clone(),
        config.page_count_command.clone(),
    ));

    let engine = Arc::new(Orchestrator::new(
        store.clone(),
        queue.clone(),
        fetcher,
        converter,
        splitter,
        config.engine.clone(),
    ));

    let pool = WorkerPool::spawn(
        engine.clone(),
        queue.clone(),
        config.engine.worker_concurrency,
    );
    info!(workers = pool.worker_count(), "worker pool online");

    // Expired records only ever leave through TTL; sweep periodically so
    // the store does not accumulate dead jobs between reads.
    let sweeper_store = store.clone();
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            match sweeper_store.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "swept expired records"),
                Err(err) => tracing::warn!(error = %err, "sweep failed"),
            }
        }
    });

    let workers = pool.worker_count();
    let state = AppState::new(engine, store, config.clone(), workers);
    let app = router(state);

    let addr = config.bind_addr();
    info!("pagesmith listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    sweeper.abort();
    queue.close();
    pool.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
