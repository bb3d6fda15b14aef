use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use git_http::{GitExecutor, GitHttpState, RepositorySettings};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::metrics_exporter::render_metrics;

/// Shared handler state: repository settings plus the transport executor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    executor: GitExecutor,
    settings: RepositorySettings,
    git_semaphore: Arc<Semaphore>,
    allow_push: bool,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                executor: GitExecutor,
                settings: config.repository_settings(),
                git_semaphore: Arc::new(Semaphore::new(config.max_concurrent_services)),
                allow_push: config.allow_push,
            }),
        }
    }
}

impl GitHttpState for AppState {
    type Executor = GitExecutor;

    fn executor(&self) -> &GitExecutor {
        &self.inner.executor
    }

    fn settings(&self) -> &RepositorySettings {
        &self.inner.settings
    }

    fn git_semaphore(&self) -> &Arc<Semaphore> {
        &self.inner.git_semaphore
    }

    fn allow_push(&self) -> bool {
        self.inner.allow_push
    }
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .merge(git_http::router(state))
        .layer(TraceLayer::new_for_http())
}

/// Create the storage roots so the first request does not race on them.
pub async fn prepare_storage(config: &Config) -> Result<()> {
    for root in [&config.repositories_root, &config.clones_root] {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create {}", root.display()))?;
    }
    Ok(())
}

pub async fn run_api(config: Config, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    serve(listener, AppState::new(&config), shutdown).await
}

/// Serve on an already bound listener until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, build_api_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
