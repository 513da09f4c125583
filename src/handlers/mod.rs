//! HTTP request handlers for zrelay

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::gateway::Runtime;
use crate::metrics::Metrics;
use crate::middleware::{request_id_middleware, require_admin_key, require_api_key};
use arc_swap::ArcSwap;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod health;
pub mod metrics;
pub mod openai;

/// Application state shared across all handlers
///
/// The runtime (config, pool, translator, client) sits behind an `ArcSwap`
/// so a reload replaces it atomically. Handlers take a snapshot with
/// [`AppState::runtime`] and keep it for the whole request.
#[derive(Clone)]
pub struct AppState {
    runtime: Arc<ArcSwap<Runtime>>,
    metrics: Metrics,
    config_path: Option<Arc<PathBuf>>,
}

impl AppState {
    /// Build state from configuration and start the credential pool
    ///
    /// # Errors
    /// Returns an error if metrics registration or the runtime build fails.
    pub fn new(config: Config) -> AppResult<Self> {
        let metrics = Metrics::new()
            .map_err(|e| AppError::Internal(format!("failed to register metrics: {}", e)))?;
        let runtime = Runtime::build(config, &metrics)?;
        runtime.start();

        Ok(Self {
            runtime: Arc::new(ArcSwap::from_pointee(runtime)),
            metrics,
            config_path: None,
        })
    }

    /// Remember where the config came from, enabling `/admin/reload`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(Arc::new(path.into()));
        self
    }

    /// Current runtime snapshot
    pub fn runtime(&self) -> Arc<Runtime> {
        self.runtime.load_full()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Swap in a runtime built from `config`
    ///
    /// Requests already running keep their old runtime and the credential
    /// leases they hold on its pool.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the runtime cannot be built.
    /// The current runtime stays in place in that case.
    pub fn apply_config(&self, config: Config) -> AppResult<()> {
        config.validate()?;

        let current = self.runtime();
        let old_server = &current.config().server;
        if old_server.host != config.server.host || old_server.port != config.server.port {
            tracing::warn!(
                old_host = %old_server.host,
                old_port = old_server.port,
                new_host = %config.server.host,
                new_port = config.server.port,
                "Listener address changed; restart required for it to take effect"
            );
        }

        let runtime = Runtime::build(config, &self.metrics)?;
        runtime.start();
        self.runtime.store(Arc::new(runtime));

        tracing::info!("Configuration applied");
        Ok(())
    }

    /// Re-read the config file and apply it
    ///
    /// # Errors
    /// Returns an error if no config path is known, or the file fails to load.
    pub async fn reload_from_disk(&self) -> AppResult<()> {
        let path = self.config_path.clone().ok_or_else(|| {
            AppError::Config("no config file path is known; cannot reload".to_string())
        })?;
        // File I/O and parsing stay off the async workers
        let config = tokio::task::spawn_blocking(move || Config::from_file(path.as_path()))
            .await
            .map_err(|e| AppError::Internal(format!("config reload task failed: {}", e)))??;
        self.apply_config(config)
    }
}

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route(
            "/v1/chat/completions",
            post(openai::completions::handler),
        )
        .route("/v1/models", get(openai::models::handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let admin = Router::new()
        .route("/admin/credentials", get(admin::credentials))
        .route("/admin/credentials/refresh", post(admin::refresh))
        .route("/admin/credentials/{id}/test", post(admin::test_credential))
        .route("/admin/reload", post(admin::reload))
        .route("/admin/config", get(admin::config))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_key,
        ));

    Router::new()
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .merge(v1)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
