//! HTTP surface and process lifecycle.
//!
//! - [`AppContext`]: explicitly constructed handles shared by every request
//! - [`create_router`]: routes and tracing middleware
//! - [`listener`]: bind (plain or TLS), serve, drain on shutdown

pub mod listener;
pub mod tls;

use std::sync::Arc;

use axum::{
    Json, Router,
    response::IntoResponse,
    routing::{any, get},
};
use tower_http::trace::TraceLayer;

use crate::config::{Config, oauth::TOKEN_PATH};
use crate::error::StoreResult;
use crate::oauth::{GrantDispatcher, TokenMinter, handlers};
use crate::store::IdentityStore;
pub use listener::{ConnectionTracker, ExitStatus, Listener, Server};

/// Handles shared by all requests.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub store: IdentityStore,
    pub dispatcher: GrantDispatcher,
}

impl AppContext {
    /// Build a context around `store` with the default minter.
    #[must_use]
    pub fn new(store: IdentityStore) -> Self {
        let minter = TokenMinter::new(store.clone());
        Self::with_minter(store, minter)
    }

    /// Build a context with a caller-supplied minter.
    #[must_use]
    pub fn with_minter(store: IdentityStore, minter: TokenMinter) -> Self {
        let dispatcher = GrantDispatcher::new(store.clone(), minter);
        Self { store, dispatcher }
    }

    /// Open the configured database and build a context on it.
    pub fn from_config(config: &Config) -> StoreResult<Self> {
        let store = IdentityStore::open(&config.database.path)?;
        let minter = TokenMinter::new(store.clone()).with_lifetime(config.token_lifetime);
        Ok(Self::with_minter(store, minter))
    }
}

/// Create the HTTP router.
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(TOKEN_PATH, any(handlers::handle_token))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "oauth-token-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Received shutdown signal");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn test_health() {
        let ctx = Arc::new(AppContext::new(IdentityStore::in_memory().unwrap()));
        let response = create_router(ctx)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_context_from_config_uses_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_testing(&dir.path().join("oauth.redb"));
        config.token_lifetime = std::time::Duration::from_secs(90);
        let ctx = AppContext::from_config(&config).unwrap();
        assert_eq!(ctx.dispatcher.token_lifetime().as_secs(), 90);
    }
}
