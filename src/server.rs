//! Dashboard HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, middleware, response::IntoResponse, routing::get};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

use crate::auth::{AuthProvider, Identity, require_auth};
use crate::config::Config;
use crate::{Error, Result};

/// Build the dashboard router.
///
/// `/health` is public. `/` and `/api/*` pass through the provider's gate.
/// The provider's own routes (`/auth/...`) are mounted ungated.
pub fn create_router(provider: Arc<dyn AuthProvider>) -> Router {
    let protected = Router::new()
        .route("/", get(index_handler))
        .route("/api/me", get(me_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&provider), require_auth));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .merge(provider.routes())
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn index_handler(identity: Identity) -> impl IntoResponse {
    format!("Signed in as {}", identity.username)
}

async fn me_handler(identity: Identity) -> Json<Identity> {
    Json(identity)
}

/// The dashboard server
pub struct DashboardServer {
    config: Config,
    provider: Arc<dyn AuthProvider>,
}

impl DashboardServer {
    /// Create a server around an already-built provider
    #[must_use]
    pub fn new(config: Config, provider: Arc<dyn AuthProvider>) -> Self {
        Self { config, provider }
    }

    /// Run until Ctrl+C or SIGTERM, then stop the provider's background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the listener cannot bind.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.provider));
        let listener = TcpListener::bind(addr).await?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            host = %self.config.server.host,
            port = self.config.server.port,
            provider = self.provider.name(),
            "Dashboard listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.provider.shutdown();
        info!("Dashboard stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
