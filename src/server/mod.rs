//! HTTP command boundary in front of the active sandbox provider.

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use state::{AppState, ProviderFactory};

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::SandpitConfig;
use crate::error::{Result, SandpitError};

/// The sandpit HTTP server.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: SandpitConfig) -> Self {
        Self {
            state: AppState::new(config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(routes::health))
            .nest("/api", Self::api_routes())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    fn api_routes() -> Router<AppState> {
        Router::new()
            .route(
                "/sandbox",
                post(routes::create_sandbox).delete(routes::terminate_sandbox),
            )
            .route("/sandbox-status", get(routes::sandbox_status))
            .route("/run-command", post(routes::run_command))
            .route("/files", post(routes::write_file).get(routes::read_file))
            .route("/files/list", get(routes::list_files))
            .route("/packages", post(routes::install_packages))
            .route("/dev-server-status", get(routes::dev_server_status))
            .route("/dev-server/restart", post(routes::restart_dev_server))
    }

    /// Run the server on the configured bind address.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = self.state.config.server.bind_addr.parse().map_err(|e| {
            SandpitError::Config(format!(
                "Invalid bind address '{}': {}",
                self.state.config.server.bind_addr, e
            ))
        })?;
        self.run_on(addr).await
    }

    /// Run the server on a specific address.
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let router = self.router();
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Starting sandpit server");

        let shutdown_state = self.state.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;

        // Don't leave a paid sandbox running after shutdown.
        if let Some(provider) = shutdown_state.manager.clear() {
            info!(provider = %provider.name(), "Terminating active sandbox");
            provider.terminate().await?;
        }
        Ok(())
    }
}
