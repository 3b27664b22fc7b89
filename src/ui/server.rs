//! HTTP server setup

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::error::{Error, Result};
use crate::session::SessionController;
use crate::ui::{handlers, websocket};

/// Largest accepted frame upload
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// State shared by every handler
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub started_at: Instant,
}

/// Control API server
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, controller: Arc<SessionController>) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                controller,
                started_at: Instant::now(),
            }),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/devices", get(handlers::get_devices))
            .route(
                "/api/trackers",
                get(handlers::get_trackers).delete(handlers::clear_trackers),
            )
            .route("/api/trackers/:id", delete(handlers::delete_tracker))
            .route("/api/session/start", post(handlers::start_session))
            .route("/api/session/stop", post(handlers::stop_session))
            .route(
                "/api/frames",
                post(handlers::submit_frame).layer(DefaultBodyLimit::max(MAX_FRAME_BYTES)),
            )
            .route("/ws", get(websocket::ws_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid control API address: {}", e)))
    }

    /// Serve until the task is dropped or the listener fails
    pub async fn run(self) -> Result<()> {
        let addr = self.bind_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Control API listening on http://{}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Run in a background task
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Control API error: {}", e);
            }
        })
    }
}
