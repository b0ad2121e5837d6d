// HTTP facade - REST endpoints over the supervisor

pub mod client;
mod error;
pub mod handlers;
pub mod protocol;

pub use client::ApiClient;
pub use error::ApiError;
pub use handlers::AppState;

use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Default address of the REST API
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;

/// Build the router with CORS open to every origin
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/api/health", get(handlers::health))
        .route("/api/status", get(handlers::status))
        .route("/api/start", post(handlers::start))
        .route("/api/stop", post(handlers::stop))
        .route("/api/restart", post(handlers::restart))
        .route("/api/detect_python", get(handlers::detect))
        .route("/api/save_config", post(handlers::save_config))
        .route("/api/load_config", get(handlers::load_config))
        .route("/api/ai/ask", post(handlers::ai_ask))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "HTTP API listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
