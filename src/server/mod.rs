//! HTTP control surface: `/start`, `/stop`, `/models`, `/ws` and the static
//! `/downloads` namespace over the artifact directory.

mod routes;
mod state;
mod ws;

pub use state::AppState;

use std::net::SocketAddr;

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::run::RunController;

pub fn build_router(state: AppState) -> Router {
    let downloads = ServeDir::new(state.config.artifacts_dir.clone());
    Router::new()
        .route("/start", post(routes::start))
        .route("/stop", post(routes::stop))
        .route("/models", get(routes::models))
        .route("/ws", any(ws::handler))
        .nest_service("/downloads", downloads)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bring up the control surface and block until shutdown.
pub async fn serve(config: AppConfig, port: u16) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.artifacts_dir)?;
    let events = EventBus::default();
    let controller = RunController::new(config.clone(), events);
    let state = AppState::new(controller, config);
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control surface listening");
    axum::serve(listener, router).await?;
    Ok(())
}
