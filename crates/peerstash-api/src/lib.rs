//! peerstash-api: local HTTP control plane for a peer.

pub mod control;
pub mod handlers;
pub mod report;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use control::{ControlFuture, PeerControl};
pub use handlers::ApiState;
pub use report::{BackedUpFile, ChunkReplication, StateReport, StoredChunk};

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/backup", post(handlers::handle_backup))
        .route("/restore", post(handlers::handle_restore))
        .route("/delete", post(handlers::handle_delete))
        .route("/reclaim", post(handlers::handle_reclaim))
        .route("/capacity", post(handlers::handle_capacity))
        .route("/state", get(handlers::handle_state))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
