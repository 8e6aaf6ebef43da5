//! HTTP API handlers. Each maps a request onto one [`PeerControl`] call.

pub mod ops;
pub mod state;

use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;

use crate::control::PeerControl;

#[derive(Clone)]
pub struct ApiState {
    pub control: Arc<dyn PeerControl>,
}

/// The status line an operation answered with.
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn operation_result(
    op: &'static str,
    result: anyhow::Result<String>,
) -> Result<axum::Json<StatusResponse>, (StatusCode, String)> {
    match result {
        Ok(status) => Ok(axum::Json(StatusResponse { status })),
        Err(e) => {
            tracing::warn!(op, error = %e, "operation failed");
            Err((StatusCode::UNPROCESSABLE_ENTITY, format!("{:#}", e)))
        }
    }
}

pub use ops::{handle_backup, handle_capacity, handle_delete, handle_reclaim, handle_restore};
pub use state::handle_state;
