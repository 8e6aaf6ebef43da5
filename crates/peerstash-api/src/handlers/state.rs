use axum::extract::State;
use axum::Json;

use super::ApiState;
use crate::report::StateReport;

// ── /state ────────────────────────────────────────────────────────────────────

pub async fn handle_state(State(state): State<ApiState>) -> Json<StateReport> {
    Json(state.control.state())
}
