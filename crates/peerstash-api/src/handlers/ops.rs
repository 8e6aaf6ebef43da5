//! /backup, /restore, /delete, /reclaim, /capacity handlers.

use std::path::PathBuf;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use peerstash_core::config::parse_size;

use super::{operation_result, ApiState, StatusResponse};

type OpResult = Result<Json<StatusResponse>, (StatusCode, String)>;

// ── /backup (POST) ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BackupRequest {
    pub path: PathBuf,
    pub replication_degree: u8,
}

pub async fn handle_backup(State(state): State<ApiState>, Json(req): Json<BackupRequest>) -> OpResult {
    if req.replication_degree == 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "replication_degree must be at least 1".to_string(),
        ));
    }
    operation_result(
        "backup",
        state.control.backup(req.path, req.replication_degree).await,
    )
}

// ── /restore, /delete (POST) ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PathRequest {
    pub path: PathBuf,
}

pub async fn handle_restore(State(state): State<ApiState>, Json(req): Json<PathRequest>) -> OpResult {
    operation_result("restore", state.control.restore(req.path).await)
}

pub async fn handle_delete(State(state): State<ApiState>, Json(req): Json<PathRequest>) -> OpResult {
    operation_result("delete", state.control.delete(req.path).await)
}

// ── /reclaim (POST) ───────────────────────────────────────────────────────────

pub async fn handle_reclaim(State(state): State<ApiState>) -> OpResult {
    operation_result("reclaim", state.control.reclaim().await)
}

// ── /capacity (POST) ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CapacityRequest {
    /// Byte count with optional k/m/g suffix.
    pub capacity: String,
}

pub async fn handle_capacity(
    State(state): State<ApiState>,
    Json(req): Json<CapacityRequest>,
) -> OpResult {
    let bytes = parse_size(&req.capacity).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    operation_result("capacity", state.control.set_capacity(bytes).await)
}
