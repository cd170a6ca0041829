//! Admin endpoints: progress dashboard, reconciliation, reset
//!
//! All routes here sit behind [`super::admin_auth_middleware`].

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::gateway::RemoteRow;
use crate::ledger::LedgerSummary;
use crate::reconcile::{self, ReconcileReport};
use crate::AppState;

/// POST /api/admin/reconcile body
#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub records: Vec<RemoteRow>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub cleared: usize,
}

/// GET /api/admin/progress
pub async fn get_progress(State(state): State<AppState>) -> Json<LedgerSummary> {
    Json(state.ledger.lock().await.summary())
}

/// POST /api/admin/reconcile
///
/// Manual fallback when the remote store cannot be reached from here.
pub async fn post_reconcile(
    State(state): State<AppState>,
    Json(req): Json<ReconcileRequest>,
) -> ApiResult<Json<ReconcileReport>> {
    let mut ledger = state.ledger.lock().await;
    Ok(Json(reconcile::reconcile_rows(&mut ledger, &req.records)?))
}

/// POST /api/admin/recover
pub async fn post_recover(State(state): State<AppState>) -> ApiResult<Json<ReconcileReport>> {
    let report = reconcile::recover_from_remote(&state.ledger, state.gateway.as_ref()).await?;
    Ok(Json(report))
}

/// POST /api/admin/reset
pub async fn post_reset(State(state): State<AppState>) -> ApiResult<Json<ResetResponse>> {
    let cleared = state.ledger.lock().await.reset_progress()?;
    Ok(Json(ResetResponse { cleared }))
}
