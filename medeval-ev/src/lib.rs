//! medeval-ev library - A/B evaluation service
//!
//! Serves paired Model A / Model B answers for patient queries to a fixed
//! roster of medical evaluators, forwards completed rating forms to a remote
//! spreadsheet endpoint and tracks who has finished what.

use axum::{extract::State, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod cases;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod reconcile;
pub mod record;
pub mod responses;
pub mod startup;

use crate::cases::CaseStore;
use crate::gateway::SubmissionGateway;
use crate::ledger::AssignmentLedger;
use crate::responses::ResponseLoader;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Patient queries, read-only after startup
    pub cases: Arc<CaseStore>,
    pub responses: Arc<ResponseLoader>,
    /// Single writer; every mutation saves the full document
    pub ledger: Arc<Mutex<AssignmentLedger>>,
    pub gateway: Arc<dyn SubmissionGateway>,
    /// `None` disables the admin routes
    pub admin_password: Option<String>,
}

impl AppState {
    pub fn new(
        cases: CaseStore,
        responses: ResponseLoader,
        ledger: AssignmentLedger,
        gateway: Arc<dyn SubmissionGateway>,
        admin_password: Option<String>,
    ) -> Self {
        Self {
            cases: Arc::new(cases),
            responses: Arc::new(responses),
            ledger: Arc::new(Mutex::new(ledger)),
            gateway,
            admin_password,
        }
    }
}

/// `GET /health` body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    /// Patient queries loaded from the case file
    pub cases: usize,
    pub assigned: usize,
    pub completed: usize,
}

/// GET /health
///
/// No authentication.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ledger = state.ledger.lock().await;
    Json(HealthResponse {
        status: "ok",
        module: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        cases: state.cases.len(),
        assigned: ledger.len(),
        completed: ledger.completed_count(),
    })
}

/// Build application router
///
/// Health and evaluator routes are public; `/api/admin/*` requires the
/// admin password.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let admin = Router::new()
        .route("/api/admin/progress", get(api::get_progress))
        .route("/api/admin/reconcile", post(api::post_reconcile))
        .route("/api/admin/recover", post(api::post_recover))
        .route("/api/admin/reset", post(api::post_reset))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::admin_auth_middleware,
        ));

    let public = Router::new()
        .route("/api/evaluators", get(api::list_evaluators))
        .route("/api/evaluators/:evaluator/queue", get(api::get_queue))
        .route("/api/evaluators/:evaluator/next", get(api::get_next))
        .route("/api/cases/:patient_id/:query_num", get(api::get_case))
        .route("/api/evaluations", post(api::submit_evaluation))
        .route("/health", get(health));

    Router::new()
        .merge(admin)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
