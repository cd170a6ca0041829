//! Evaluator-facing endpoints
//!
//! Work queue lookup, case display data and evaluation submission. A
//! submission is sent to the remote store first; the local ledger is only
//! updated once the remote store has acknowledged it.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::cases::PatientQuery;
use crate::error::{ApiError, ApiResult};
use crate::gateway::Ack;
use crate::ledger::{EvaluatorProgress, MarkOutcome, QueueEntry, Triple};
use crate::record::{EvaluationRecord, ModelScores, Preference};
use crate::responses::{Model, ModelResponse};
use crate::AppState;

// ========================================
// Response types
// ========================================

/// One side of the comparison as displayed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseView {
    pub found: bool,
    /// Answer text, or a placeholder when missing
    pub text: String,
    pub source: Option<String>,
}

impl ResponseView {
    fn new(response: Option<ModelResponse>, model: Model) -> Self {
        match response {
            Some(r) => Self {
                found: true,
                text: r.text,
                source: Some(r.source.display().to_string()),
            },
            None => Self {
                found: false,
                text: format!("{} response not found", model),
                source: None,
            },
        }
    }
}

/// Everything the form needs for one query
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub case: PatientQuery,
    pub model_a: ResponseView,
    pub model_b: ResponseView,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub evaluator: String,
    pub entries: Vec<QueueEntry>,
}

#[derive(Debug, Serialize)]
pub struct NextResponse {
    pub evaluator: String,
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<WorkItem>,
}

/// Pointer to the next pending query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextPending {
    pub patient_id: String,
    pub query_num: u32,
}

#[derive(Debug, Serialize)]
pub struct SubmitEvaluationResponse {
    pub triple: Triple,
    /// `marked` or `already_complete`
    pub outcome: &'static str,
    pub ack: Ack,
    pub finished: bool,
    pub next: Option<NextPending>,
}

// ========================================
// Request types
// ========================================

/// POST /api/evaluations body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEvaluationRequest {
    pub evaluator: String,
    pub patient_id: String,
    pub query_num: u32,
    #[serde(default)]
    pub model_a: ModelScores,
    #[serde(default)]
    pub model_b: ModelScores,
    pub preference: Preference,
    #[serde(default)]
    pub pref_reasons: String,
}

// ========================================
// Handlers
// ========================================

/// Case plus both responses; document reads run off the async runtime
async fn load_work_item(state: &AppState, patient_id: &str, query_num: u32) -> ApiResult<WorkItem> {
    let case = state
        .cases
        .get(patient_id, query_num)
        .cloned()
        .ok_or_else(|| {
            ApiError::NotFound(format!("No case for patient {} query {}", patient_id, query_num))
        })?;

    let responses = state.responses.clone();
    let pid = case.patient_id.clone();
    let pair = tokio::task::spawn_blocking(move || responses.load_pair(&pid, query_num))
        .await
        .map_err(|e| ApiError::Internal(format!("Response loading task failed: {}", e)))?;

    Ok(WorkItem {
        case,
        model_a: ResponseView::new(pair.model_a, Model::A),
        model_b: ResponseView::new(pair.model_b, Model::B),
    })
}

/// GET /api/evaluators
pub async fn list_evaluators(State(state): State<AppState>) -> Json<Vec<EvaluatorProgress>> {
    let ledger = state.ledger.lock().await;
    Json(ledger.summary().evaluators)
}

/// GET /api/evaluators/:evaluator/queue
pub async fn get_queue(
    State(state): State<AppState>,
    Path(evaluator): Path<String>,
) -> ApiResult<Json<QueueResponse>> {
    let entries = state.ledger.lock().await.queue(&evaluator)?;
    Ok(Json(QueueResponse { evaluator, entries }))
}

/// GET /api/evaluators/:evaluator/next
pub async fn get_next(
    State(state): State<AppState>,
    Path(evaluator): Path<String>,
) -> ApiResult<Json<NextResponse>> {
    let next = state.ledger.lock().await.next_pending(&evaluator)?;

    let item = match next {
        Some((patient_id, query_num)) => Some(load_work_item(&state, &patient_id, query_num).await?),
        None => None,
    };

    Ok(Json(NextResponse {
        evaluator,
        finished: item.is_none(),
        item,
    }))
}

/// GET /api/cases/:patient_id/:query_num
pub async fn get_case(
    State(state): State<AppState>,
    Path((patient_id, query_num)): Path<(String, u32)>,
) -> ApiResult<Json<WorkItem>> {
    Ok(Json(load_work_item(&state, &patient_id, query_num).await?))
}

/// POST /api/evaluations
///
/// Local validation failures never reach the network. A gateway failure
/// leaves the triple pending so the evaluator can resubmit.
pub async fn submit_evaluation(
    State(state): State<AppState>,
    Json(req): Json<SubmitEvaluationRequest>,
) -> ApiResult<Json<SubmitEvaluationResponse>> {
    let case = state
        .cases
        .get(&req.patient_id, req.query_num)
        .cloned()
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "No case for patient {} query {}",
                req.patient_id, req.query_num
            ))
        })?;

    let record = EvaluationRecord {
        case,
        evaluator: req.evaluator,
        model_a: req.model_a,
        model_b: req.model_b,
        preference: req.preference,
        pref_reasons: req.pref_reasons,
    };
    record.validate()?;

    let triple = record.triple();
    state.ledger.lock().await.validate(&triple)?;

    let ack = state.gateway.submit(&record).await?;

    let mut ledger = state.ledger.lock().await;
    let outcome = ledger.mark_complete(&triple).map_err(|e| {
        error!(
            evaluator = %triple.evaluator,
            patient_id = %triple.patient_id,
            query_num = triple.query_num,
            "Remote store accepted evaluation but ledger update failed: {}",
            e
        );
        ApiError::from(e)
    })?;

    let next = ledger
        .next_pending(&triple.evaluator)?
        .map(|(patient_id, query_num)| NextPending {
            patient_id,
            query_num,
        });
    drop(ledger);

    if outcome == MarkOutcome::AlreadyComplete {
        info!(
            evaluator = %triple.evaluator,
            patient_id = %triple.patient_id,
            query_num = triple.query_num,
            "Resubmitted completed evaluation"
        );
    }

    Ok(Json(SubmitEvaluationResponse {
        outcome: match outcome {
            MarkOutcome::Marked => "marked",
            MarkOutcome::AlreadyComplete => "already_complete",
        },
        triple,
        ack,
        finished: next.is_none(),
        next,
    }))
}
