//! Service assembly
//!
//! Loads every local data source from the resolved configuration. Data
//! errors here are fatal: the service never starts with a partial case
//! table or a partial assignment.

use anyhow::{Context, Result};
use medeval_common::config::EvalConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cases::CaseStore;
use crate::gateway::{DisabledGateway, HttpGateway, SubmissionGateway};
use crate::ledger::store::JsonFileStore;
use crate::ledger::{AssignmentLedger, AssignmentPlan, OpenOutcome};
use crate::reconcile;
use crate::responses::ResponseLoader;
use crate::AppState;

/// Gateway for the configured endpoint, or [`DisabledGateway`] without one
pub fn build_gateway(config: &EvalConfig) -> Result<Arc<dyn SubmissionGateway>> {
    match &config.endpoint_url {
        Some(url) => {
            let gateway = HttpGateway::new(url.clone(), Duration::from_secs(config.request_timeout_secs))
                .context("Failed to build HTTP client")?;
            info!(endpoint = %url, "Submission gateway enabled");
            Ok(Arc::new(gateway))
        }
        None => {
            warn!("No endpoint_url configured; submissions and recovery are disabled");
            Ok(Arc::new(DisabledGateway))
        }
    }
}

/// Load the case table and open (or create) the ledger
pub fn open_ledger(config: &EvalConfig) -> Result<(CaseStore, AssignmentLedger, OpenOutcome)> {
    let cases = CaseStore::load(&config.csv_path)
        .with_context(|| format!("Failed to load case data from {}", config.csv_path.display()))?;
    info!(
        path = %config.csv_path.display(),
        patients = cases.patient_ids().len(),
        queries = cases.len(),
        "Loaded case data"
    );

    let plan = AssignmentPlan::from_cases(
        config.evaluators.clone(),
        config.patients_per_evaluator,
        &cases,
    );
    let store = JsonFileStore::new(&config.ledger_path);
    let (ledger, outcome) = AssignmentLedger::get_or_create(Box::new(store), &plan)
        .context("Failed to open assignment ledger")?;

    Ok((cases, ledger, outcome))
}

/// Assemble the shared state and report how the ledger was opened
pub fn build_state(config: &EvalConfig) -> Result<(AppState, OpenOutcome)> {
    let (cases, ledger, outcome) = open_ledger(config)?;

    if !config.docx_folder.is_dir() {
        warn!(
            path = %config.docx_folder.display(),
            "Response folder does not exist; every response will show as not found"
        );
    }
    let responses = ResponseLoader::new(&config.docx_folder);
    let gateway = build_gateway(config)?;

    let state = AppState::new(
        cases,
        responses,
        ledger,
        gateway,
        config.admin_password.clone(),
    );
    Ok((state, outcome))
}

/// Rebuild progress from the remote store after a fresh ledger was created
///
/// Failures are logged and leave the ledger as created.
pub async fn reconcile_fresh_ledger(state: &AppState) {
    match reconcile::recover_from_remote(&state.ledger, state.gateway.as_ref()).await {
        Ok(report) => info!(
            newly_completed = report.newly_completed,
            skipped = report.skipped.len(),
            "Recovered progress from remote store"
        ),
        Err(e) => warn!("Progress recovery deferred: {}", e),
    }
}
