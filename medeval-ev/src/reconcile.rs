//! Progress Reconciler
//!
//! Rebuilds local completion state from what the remote store says was
//! submitted. Reconciliation only ever adds completions: rows for unknown
//! evaluators, unassigned patients or unknown queries are skipped and
//! reported, never inserted.

use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cases::parse_query_num;
use crate::gateway::{FetchError, RemoteRow, SubmissionGateway};
use crate::ledger::{AssignmentLedger, LedgerError, MarkOutcome, Triple};

const EVALUATOR_KEYS: &[&str] = &["evaluator", "Evaluator #", "Evaluator", "evaluator_id"];
const PATIENT_KEYS: &[&str] = &["patientId", "Patient ID", "patient_id", "Patient"];
const QUERY_KEYS: &[&str] = &["queryNum", "Query", "query_num", "Query #"];

/// Why a submitted row did not change the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownEvaluator,
    NotAssigned,
    UnknownQuery,
    /// Required fields missing or unparseable
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecord {
    pub reason: SkipReason,
    pub detail: String,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub received: usize,
    pub newly_completed: usize,
    pub already_complete: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// Reconciliation against the remote store failed
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Row from the remote store, either a triple or a malformed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmittedRow {
    Triple(Triple),
    Malformed(String),
}

/// First alias holding a non-blank value
fn field(row: &RemoteRow, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| row.get(*k))
        .find_map(value_as_text)
}

/// Strings are trimmed; integral numbers lose their `.0`
fn value_as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

impl SubmittedRow {
    /// Accepts both the JSON field names and the spreadsheet column titles
    pub fn from_row(row: &RemoteRow) -> Self {
        let evaluator = field(row, EVALUATOR_KEYS);
        let patient_id = field(row, PATIENT_KEYS);
        let query = field(row, QUERY_KEYS);

        match (evaluator, patient_id, query) {
            (Some(evaluator), Some(patient_id), Some(query)) => match parse_query_num(&query) {
                Some(query_num) => SubmittedRow::Triple(Triple {
                    evaluator,
                    patient_id,
                    query_num,
                }),
                None => SubmittedRow::Malformed(format!("invalid query number '{}'", query)),
            },
            (e, p, q) => {
                let missing: Vec<&str> = [("evaluator", e), ("patient", p), ("query", q)]
                    .into_iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(name, _)| name)
                    .collect();
                SubmittedRow::Malformed(format!("missing {}", missing.join(", ")))
            }
        }
    }
}

fn skip_for(err: &LedgerError) -> Option<SkipReason> {
    match err {
        LedgerError::UnknownEvaluator(_) => Some(SkipReason::UnknownEvaluator),
        LedgerError::NotAssigned { .. } => Some(SkipReason::NotAssigned),
        LedgerError::UnknownQuery { .. } => Some(SkipReason::UnknownQuery),
        _ => None,
    }
}

/// Mark every valid row complete and save once
///
/// Order of `rows` does not matter and re-running with the same rows
/// changes nothing. If the save fails the newly marked triples are rolled
/// back.
pub fn reconcile<I>(ledger: &mut AssignmentLedger, rows: I) -> Result<ReconcileReport, LedgerError>
where
    I: IntoIterator<Item = SubmittedRow>,
{
    let mut report = ReconcileReport::default();
    let mut marked = Vec::new();

    for row in rows {
        report.received += 1;

        let triple = match row {
            SubmittedRow::Triple(triple) => triple,
            SubmittedRow::Malformed(detail) => {
                report.skipped.push(SkippedRecord {
                    reason: SkipReason::Malformed,
                    detail,
                });
                continue;
            }
        };

        match ledger.record_completion(&triple) {
            Ok(MarkOutcome::Marked) => {
                report.newly_completed += 1;
                marked.push(triple);
            }
            Ok(MarkOutcome::AlreadyComplete) => report.already_complete += 1,
            Err(e) => match skip_for(&e) {
                Some(reason) => {
                    debug!(reason = ?reason, "{}", e);
                    report.skipped.push(SkippedRecord {
                        reason,
                        detail: e.to_string(),
                    });
                }
                None => return Err(e),
            },
        }
    }

    if !marked.is_empty() {
        if let Err(e) = ledger.persist() {
            ledger.forget_completions(&marked);
            return Err(e);
        }
    }

    if !report.skipped.is_empty() {
        warn!(skipped = report.skipped.len(), "Some submitted rows were not applied");
    }
    info!(
        received = report.received,
        newly_completed = report.newly_completed,
        already_complete = report.already_complete,
        "Reconciled ledger"
    );

    Ok(report)
}

/// Reconcile raw rows as returned by the remote store
pub fn reconcile_rows(
    ledger: &mut AssignmentLedger,
    rows: &[RemoteRow],
) -> Result<ReconcileReport, LedgerError> {
    reconcile(ledger, rows.iter().map(SubmittedRow::from_row))
}

/// Fetch every submitted row and reconcile
///
/// A fetch failure leaves the ledger untouched. The ledger lock is held
/// only while applying rows, not across the network call.
pub async fn recover_from_remote(
    ledger: &tokio::sync::Mutex<AssignmentLedger>,
    gateway: &dyn SubmissionGateway,
) -> Result<ReconcileReport, RecoveryError> {
    info!(remote = %gateway.describe(), "Fetching submitted evaluations");
    let rows = gateway.fetch_all().await?;

    let mut ledger = ledger.lock().await;
    Ok(reconcile_rows(&mut ledger, &rows)?)
}

/// Read a spreadsheet export (CSV with a header row) into rows
pub fn rows_from_csv<R: Read>(reader: R) -> Result<Vec<RemoteRow>, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let mut rows = Vec::new();

    for record in rdr.records() {
        let record = record?;
        let row: RemoteRow = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}
