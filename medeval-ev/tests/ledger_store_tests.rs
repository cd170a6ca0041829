//! Ledger persistence on disk and startup recovery

mod helpers;

use std::sync::Arc;
use tempfile::TempDir;

use helpers::{cases_csv, evaluator_names, FakeGateway, TestSetup};
use medeval_ev::cases::{CaseDataError, CaseStore};
use medeval_ev::ledger::store::{JsonFileStore, LedgerStore, StoreError};
use medeval_ev::ledger::{AssignmentLedger, AssignmentPlan, LedgerError, OpenOutcome, Triple};
use medeval_ev::startup;
use serde_json::json;

fn plan(patients: usize) -> AssignmentPlan {
    let cases = CaseStore::from_reader(cases_csv(patients, 2).as_bytes()).unwrap();
    AssignmentPlan::from_cases(evaluator_names(2), 2, &cases)
}

#[test]
fn test_missing_and_empty_files_load_as_none() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("assignments.json");
    let store = JsonFileStore::new(&path);
    assert!(store.load().unwrap().is_none());

    std::fs::write(&path, "  \n").unwrap();
    assert!(store.load().unwrap().is_none());
}

#[test]
fn test_corrupt_file_is_reported_and_regenerated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("assignments.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = JsonFileStore::new(&path);
    assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));

    let (ledger, outcome) = AssignmentLedger::get_or_create(Box::new(store.clone()), &plan(4)).unwrap();
    assert_eq!(outcome, OpenOutcome::Created);
    assert_eq!(ledger.len(), 8);
    assert!(store.load().unwrap().is_some());
}

#[test]
fn test_save_creates_parent_folders_and_restores() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("state").join("assignments.json");

    {
        let (mut ledger, outcome) =
            AssignmentLedger::get_or_create(Box::new(JsonFileStore::new(&path)), &plan(4)).unwrap();
        assert_eq!(outcome, OpenOutcome::Created);
        ledger.mark_complete(&Triple::new("Evaluator 1", "P2", 2)).unwrap();
    }
    assert!(path.is_file());
    assert!(!path.with_extension("json.tmp").exists());

    let (ledger, outcome) =
        AssignmentLedger::get_or_create(Box::new(JsonFileStore::new(&path)), &plan(4)).unwrap();
    assert_eq!(outcome, OpenOutcome::Restored);
    assert!(ledger.is_complete(&Triple::new("Evaluator 1", "P2", 2)));
    assert_eq!(ledger.assignments()["Evaluator 2"], vec!["P3", "P4"]);
}

#[test]
fn test_deleted_ledger_regenerates_same_partition() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("assignments.json");

    let (first, _) =
        AssignmentLedger::get_or_create(Box::new(JsonFileStore::new(&path)), &plan(6)).unwrap();
    let before = first.assignments().clone();
    drop(first);

    std::fs::remove_file(&path).unwrap();
    let (second, outcome) =
        AssignmentLedger::get_or_create(Box::new(JsonFileStore::new(&path)), &plan(6)).unwrap();
    assert_eq!(outcome, OpenOutcome::Created);
    assert_eq!(second.assignments(), &before);
}

#[test]
fn test_insufficient_patients_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("assignments.json");

    let result = AssignmentLedger::get_or_create(Box::new(JsonFileStore::new(&path)), &plan(3));
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientData {
            required: 4,
            available: 3
        })
    ));
    assert!(!path.exists());
}

#[test]
fn test_case_file_errors_name_the_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cases.csv");
    std::fs::write(
        &path,
        "Patient ID,Query #,Group,Type,PHI,Summary,Query\nP1,1,G,T,No,S,Q1\n,one,G,T,No,,Q2\n",
    )
    .unwrap();

    let err = CaseStore::load(&path).unwrap_err();
    assert!(matches!(err, CaseDataError::InvalidQueryNum { line: 3, .. }));

    let missing = CaseStore::load(&dir.path().join("absent.csv")).unwrap_err();
    assert!(matches!(missing, CaseDataError::Read { .. }));
}

#[tokio::test]
async fn test_fresh_ledger_recovers_from_remote() {
    let env = TestSetup::default().build_with(Arc::new(FakeGateway::with_rows(vec![
        json!({"Evaluator #": "Evaluator 1", "Patient ID": "P1", "Query": 2}),
        json!({"Evaluator #": "Evaluator 2", "Patient ID": "P4", "Query": "1.0"}),
    ])));
    assert_eq!(env.outcome, OpenOutcome::Created);

    startup::reconcile_fresh_ledger(&env.state).await;

    let ledger = env.state.ledger.lock().await;
    assert_eq!(ledger.completed_count(), 2);
    assert!(ledger.is_complete(&Triple::new("Evaluator 2", "P4", 1)));
}

#[tokio::test]
async fn test_fresh_ledger_with_unreachable_remote_stays_empty() {
    let env = TestSetup::default().build();

    startup::reconcile_fresh_ledger(&env.state).await;

    let ledger = env.state.ledger.lock().await;
    assert_eq!(ledger.completed_count(), 0);
    assert_eq!(ledger.len(), 8);
}
