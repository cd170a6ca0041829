//! HttpGateway against a throwaway local endpoint standing in for the
//! spreadsheet backend

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use medeval_ev::cases::PatientQuery;
use medeval_ev::gateway::{FetchError, HttpGateway, SubmissionError, SubmissionGateway};
use medeval_ev::record::{EvaluationRecord, ModelScores, Preference, RecordError};

#[derive(Clone, Default)]
struct Sheet {
    received: Arc<Mutex<Vec<Value>>>,
    get_body: Arc<Mutex<Value>>,
    status: Arc<Mutex<Option<StatusCode>>>,
}

async fn sheet_post(State(sheet): State<Sheet>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let status = sheet.status.lock().unwrap().unwrap_or(StatusCode::OK);
    if status.is_success() {
        sheet.received.lock().unwrap().push(body);
    }
    (status, Json(json!({"result": "success"})))
}

async fn sheet_get(State(sheet): State<Sheet>) -> (StatusCode, Json<Value>) {
    let status = sheet.status.lock().unwrap().unwrap_or(StatusCode::OK);
    (status, Json(sheet.get_body.lock().unwrap().clone()))
}

/// Serve the fake sheet on an ephemeral port and return its URL
async fn spawn_sheet(sheet: Sheet) -> String {
    let app = Router::new()
        .route("/exec", get(sheet_get).post(sheet_post))
        .with_state(sheet);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/exec", addr)
}

fn gateway(url: &str) -> HttpGateway {
    HttpGateway::new(url, Duration::from_secs(5)).unwrap()
}

fn record(pref_reasons: &str) -> EvaluationRecord {
    EvaluationRecord {
        case: PatientQuery {
            patient_id: "P12".to_string(),
            query_num: 4,
            full_query: "Is the INR in range?".to_string(),
            patient_summary: "68M on warfarin".to_string(),
        },
        evaluator: "Evaluator 3".to_string(),
        model_a: ModelScores::default(),
        model_b: ModelScores::default(),
        preference: Preference::Tie,
        pref_reasons: pref_reasons.to_string(),
    }
}

#[tokio::test]
async fn test_submit_posts_flat_payload() {
    let sheet = Sheet::default();
    let url = spawn_sheet(sheet.clone()).await;

    let ack = gateway(&url).submit(&record("Equivalent answers")).await.unwrap();
    assert_eq!(ack.status, 200);
    assert_eq!(ack.body, Some(json!({"result": "success"})));

    let received = sheet.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let row = received[0].as_object().unwrap();
    assert_eq!(row.len(), 31);
    assert_eq!(row["patientId"], "P12");
    assert_eq!(row["queryNum"], 4);
    assert_eq!(row["evaluator"], "Evaluator 3");
    assert_eq!(row["b_safety"], "No Safety Omission (Safe)");
    assert_eq!(row["preference"], "Tie");
    assert_eq!(row["pref_reasons"], "Equivalent answers");
}

#[tokio::test]
async fn test_invalid_record_is_not_sent() {
    let sheet = Sheet::default();
    let url = spawn_sheet(sheet.clone()).await;

    let err = gateway(&url).submit(&record("")).await.unwrap_err();
    assert!(matches!(
        err,
        SubmissionError::Invalid(RecordError::MissingPreferenceReasons)
    ));
    assert!(sheet.received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let sheet = Sheet::default();
    *sheet.status.lock().unwrap() = Some(StatusCode::INTERNAL_SERVER_ERROR);
    let url = spawn_sheet(sheet.clone()).await;

    let err = gateway(&url).submit(&record("reasons")).await.unwrap_err();
    assert!(matches!(err, SubmissionError::Status { status: 500, .. }));

    let err = gateway(&url).fetch_all().await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gw = gateway(&format!("http://{}/exec", addr));
    assert!(matches!(
        gw.submit(&record("reasons")).await,
        Err(SubmissionError::Transport(_))
    ));
    assert!(matches!(gw.fetch_all().await, Err(FetchError::Transport(_))));
}

#[tokio::test]
async fn test_fetch_all_returns_rows() {
    let sheet = Sheet::default();
    *sheet.get_body.lock().unwrap() = json!([
        {"evaluator": "Evaluator 1", "patientId": "P1", "queryNum": "1.0"},
        {"evaluator": "Evaluator 2", "patientId": "P14", "queryNum": 3}
    ]);
    let url = spawn_sheet(sheet).await;

    let rows = gateway(&url).fetch_all().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["patientId"], "P14");
}

#[tokio::test]
async fn test_fetch_all_rejects_unexpected_shape() {
    let sheet = Sheet::default();
    *sheet.get_body.lock().unwrap() = json!({"result": "success"});
    let url = spawn_sheet(sheet).await;

    let err = gateway(&url).fetch_all().await.unwrap_err();
    assert!(matches!(err, FetchError::Malformed(_)));
}
