//! Shared fixtures for medeval-ev integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use medeval_ev::cases::CaseStore;
use medeval_ev::gateway::{Ack, FetchError, RemoteRow, SubmissionError, SubmissionGateway};
use medeval_ev::ledger::store::JsonFileStore;
use medeval_ev::ledger::{AssignmentLedger, AssignmentPlan, OpenOutcome};
use medeval_ev::record::{EvaluationRecord, SubmissionPayload};
use medeval_ev::responses::ResponseLoader;
use medeval_ev::AppState;

// ========================================
// Files
// ========================================

/// Case CSV in the exported layout: id and summary only on a patient's
/// first row
pub fn cases_csv(patients: usize, queries: u32) -> String {
    let mut out = String::from("Patient ID,Query #,Group,Query Type,PHI Dependent,Patient Summary,Query\n");
    for p in 1..=patients {
        for q in 1..=queries {
            if q == 1 {
                out.push_str(&format!(
                    "P{p},{q}.0,G1,Dosing,No,\"Patient P{p}, age {}\",Question {q} for P{p}\n",
                    40 + p
                ));
            } else {
                out.push_str(&format!(",{q}.0,G1,Dosing,No,,Question {q} for P{p}\n"));
            }
        }
    }
    out
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Minimal DOCX: one paragraph per entry
pub fn write_docx(path: &Path, paragraphs: &[&str]) {
    let body: String = paragraphs
        .iter()
        .map(|p| {
            format!(
                r#"<w:p><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
                escape_xml(p)
            )
        })
        .collect();
    write_docx_parts(path, &body, None);
}

/// DOCX with a raw `<w:body>` and an optional relationships part
pub fn write_docx_parts(path: &Path, body: &str, rels: Option<&str>) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }

    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body>{}</w:body></w:document>"#,
        body
    );

    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();

    zip.start_file("[Content_Types].xml", options).unwrap();
    zip.write_all(br#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
        .unwrap();
    zip.start_file("word/document.xml", options).unwrap();
    zip.write_all(document.as_bytes()).unwrap();
    if let Some(rels) = rels {
        zip.start_file("word/_rels/document.xml.rels", options).unwrap();
        zip.write_all(rels.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

// ========================================
// Fake remote store
// ========================================

/// In-process stand-in for the spreadsheet endpoint
#[derive(Default)]
pub struct FakeGateway {
    pub submitted: Mutex<Vec<SubmissionPayload>>,
    pub submit_calls: AtomicUsize,
    pub fail_submit: AtomicBool,
    /// `None` makes fetches fail
    pub rows: Mutex<Option<Vec<RemoteRow>>>,
}

impl FakeGateway {
    pub fn with_rows(rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                other => panic!("row must be an object: {}", other),
            })
            .collect();
        Self {
            rows: Mutex::new(Some(rows)),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubmissionGateway for FakeGateway {
    async fn submit(&self, record: &EvaluationRecord) -> Result<Ack, SubmissionError> {
        record.validate()?;
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(SubmissionError::Status {
                status: 500,
                body: "sheet unavailable".to_string(),
            });
        }

        self.submitted.lock().unwrap().push(record.to_payload());
        Ok(Ack {
            status: 200,
            body: Some(json!({"result": "success"})),
        })
    }

    async fn fetch_all(&self) -> Result<Vec<RemoteRow>, FetchError> {
        self.rows
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FetchError::Transport("connection refused".to_string()))
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}

// ========================================
// Service state
// ========================================

pub struct TestEnv {
    pub dir: TempDir,
    pub gateway: Arc<FakeGateway>,
    pub state: AppState,
    pub outcome: OpenOutcome,
}

pub struct TestSetup {
    pub evaluators: usize,
    pub per_evaluator: usize,
    pub patients: usize,
    pub queries: u32,
    pub admin_password: Option<&'static str>,
}

impl Default for TestSetup {
    fn default() -> Self {
        Self {
            evaluators: 2,
            per_evaluator: 2,
            patients: 4,
            queries: 2,
            admin_password: Some("letmein"),
        }
    }
}

pub fn evaluator_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("Evaluator {}", i)).collect()
}

impl TestSetup {
    pub fn build(self) -> TestEnv {
        self.build_with(Arc::new(FakeGateway::default()))
    }

    pub fn build_with(self, gateway: Arc<FakeGateway>) -> TestEnv {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cases.csv"), cases_csv(self.patients, self.queries)).unwrap();
        std::fs::create_dir_all(dir.path().join("docx")).unwrap();

        let (state, outcome) = open_state(
            dir.path(),
            evaluator_names(self.evaluators),
            self.per_evaluator,
            gateway.clone(),
            self.admin_password,
        );

        TestEnv {
            dir,
            gateway,
            state,
            outcome,
        }
    }
}

/// Build state over an existing data folder (simulates a restart)
pub fn open_state(
    dir: &Path,
    evaluators: Vec<String>,
    per_evaluator: usize,
    gateway: Arc<FakeGateway>,
    admin_password: Option<&str>,
) -> (AppState, OpenOutcome) {
    let cases = CaseStore::load(&dir.join("cases.csv")).unwrap();
    let plan = AssignmentPlan::from_cases(evaluators, per_evaluator, &cases);
    let store = JsonFileStore::new(ledger_path(dir));
    let (ledger, outcome) = AssignmentLedger::get_or_create(Box::new(store), &plan).unwrap();

    let state = AppState::new(
        cases,
        ResponseLoader::new(dir.join("docx")),
        ledger,
        gateway,
        admin_password.map(str::to_string),
    );
    (state, outcome)
}

pub fn ledger_path(dir: &Path) -> PathBuf {
    dir.join("assignments.json")
}

// ========================================
// HTTP
// ========================================

/// Extract JSON body from response
pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Submission body with default (passing) scores
pub fn submission(evaluator: &str, patient_id: &str, query_num: u32, pref_reasons: &str) -> Value {
    json!({
        "evaluator": evaluator,
        "patientId": patient_id,
        "queryNum": query_num,
        "modelA": {
            "hallucination": {"rating": "fail", "justification": "Cites a nonexistent trial"}
        },
        "modelB": {},
        "preference": "Model B",
        "prefReasons": pref_reasons
    })
}
