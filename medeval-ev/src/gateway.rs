//! Submission Gateway
//!
//! The remote spreadsheet endpoint is the durable record of every
//! evaluation. Records are POSTed as a flat JSON object; a GET on the same
//! endpoint returns everything submitted so far, which drives
//! reconciliation.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::record::{EvaluationRecord, RecordError};

/// One submitted row as returned by the remote store
pub type RemoteRow = Map<String, Value>;

/// Body kept from the remote reply, capped for logs and error messages
const MAX_BODY_CHARS: usize = 512;

/// Submission failures; the ledger must stay untouched on any of these
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Invalid evaluation: {0}")]
    Invalid(#[from] RecordError),

    #[error("No submission endpoint configured")]
    NotConfigured,

    #[error("Submission transport error: {0}")]
    Transport(String),

    #[error("Remote store rejected submission with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Retrieval failures
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("No submission endpoint configured")]
    NotConfigured,

    #[error("Fetch transport error: {0}")]
    Transport(String),

    #[error("Remote store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response from remote store: {0}")]
    Malformed(String),
}

/// Remote acknowledgement of a submission
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Ack {
    pub status: u16,
    /// JSON reply if the endpoint sent one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Remote persistence for evaluation records
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    /// Send one validated record; validation failures never reach the network
    async fn submit(&self, record: &EvaluationRecord) -> Result<Ack, SubmissionError>;

    /// Every row submitted so far
    async fn fetch_all(&self) -> Result<Vec<RemoteRow>, FetchError>;

    /// Human-readable target for logs
    fn describe(&self) -> String;
}

// ========================================
// HTTP gateway
// ========================================

/// Gateway backed by an HTTPS spreadsheet endpoint
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[async_trait]
impl SubmissionGateway for HttpGateway {
    async fn submit(&self, record: &EvaluationRecord) -> Result<Ack, SubmissionError> {
        record.validate()?;
        let payload = record.to_payload();

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Remote store rejected submission");
            return Err(SubmissionError::Status {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        info!(
            evaluator = %record.evaluator,
            patient_id = %record.case.patient_id,
            query_num = record.case.query_num,
            "Evaluation submitted"
        );

        Ok(Ack {
            status: status.as_u16(),
            body: serde_json::from_str(&text).ok(),
        })
    }

    async fn fetch_all(&self) -> Result<Vec<RemoteRow>, FetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| FetchError::Malformed(format!("invalid JSON: {}", e)))?;
        let rows = rows_from_json(value)?;

        debug!(rows = rows.len(), "Fetched submitted rows");
        Ok(rows)
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

/// Normalize a remote reply into rows
///
/// Accepts a list of objects, an object wrapping that list under `rows` or
/// `data`, or a table whose first row is the header.
pub fn rows_from_json(value: Value) -> Result<Vec<RemoteRow>, FetchError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("rows").or_else(|| obj.remove("data")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(FetchError::Malformed(
                    "expected a list of rows".to_string(),
                ))
            }
        },
        other => {
            return Err(FetchError::Malformed(format!(
                "expected a list of rows, got {}",
                json_kind(&other)
            )))
        }
    };

    if items.first().is_some_and(Value::is_array) {
        return table_to_rows(items);
    }

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            other => Err(FetchError::Malformed(format!(
                "expected row object, got {}",
                json_kind(&other)
            ))),
        })
        .collect()
}

fn table_to_rows(items: Vec<Value>) -> Result<Vec<RemoteRow>, FetchError> {
    let mut iter = items.into_iter();
    let header: Vec<String> = match iter.next() {
        Some(Value::Array(cells)) => cells
            .into_iter()
            .map(|c| match c {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        _ => return Ok(Vec::new()),
    };

    iter.map(|item| match item {
        Value::Array(cells) => Ok(header.iter().cloned().zip(cells).collect()),
        other => Err(FetchError::Malformed(format!(
            "expected table row, got {}",
            json_kind(&other)
        ))),
    })
    .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ========================================
// Disabled gateway
// ========================================

/// Stand-in when no endpoint is configured; every call fails
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGateway;

#[async_trait]
impl SubmissionGateway for DisabledGateway {
    async fn submit(&self, record: &EvaluationRecord) -> Result<Ack, SubmissionError> {
        record.validate()?;
        Err(SubmissionError::NotConfigured)
    }

    async fn fetch_all(&self) -> Result<Vec<RemoteRow>, FetchError> {
        Err(FetchError::NotConfigured)
    }

    fn describe(&self) -> String {
        "disabled".to_string()
    }
}
