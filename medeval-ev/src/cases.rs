//! Case Data Store
//!
//! Loads the evaluation metadata CSV once at startup into an in-memory table
//! keyed by `(patient_id, query_num)`.
//!
//! CSV columns are positional:
//! - A: patient id (only on the first row of each patient)
//! - B: query number
//! - C, D, E: group, query type, PHI dependency (not loaded)
//! - F: patient summary (only on the first row of each patient)
//! - G: query text

use csv::ReaderBuilder;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const COL_PATIENT_ID: usize = 0;
const COL_QUERY_NUM: usize = 1;
const COL_SUMMARY: usize = 5;
const COL_QUERY_TEXT: usize = 6;
const MIN_COLUMNS: usize = 7;

/// Case data errors - all fatal at startup
#[derive(Debug, Error)]
pub enum CaseDataError {
    #[error("Cannot read case file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Line {line}: expected at least 7 columns, found {found}")]
    MissingColumns { line: u64, found: usize },

    #[error("Line {line}: invalid query number '{value}'")]
    InvalidQueryNum { line: u64, value: String },

    #[error("Line {line}: duplicate entry for patient {patient_id} query {query_num}")]
    Duplicate {
        line: u64,
        patient_id: String,
        query_num: u32,
    },
}

/// One evaluable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientQuery {
    pub patient_id: String,
    pub query_num: u32,
    pub full_query: String,
    pub patient_summary: String,
}

/// Parse a query number as written in spreadsheets ("3", "3.0", " 3 ")
///
/// Returns `None` for anything that is not a whole number >= 1.
pub fn parse_query_num(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(n) = trimmed.parse::<u32>() {
        return (n >= 1).then_some(n);
    }

    let value = trimmed.parse::<f64>().ok()?;
    if value.fract() != 0.0 || value < 1.0 || value > u32::MAX as f64 {
        return None;
    }
    Some(value as u32)
}

/// In-memory case table
#[derive(Debug, Clone, Default)]
pub struct CaseStore {
    cases: HashMap<(String, u32), PatientQuery>,
    /// Patient ids in first-appearance order
    patient_order: Vec<String>,
    /// Ascending query numbers per patient
    queries: BTreeMap<String, Vec<u32>>,
}

impl CaseStore {
    /// Load the CSV file at `path`
    pub fn load(path: &Path) -> Result<Self, CaseDataError> {
        let file = std::fs::File::open(path).map_err(|e| CaseDataError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_reader(file)
    }

    /// Parse CSV content (header row expected)
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CaseDataError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut store = CaseStore::default();
        let mut current_patient = String::new();
        let mut current_summary = String::new();

        for result in rdr.records() {
            let record = result?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();

            // Entirely blank rows carry nothing, not even a column count
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }

            if record.len() < MIN_COLUMNS {
                return Err(CaseDataError::MissingColumns {
                    line,
                    found: record.len(),
                });
            }

            let field = |idx: usize| record.get(idx).unwrap_or("").trim();

            // Forward-fill patient id and summary
            if !field(COL_PATIENT_ID).is_empty() {
                current_patient = field(COL_PATIENT_ID).to_string();
            }
            if !field(COL_SUMMARY).is_empty() {
                current_summary = field(COL_SUMMARY).to_string();
            }

            if current_patient.is_empty() {
                debug!(line, "Skipping row without patient id");
                continue;
            }

            let raw_query = field(COL_QUERY_NUM);
            let query_num =
                parse_query_num(raw_query).ok_or_else(|| CaseDataError::InvalidQueryNum {
                    line,
                    value: raw_query.to_string(),
                })?;

            let key = (current_patient.clone(), query_num);
            if store.cases.contains_key(&key) {
                return Err(CaseDataError::Duplicate {
                    line,
                    patient_id: current_patient.clone(),
                    query_num,
                });
            }

            if !store.queries.contains_key(&current_patient) {
                store.patient_order.push(current_patient.clone());
            }
            let nums = store.queries.entry(current_patient.clone()).or_default();
            let pos = nums.binary_search(&query_num).unwrap_or_else(|p| p);
            nums.insert(pos, query_num);

            store.cases.insert(
                key,
                PatientQuery {
                    patient_id: current_patient.clone(),
                    query_num,
                    full_query: field(COL_QUERY_TEXT).to_string(),
                    patient_summary: current_summary.clone(),
                },
            );
        }

        Ok(store)
    }

    pub fn get(&self, patient_id: &str, query_num: u32) -> Option<&PatientQuery> {
        self.cases.get(&(patient_id.to_string(), query_num))
    }

    /// Unique patient ids in first-appearance order
    pub fn patient_ids(&self) -> Vec<String> {
        self.patient_order.clone()
    }

    /// Ascending query numbers for a patient (empty if unknown)
    pub fn query_nums(&self, patient_id: &str) -> Vec<u32> {
        self.queries.get(patient_id).cloned().unwrap_or_default()
    }

    /// Patient id → ascending query numbers
    pub fn query_catalog(&self) -> BTreeMap<String, Vec<u32>> {
        self.queries.clone()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}
