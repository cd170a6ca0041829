//! Assignment Ledger
//!
//! Binds every evaluator to a fixed, disjoint set of patients and tracks
//! completion per `(evaluator, patient, query)` triple.
//!
//! **Partition:** sequential chunking. Evaluator *i* (configured order)
//! receives `patients[i*k .. (i+1)*k]`; patients past `E*k` stay
//! unassigned. The same inputs always yield the same partition, so a
//! ledger regenerated after data loss matches the lost one.
//!
//! **Completion** is monotonic: triples only move from pending to
//! completed, except through an explicit [`AssignmentLedger::reset_progress`].

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::{info, warn};

use crate::cases::CaseStore;
use self::store::{LedgerStore, StoreError};

/// Current ledger document format
pub const LEDGER_FORMAT_VERSION: u32 = 1;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Not enough patients for every evaluator to receive a full share
    #[error("Insufficient data: {required} patients required, {available} available")]
    InsufficientData { required: usize, available: usize },

    #[error("No evaluators configured")]
    NoEvaluators,

    #[error("Patients per evaluator must be at least 1")]
    ZeroPerEvaluator,

    #[error("Duplicate evaluator: {0}")]
    DuplicateEvaluator(String),

    #[error("Duplicate patient: {0}")]
    DuplicatePatient(String),

    #[error("Unknown evaluator: {0}")]
    UnknownEvaluator(String),

    #[error("Patient {patient_id} is not assigned to {evaluator}")]
    NotAssigned {
        evaluator: String,
        patient_id: String,
    },

    #[error("Patient {patient_id} has no query {query_num}")]
    UnknownQuery { patient_id: String, query_num: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Triple {
    pub evaluator: String,
    pub patient_id: String,
    pub query_num: u32,
}

impl Triple {
    pub fn new(evaluator: impl Into<String>, patient_id: impl Into<String>, query_num: u32) -> Self {
        Self {
            evaluator: evaluator.into(),
            patient_id: patient_id.into(),
            query_num,
        }
    }
}

/// Inputs for creating a ledger
#[derive(Debug, Clone)]
pub struct AssignmentPlan {
    pub evaluators: Vec<String>,
    pub patients_per_evaluator: usize,
    /// Patient ids in source order
    pub patient_ids: Vec<String>,
    /// Patient id → ascending query numbers
    pub queries: BTreeMap<String, Vec<u32>>,
}

impl AssignmentPlan {
    pub fn from_cases(evaluators: Vec<String>, patients_per_evaluator: usize, cases: &CaseStore) -> Self {
        Self {
            evaluators,
            patients_per_evaluator,
            patient_ids: cases.patient_ids(),
            queries: cases.query_catalog(),
        }
    }
}

/// Split `patient_ids` into one block of `per_evaluator` per evaluator
///
/// Fails without producing a partial assignment when there are fewer than
/// `evaluators.len() * per_evaluator` patients.
pub fn partition_patients(
    evaluators: &[String],
    patient_ids: &[String],
    per_evaluator: usize,
) -> Result<BTreeMap<String, Vec<String>>, LedgerError> {
    if evaluators.is_empty() {
        return Err(LedgerError::NoEvaluators);
    }
    if per_evaluator == 0 {
        return Err(LedgerError::ZeroPerEvaluator);
    }

    let mut seen = HashSet::new();
    for evaluator in evaluators {
        if !seen.insert(evaluator.as_str()) {
            return Err(LedgerError::DuplicateEvaluator(evaluator.clone()));
        }
    }

    let mut seen = HashSet::new();
    for patient in patient_ids {
        if !seen.insert(patient.as_str()) {
            return Err(LedgerError::DuplicatePatient(patient.clone()));
        }
    }

    let required = evaluators.len() * per_evaluator;
    if patient_ids.len() < required {
        return Err(LedgerError::InsufficientData {
            required,
            available: patient_ids.len(),
        });
    }

    Ok(evaluators
        .iter()
        .zip(patient_ids.chunks(per_evaluator))
        .map(|(evaluator, block)| (evaluator.clone(), block.to_vec()))
        .collect())
}

/// Persisted ledger state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub patients_per_evaluator: usize,
    /// Evaluators in configured order
    pub evaluators: Vec<String>,
    /// Evaluator → ordered patient ids
    pub assignments: BTreeMap<String, Vec<String>>,
    /// Patient id → ascending query numbers, for assigned patients
    pub queries: BTreeMap<String, Vec<u32>>,
    pub completed: BTreeSet<Triple>,
}

impl LedgerDocument {
    /// Fresh document with every triple pending
    pub fn create(plan: &AssignmentPlan) -> Result<Self, LedgerError> {
        let assignments = partition_patients(
            &plan.evaluators,
            &plan.patient_ids,
            plan.patients_per_evaluator,
        )?;

        let queries = assignments
            .values()
            .flatten()
            .map(|pid| (pid.clone(), plan.queries.get(pid).cloned().unwrap_or_default()))
            .collect();

        let now = Utc::now();
        Ok(Self {
            version: LEDGER_FORMAT_VERSION,
            created_at: now,
            updated_at: now,
            patients_per_evaluator: plan.patients_per_evaluator,
            evaluators: plan.evaluators.clone(),
            assignments,
            queries,
            completed: BTreeSet::new(),
        })
    }

    fn is_usable(&self) -> bool {
        self.version == LEDGER_FORMAT_VERSION && !self.assignments.is_empty()
    }
}

/// How the ledger was obtained at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Loaded from the local store
    Restored,
    /// Local state was absent, empty or corrupt; generated fresh
    Created,
}

/// Result of marking a triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadyComplete,
}

/// One row of an evaluator's work queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub patient_id: String,
    pub query_num: u32,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProgress {
    pub patient_id: String,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorProgress {
    pub evaluator: String,
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
    pub finished: bool,
    pub patients: Vec<PatientProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub evaluators: Vec<EvaluatorProgress>,
}

fn percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        completed as f64 * 100.0 / total as f64
    }
}

/// Assignment and completion state backed by an injected store
pub struct AssignmentLedger {
    store: Box<dyn LedgerStore>,
    doc: LedgerDocument,
    /// Patient id → owning evaluator
    owners: HashMap<String, String>,
}

impl AssignmentLedger {
    /// Restore the stored ledger, or partition and persist a new one
    ///
    /// A corrupt stored document is logged and replaced.
    pub fn get_or_create(
        store: Box<dyn LedgerStore>,
        plan: &AssignmentPlan,
    ) -> Result<(Self, OpenOutcome), LedgerError> {
        let stored = match store.load() {
            Ok(doc) => doc,
            Err(StoreError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), reason = %reason, "Ledger document corrupt; regenerating");
                None
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(doc) = stored.filter(LedgerDocument::is_usable) {
            if doc.evaluators != plan.evaluators
                || doc.patients_per_evaluator != plan.patients_per_evaluator
            {
                warn!(
                    store = %store.describe(),
                    "Stored ledger was created with a different evaluator roster; keeping stored assignments"
                );
            }

            info!(
                store = %store.describe(),
                completed = doc.completed.len(),
                "Restored assignment ledger"
            );
            let ledger = Self::from_document(store, doc);
            return Ok((ledger, OpenOutcome::Restored));
        }

        let doc = LedgerDocument::create(plan)?;
        store.save(&doc)?;
        info!(
            store = %store.describe(),
            evaluators = doc.evaluators.len(),
            per_evaluator = doc.patients_per_evaluator,
            "Created assignment ledger"
        );

        Ok((Self::from_document(store, doc), OpenOutcome::Created))
    }

    fn from_document(store: Box<dyn LedgerStore>, doc: LedgerDocument) -> Self {
        let owners = doc
            .assignments
            .iter()
            .flat_map(|(evaluator, patients)| {
                patients.iter().map(move |pid| (pid.clone(), evaluator.clone()))
            })
            .collect();

        Self { store, doc, owners }
    }

    pub fn document(&self) -> &LedgerDocument {
        &self.doc
    }

    /// Evaluator → ordered patient ids
    pub fn assignments(&self) -> &BTreeMap<String, Vec<String>> {
        &self.doc.assignments
    }

    pub fn evaluators(&self) -> &[String] {
        &self.doc.evaluators
    }

    pub fn has_evaluator(&self, evaluator: &str) -> bool {
        self.doc.assignments.contains_key(evaluator)
    }

    /// Total triples across every evaluator
    pub fn len(&self) -> usize {
        self.doc
            .assignments
            .values()
            .flatten()
            .map(|pid| self.query_nums(pid).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn completed_count(&self) -> usize {
        self.doc.completed.len()
    }

    fn query_nums(&self, patient_id: &str) -> &[u32] {
        self.doc
            .queries
            .get(patient_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn patients_of(&self, evaluator: &str) -> Result<&[String], LedgerError> {
        self.doc
            .assignments
            .get(evaluator)
            .map(Vec::as_slice)
            .ok_or_else(|| LedgerError::UnknownEvaluator(evaluator.to_string()))
    }

    /// Check that a triple belongs to this ledger
    pub fn validate(&self, triple: &Triple) -> Result<(), LedgerError> {
        if !self.has_evaluator(&triple.evaluator) {
            return Err(LedgerError::UnknownEvaluator(triple.evaluator.clone()));
        }

        if self.owners.get(&triple.patient_id) != Some(&triple.evaluator) {
            return Err(LedgerError::NotAssigned {
                evaluator: triple.evaluator.clone(),
                patient_id: triple.patient_id.clone(),
            });
        }

        if !self.query_nums(&triple.patient_id).contains(&triple.query_num) {
            return Err(LedgerError::UnknownQuery {
                patient_id: triple.patient_id.clone(),
                query_num: triple.query_num,
            });
        }

        Ok(())
    }

    /// Mark a triple completed in memory only
    pub(crate) fn record_completion(&mut self, triple: &Triple) -> Result<MarkOutcome, LedgerError> {
        self.validate(triple)?;
        if self.doc.completed.insert(triple.clone()) {
            Ok(MarkOutcome::Marked)
        } else {
            Ok(MarkOutcome::AlreadyComplete)
        }
    }

    /// Undo in-memory completions whose save failed
    pub(crate) fn forget_completions(&mut self, triples: &[Triple]) {
        for triple in triples {
            self.doc.completed.remove(triple);
        }
    }

    /// Write the current document to the store
    pub(crate) fn persist(&mut self) -> Result<(), LedgerError> {
        self.doc.updated_at = Utc::now();
        self.store.save(&self.doc)?;
        Ok(())
    }

    /// Mark a triple completed and save
    ///
    /// Marking an already completed triple is a no-op. If the save fails the
    /// triple is left pending.
    pub fn mark_complete(&mut self, triple: &Triple) -> Result<MarkOutcome, LedgerError> {
        let outcome = self.record_completion(triple)?;
        if outcome == MarkOutcome::AlreadyComplete {
            return Ok(outcome);
        }

        if let Err(e) = self.persist() {
            self.doc.completed.remove(triple);
            return Err(e);
        }

        info!(
            evaluator = %triple.evaluator,
            patient_id = %triple.patient_id,
            query_num = triple.query_num,
            "Marked complete"
        );
        Ok(outcome)
    }

    pub fn is_complete(&self, triple: &Triple) -> bool {
        self.doc.completed.contains(triple)
    }

    /// First pending `(patient_id, query_num)` in assignment order, then
    /// ascending query number; `None` once the evaluator is finished
    pub fn next_pending(&self, evaluator: &str) -> Result<Option<(String, u32)>, LedgerError> {
        Ok(self
            .queue(evaluator)?
            .into_iter()
            .find(|entry| !entry.completed)
            .map(|entry| (entry.patient_id, entry.query_num)))
    }

    /// Every assigned triple for an evaluator with its status, in work order
    pub fn queue(&self, evaluator: &str) -> Result<Vec<QueueEntry>, LedgerError> {
        let patients = self.patients_of(evaluator)?;

        Ok(patients
            .iter()
            .flat_map(|pid| {
                self.query_nums(pid).iter().map(move |&query_num| QueueEntry {
                    patient_id: pid.clone(),
                    query_num,
                    completed: self.is_complete(&Triple::new(evaluator, pid.clone(), query_num)),
                })
            })
            .collect())
    }

    pub fn progress(&self, evaluator: &str) -> Result<EvaluatorProgress, LedgerError> {
        let patients = self.patients_of(evaluator)?;

        let patients: Vec<PatientProgress> = patients
            .iter()
            .map(|pid| {
                let nums = self.query_nums(pid);
                let completed = nums
                    .iter()
                    .filter(|&&q| self.is_complete(&Triple::new(evaluator, pid.clone(), q)))
                    .count();
                PatientProgress {
                    patient_id: pid.clone(),
                    completed,
                    total: nums.len(),
                }
            })
            .collect();

        let completed = patients.iter().map(|p| p.completed).sum();
        let total = patients.iter().map(|p| p.total).sum();

        Ok(EvaluatorProgress {
            evaluator: evaluator.to_string(),
            completed,
            total,
            percent: percent(completed, total),
            finished: completed == total,
            patients,
        })
    }

    /// Progress for every evaluator, in configured order
    pub fn summary(&self) -> LedgerSummary {
        let evaluators: Vec<EvaluatorProgress> = self
            .doc
            .evaluators
            .iter()
            .filter_map(|e| self.progress(e).ok())
            .collect();

        let completed = evaluators.iter().map(|p| p.completed).sum();
        let total = evaluators.iter().map(|p| p.total).sum();

        LedgerSummary {
            completed,
            total,
            percent: percent(completed, total),
            created_at: self.doc.created_at,
            updated_at: self.doc.updated_at,
            evaluators,
        }
    }

    /// Clear every completion flag, keeping the partition
    ///
    /// Returns how many completions were cleared.
    pub fn reset_progress(&mut self) -> Result<usize, LedgerError> {
        let previous = std::mem::take(&mut self.doc.completed);
        let cleared = previous.len();

        if let Err(e) = self.persist() {
            self.doc.completed = previous;
            return Err(e);
        }

        warn!(cleared, "Evaluation progress reset");
        Ok(cleared)
    }
}
