//! Evaluation records
//!
//! A completed rating form: six rated metrics per model, each a pass/fail
//! rating with a free-text justification, plus the overall preference and
//! its mandatory reasons. Ratings are stored as enums and rendered with the
//! exact wording evaluators see when the record is flattened for the
//! remote spreadsheet.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cases::PatientQuery;
use crate::ledger::Triple;

/// Local validation errors, raised before any network call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("Preference reasons are required")]
    MissingPreferenceReasons,

    #[error("Evaluator is required")]
    MissingEvaluator,

    #[error("Patient id is required")]
    MissingPatientId,

    #[error("Query number must be at least 1")]
    InvalidQueryNum,
}

/// Rated metrics, in form order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Source,
    Hallucination,
    Safety,
    Completeness,
    Extraneous,
    Flow,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Source,
        Metric::Hallucination,
        Metric::Safety,
        Metric::Completeness,
        Metric::Extraneous,
        Metric::Flow,
    ];

    /// Wording shown for a passing answer
    pub fn pass_label(&self) -> &'static str {
        match self {
            Metric::Source => "No source issues (Pass)",
            Metric::Hallucination => "No Hallucination",
            Metric::Safety => "No Safety Omission (Safe)",
            Metric::Completeness => "No Omission (Complete)",
            Metric::Extraneous => "No extraneous information",
            Metric::Flow => "No flow issues",
        }
    }

    /// Wording shown for a failing answer
    pub fn fail_label(&self) -> &'static str {
        match self {
            Metric::Source => "Yes, at least one source (Fail)",
            Metric::Hallucination => "Yes Hallucination",
            Metric::Safety => "Yes, Safety Omission (Unsafe)",
            Metric::Completeness => "Yes, Omission (Incomplete)",
            Metric::Extraneous => "Yes, extraneous information",
            Metric::Flow => "Yes, flow issues",
        }
    }

    pub fn label(&self, rating: Rating) -> &'static str {
        match rating {
            Rating::Pass => self.pass_label(),
            Rating::Fail => self.fail_label(),
        }
    }
}

/// Categorical rating; pass is the form default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    #[default]
    Pass,
    Fail,
}

/// One metric: rating plus optional justification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricScore {
    pub rating: Rating,
    pub justification: String,
}

/// Every metric for one model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelScores {
    pub source: MetricScore,
    pub hallucination: MetricScore,
    pub safety: MetricScore,
    pub completeness: MetricScore,
    pub extraneous: MetricScore,
    pub flow: MetricScore,
}

impl ModelScores {
    pub fn get(&self, metric: Metric) -> &MetricScore {
        match metric {
            Metric::Source => &self.source,
            Metric::Hallucination => &self.hallucination,
            Metric::Safety => &self.safety,
            Metric::Completeness => &self.completeness,
            Metric::Extraneous => &self.extraneous,
            Metric::Flow => &self.flow,
        }
    }

    fn label(&self, metric: Metric) -> String {
        metric.label(self.get(metric).rating).to_string()
    }

    fn justification(&self, metric: Metric) -> String {
        self.get(metric).justification.clone()
    }
}

/// Overall preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preference {
    #[serde(rename = "Model A", alias = "A")]
    ModelA,
    #[serde(rename = "Model B", alias = "B")]
    ModelB,
    #[serde(rename = "Tie", alias = "tie")]
    Tie,
}

impl Preference {
    pub fn label(&self) -> &'static str {
        match self {
            Preference::ModelA => "Model A",
            Preference::ModelB => "Model B",
            Preference::Tie => "Tie",
        }
    }
}

/// A completed evaluation form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRecord {
    pub case: PatientQuery,
    pub evaluator: String,
    pub model_a: ModelScores,
    pub model_b: ModelScores,
    pub preference: Preference,
    pub pref_reasons: String,
}

impl EvaluationRecord {
    /// Reject forms that must never reach the remote store
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.evaluator.trim().is_empty() {
            return Err(RecordError::MissingEvaluator);
        }
        if self.case.patient_id.trim().is_empty() {
            return Err(RecordError::MissingPatientId);
        }
        if self.case.query_num < 1 {
            return Err(RecordError::InvalidQueryNum);
        }
        if self.pref_reasons.trim().is_empty() {
            return Err(RecordError::MissingPreferenceReasons);
        }
        Ok(())
    }

    /// Ledger key for this record
    pub fn triple(&self) -> Triple {
        Triple::new(
            self.evaluator.clone(),
            self.case.patient_id.clone(),
            self.case.query_num,
        )
    }

    /// Flat spreadsheet row
    pub fn to_payload(&self) -> SubmissionPayload {
        let a = &self.model_a;
        let b = &self.model_b;

        SubmissionPayload {
            patient_id: self.case.patient_id.clone(),
            query_num: self.case.query_num,
            full_query: self.case.full_query.clone(),
            patient_summary: self.case.patient_summary.clone(),
            evaluator: self.evaluator.clone(),
            a_source: a.label(Metric::Source),
            a_source_f: a.justification(Metric::Source),
            a_hallucination: a.label(Metric::Hallucination),
            a_hall_f: a.justification(Metric::Hallucination),
            a_safety: a.label(Metric::Safety),
            a_safety_f: a.justification(Metric::Safety),
            a_completeness: a.label(Metric::Completeness),
            a_comp_f: a.justification(Metric::Completeness),
            a_extraneous: a.label(Metric::Extraneous),
            a_extra_f: a.justification(Metric::Extraneous),
            a_flow: a.label(Metric::Flow),
            a_flow_f: a.justification(Metric::Flow),
            b_source: b.label(Metric::Source),
            b_source_f: b.justification(Metric::Source),
            b_hallucination: b.label(Metric::Hallucination),
            b_hall_f: b.justification(Metric::Hallucination),
            b_safety: b.label(Metric::Safety),
            b_safety_f: b.justification(Metric::Safety),
            b_completeness: b.label(Metric::Completeness),
            b_comp_f: b.justification(Metric::Completeness),
            b_extraneous: b.label(Metric::Extraneous),
            b_extra_f: b.justification(Metric::Extraneous),
            b_flow: b.label(Metric::Flow),
            b_flow_f: b.justification(Metric::Flow),
            preference: self.preference.label().to_string(),
            pref_reasons: self.pref_reasons.clone(),
        }
    }
}

/// JSON body POSTed to the spreadsheet endpoint
///
/// Each `*_f` field is the justification for the score before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    #[serde(rename = "patientId")]
    pub patient_id: String,
    #[serde(rename = "queryNum")]
    pub query_num: u32,
    #[serde(rename = "fullQuery")]
    pub full_query: String,
    #[serde(rename = "patientSummary")]
    pub patient_summary: String,
    pub evaluator: String,
    pub a_source: String,
    pub a_source_f: String,
    pub a_hallucination: String,
    pub a_hall_f: String,
    pub a_safety: String,
    pub a_safety_f: String,
    pub a_completeness: String,
    pub a_comp_f: String,
    pub a_extraneous: String,
    pub a_extra_f: String,
    pub a_flow: String,
    pub a_flow_f: String,
    pub b_source: String,
    pub b_source_f: String,
    pub b_hallucination: String,
    pub b_hall_f: String,
    pub b_safety: String,
    pub b_safety_f: String,
    pub b_completeness: String,
    pub b_comp_f: String,
    pub b_extraneous: String,
    pub b_extra_f: String,
    pub b_flow: String,
    pub b_flow_f: String,
    pub preference: String,
    pub pref_reasons: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pref_reasons: &str) -> EvaluationRecord {
        EvaluationRecord {
            case: PatientQuery {
                patient_id: "P7".to_string(),
                query_num: 3,
                full_query: "Should we adjust the dose?".to_string(),
                patient_summary: "72F, CKD stage 3".to_string(),
            },
            evaluator: "Evaluator 2".to_string(),
            model_a: ModelScores {
                hallucination: MetricScore {
                    rating: Rating::Fail,
                    justification: "Invented a trial".to_string(),
                },
                ..Default::default()
            },
            model_b: ModelScores::default(),
            preference: Preference::ModelB,
            pref_reasons: pref_reasons.to_string(),
        }
    }

    #[test]
    fn test_payload_has_exact_field_set() {
        let value = serde_json::to_value(record("B cites guidelines").to_payload()).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();

        let mut expected = vec![
            "patientId", "queryNum", "fullQuery", "patientSummary", "evaluator",
            "a_source", "a_source_f", "a_hallucination", "a_hall_f", "a_safety", "a_safety_f",
            "a_completeness", "a_comp_f", "a_extraneous", "a_extra_f", "a_flow", "a_flow_f",
            "b_source", "b_source_f", "b_hallucination", "b_hall_f", "b_safety", "b_safety_f",
            "b_completeness", "b_comp_f", "b_extraneous", "b_extra_f", "b_flow", "b_flow_f",
            "preference", "pref_reasons",
        ];
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_payload_uses_form_wording() {
        let payload = record("B cites guidelines").to_payload();
        assert_eq!(payload.a_hallucination, "Yes Hallucination");
        assert_eq!(payload.a_hall_f, "Invented a trial");
        assert_eq!(payload.b_hallucination, "No Hallucination");
        assert_eq!(payload.a_source, "No source issues (Pass)");
        assert_eq!(payload.preference, "Model B");
        assert_eq!(payload.query_num, 3);
    }

    #[test]
    fn test_blank_pref_reasons_rejected() {
        assert_eq!(record("").validate(), Err(RecordError::MissingPreferenceReasons));
        assert_eq!(record("  \n ").validate(), Err(RecordError::MissingPreferenceReasons));
        assert_eq!(record("clearer").validate(), Ok(()));
    }

    #[test]
    fn test_preference_accepts_short_forms() {
        let p: Preference = serde_json::from_str("\"A\"").unwrap();
        assert_eq!(p, Preference::ModelA);
        let p: Preference = serde_json::from_str("\"Model B\"").unwrap();
        assert_eq!(p, Preference::ModelB);
        let p: Preference = serde_json::from_str("\"tie\"").unwrap();
        assert_eq!(p, Preference::Tie);
    }

    #[test]
    fn test_scores_default_to_pass() {
        let scores: ModelScores = serde_json::from_str(r#"{"flow": {"rating": "fail"}}"#).unwrap();
        assert_eq!(scores.flow.rating, Rating::Fail);
        assert_eq!(scores.flow.justification, "");
        assert!(Metric::ALL
            .iter()
            .filter(|m| **m != Metric::Flow)
            .all(|m| scores.get(*m).rating == Rating::Pass));
    }

    #[test]
    fn test_triple_from_record() {
        assert_eq!(record("x").triple(), Triple::new("Evaluator 2", "P7", 3));
    }
}
