//! Response Loader
//!
//! Resolves the Model A and Model B answer documents for a
//! `(patient_id, query_num)` pair. Resolution walks an ordered list of
//! naming strategies; the first strategy that matches wins. No match is an
//! explicit "not found" outcome, never a failure of the caller.
//!
//! **Strategy order:**
//! 1. `{patient}_{query}_{A|B}.docx` in the root folder
//! 2. root `*.docx` tagged with the patient, the query number and `ModelA`
//! 3. `model_a/Patient {patient}, Model A.docx`, then any `model_a/*.docx`
//!    naming the patient (multi-query document)
//! 4. root `*.docx` naming the patient and `Model A` (multi-query document)

pub mod docx;

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use self::docx::DocxError;

/// Which candidate answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Model {
    A,
    B,
}

impl Model {
    pub fn letter(&self) -> char {
        match self {
            Model::A => 'A',
            Model::B => 'B',
        }
    }

    /// Per-model subfolder name
    pub fn folder(&self) -> &'static str {
        match self {
            Model::A => "model_a",
            Model::B => "model_b",
        }
    }

    /// Compact tag as it appears in normalized file stems
    fn tag(&self) -> &'static str {
        match self {
            Model::A => "modela",
            Model::B => "modelb",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model {}", self.letter())
    }
}

/// Response lookup errors
#[derive(Debug, Error)]
pub enum ResponseError {
    /// No file matched any naming strategy
    #[error("{model} response not found for patient {patient_id} query {query_num}")]
    NotFound {
        patient_id: String,
        query_num: u32,
        model: Model,
    },

    /// A file matched but could not be read
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: DocxError,
    },
}

/// How much of a matched document belongs to the query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentScope {
    /// The file holds exactly one answer
    WholeDocument,
    /// The file holds every query for a patient; cut out `Query N`
    QuerySection,
}

/// A matched response file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDocument {
    pub path: PathBuf,
    pub scope: DocumentScope,
    pub strategy: &'static str,
}

/// One file-naming convention
pub trait NamingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Matched document, or `None` when this convention has no file
    fn resolve(
        &self,
        root: &Path,
        patient_id: &str,
        query_num: u32,
        model: Model,
    ) -> Option<ResolvedDocument>;
}

/// A loaded answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelResponse {
    pub text: String,
    pub source: PathBuf,
}

/// Both answers for a query; `None` means not found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponsePair {
    pub model_a: Option<ModelResponse>,
    pub model_b: Option<ModelResponse>,
}

// ========================================
// Naming strategies
// ========================================

/// `{patient}_{query}_{A|B}.docx`
pub struct TripleFileName;

impl NamingStrategy for TripleFileName {
    fn name(&self) -> &'static str {
        "triple-file-name"
    }

    fn resolve(
        &self,
        root: &Path,
        patient_id: &str,
        query_num: u32,
        model: Model,
    ) -> Option<ResolvedDocument> {
        let path = root.join(format!("{}_{}_{}.docx", patient_id, query_num, model.letter()));
        path.is_file().then(|| ResolvedDocument {
            path,
            scope: DocumentScope::WholeDocument,
            strategy: self.name(),
        })
    }
}

/// Root file naming the patient, the query number and `ModelA`/`Model A`
pub struct ModelTaggedFileName;

impl NamingStrategy for ModelTaggedFileName {
    fn name(&self) -> &'static str {
        "model-tagged-file-name"
    }

    fn resolve(
        &self,
        root: &Path,
        patient_id: &str,
        query_num: u32,
        model: Model,
    ) -> Option<ResolvedDocument> {
        let query_token = query_num.to_string();

        docx_files(root).into_iter().find_map(|path| {
            let stem = file_stem(&path)?;
            let rest = remove_id(&stem, patient_id)?;
            let has_query = rest
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|token| token == query_token);

            (has_query && has_model_tag(&rest, model)).then(|| ResolvedDocument {
                path,
                scope: DocumentScope::WholeDocument,
                strategy: self.name(),
            })
        })
    }
}

/// `model_a/Patient {patient}, Model A.docx`, else any `model_a/*.docx`
/// naming the patient
pub struct PatientFolderFileName;

impl NamingStrategy for PatientFolderFileName {
    fn name(&self) -> &'static str {
        "patient-folder-file-name"
    }

    fn resolve(
        &self,
        root: &Path,
        patient_id: &str,
        _query_num: u32,
        model: Model,
    ) -> Option<ResolvedDocument> {
        let folder = root.join(model.folder());
        if !folder.is_dir() {
            return None;
        }

        let exact = folder.join(format!("Patient {}, {}.docx", patient_id, model));
        let path = if exact.is_file() {
            exact
        } else {
            docx_files(&folder)
                .into_iter()
                .find(|p| file_stem(p).is_some_and(|stem| contains_id(&stem, patient_id)))?
        };

        Some(ResolvedDocument {
            path,
            scope: DocumentScope::QuerySection,
            strategy: self.name(),
        })
    }
}

/// Root file naming the patient and `Model A`, used only when the
/// per-model subfolders are not both present
pub struct RootPatientFileName;

impl NamingStrategy for RootPatientFileName {
    fn name(&self) -> &'static str {
        "root-patient-file-name"
    }

    fn resolve(
        &self,
        root: &Path,
        patient_id: &str,
        _query_num: u32,
        model: Model,
    ) -> Option<ResolvedDocument> {
        if root.join(Model::A.folder()).is_dir() && root.join(Model::B.folder()).is_dir() {
            return None;
        }

        docx_files(root).into_iter().find_map(|path| {
            let stem = file_stem(&path)?;
            let rest = remove_id(&stem, patient_id)?;
            has_model_tag(&rest, model).then(|| ResolvedDocument {
                path,
                scope: DocumentScope::QuerySection,
                strategy: self.name(),
            })
        })
    }
}

/// Strategies in priority order
pub fn default_strategies() -> Vec<Box<dyn NamingStrategy>> {
    vec![
        Box::new(TripleFileName),
        Box::new(ModelTaggedFileName),
        Box::new(PatientFolderFileName),
        Box::new(RootPatientFileName),
    ]
}

// ========================================
// Filename helpers
// ========================================

/// `*.docx` directly inside `dir`, sorted by path
fn docx_files(dir: &Path) -> Vec<PathBuf> {
    let Some(dir_str) = dir.to_str() else {
        warn!(dir = %dir.display(), "Response folder path is not valid UTF-8");
        return Vec::new();
    };

    let pattern = format!("{}/*.docx", glob::Pattern::escape(dir_str));
    let mut files: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|entry| entry.ok()).filter(|p| p.is_file()).collect(),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid response glob pattern");
            Vec::new()
        }
    };
    files.sort();
    files
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

fn is_id_boundary(c: Option<char>) -> bool {
    c.map_or(true, |c| !c.is_ascii_alphanumeric())
}

/// Position of `id` in `stem` where it is not part of a longer identifier
fn find_id(stem: &str, id: &str) -> Option<usize> {
    if id.is_empty() {
        return None;
    }

    stem.match_indices(id).map(|(pos, _)| pos).find(|&pos| {
        let before = stem[..pos].chars().next_back();
        let after = stem[pos + id.len()..].chars().next();
        is_id_boundary(before) && is_id_boundary(after)
    })
}

/// `P1` matches `Patient P1, Model A` but not `Patient P12, Model A`
fn contains_id(stem: &str, id: &str) -> bool {
    find_id(stem, id).is_some()
}

/// Stem with the patient id cut out, or `None` if the id is absent
fn remove_id(stem: &str, id: &str) -> Option<String> {
    let pos = find_id(stem, id)?;
    Some(format!("{} {}", &stem[..pos], &stem[pos + id.len()..]))
}

/// `ModelA`, `Model A`, `model_a`, `Model-A` all normalize to `modela`
fn has_model_tag(stem: &str, model: Model) -> bool {
    let normalized: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    normalized.contains(model.tag())
}

// ========================================
// Loader
// ========================================

/// Finds and reads candidate answers
pub struct ResponseLoader {
    root: PathBuf,
    strategies: Vec<Box<dyn NamingStrategy>>,
}

impl ResponseLoader {
    /// Loader with the default strategy order
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_strategies(root, default_strategies())
    }

    pub fn with_strategies(
        root: impl Into<PathBuf>,
        strategies: Vec<Box<dyn NamingStrategy>>,
    ) -> Self {
        Self {
            root: root.into(),
            strategies,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// First matching document across the strategies
    pub fn resolve(
        &self,
        patient_id: &str,
        query_num: u32,
        model: Model,
    ) -> Option<ResolvedDocument> {
        if !self.root.is_dir() {
            return None;
        }

        self.strategies
            .iter()
            .find_map(|s| s.resolve(&self.root, patient_id, query_num, model))
    }

    /// Resolve and read one answer
    pub fn load(
        &self,
        patient_id: &str,
        query_num: u32,
        model: Model,
    ) -> Result<ModelResponse, ResponseError> {
        let doc = self
            .resolve(patient_id, query_num, model)
            .ok_or_else(|| ResponseError::NotFound {
                patient_id: patient_id.to_string(),
                query_num,
                model,
            })?;

        debug!(
            patient_id = %patient_id,
            query_num,
            model = %model,
            path = %doc.path.display(),
            strategy = doc.strategy,
            "Resolved response document"
        );

        let text = docx::extract_text(&doc.path).map_err(|source| ResponseError::Unreadable {
            path: doc.path.clone(),
            source,
        })?;

        let text = match doc.scope {
            DocumentScope::WholeDocument => text,
            DocumentScope::QuerySection => docx::extract_query_section(&text, query_num).to_string(),
        };

        Ok(ModelResponse {
            text,
            source: doc.path,
        })
    }

    /// Both answers; each side is `None` when missing or unreadable
    pub fn load_pair(&self, patient_id: &str, query_num: u32) -> ResponsePair {
        let load_side = |model: Model| match self.load(patient_id, query_num, model) {
            Ok(response) => Some(response),
            Err(e @ ResponseError::NotFound { .. }) => {
                debug!("{}", e);
                None
            }
            Err(e) => {
                warn!("{}", e);
                None
            }
        };

        ResponsePair {
            model_a: load_side(Model::A),
            model_b: load_side(Model::B),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_id_respects_boundaries() {
        assert!(contains_id("Patient P1, Model A", "P1"));
        assert!(!contains_id("Patient P12, Model A", "P1"));
        assert!(contains_id("P12_3_ModelA", "P12"));
        assert!(!contains_id("anything", ""));
    }

    #[test]
    fn test_model_tag_normalization() {
        assert!(has_model_tag("P1_3_ModelA", Model::A));
        assert!(has_model_tag("Patient P1, Model A", Model::A));
        assert!(has_model_tag("p1 model_b q3", Model::B));
        assert!(!has_model_tag("Patient P1, Model B", Model::A));
    }

    #[test]
    fn test_remove_id_keeps_query_token_separate() {
        assert_eq!(remove_id("12_12_ModelA", "12").as_deref(), Some(" _12_ModelA"));
        assert_eq!(remove_id("P3_ModelA", "P1"), None);
    }

    #[test]
    fn test_model_display() {
        assert_eq!(Model::A.to_string(), "Model A");
        assert_eq!(Model::B.folder(), "model_b");
    }
}
