//! Classifies a parsed YAML document as a Pipeline, an inline
//! PipelineRun, a reference-only PipelineRun, or a non-pipeline resource.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::utils::error::PmtError;

/// How a file's top-level `kind` relates to a usable Pipeline spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// `kind: Pipeline`; the spec lives at `spec`.
    Pipeline,
    /// `kind: PipelineRun` with `spec.pipelineSpec` inline; the spec lives
    /// at `spec.pipelineSpec`.
    PipelineRunInline,
    /// `kind: PipelineRun` with only `spec.pipelineRef`; there is no local
    /// spec to edit.
    PipelineRunRefOnly,
    /// Any other `kind`, or a document without one.
    NonPipeline,
}

/// A YAML file loaded for editing: its path, raw source (for the
/// minimal-diff surgeon), and its classification.
#[derive(Debug, Clone)]
pub struct PipelineDocument {
    pub path: PathBuf,
    pub source: String,
    pub kind: PipelineKind,
}

impl PipelineDocument {
    /// The path segments (from the document root) to the Pipeline spec
    /// this document exposes, if any.
    #[must_use]
    pub fn spec_path(&self) -> Option<&'static [&'static str]> {
        match self.kind {
            PipelineKind::Pipeline => Some(&["spec"]),
            PipelineKind::PipelineRunInline => Some(&["spec", "pipelineSpec"]),
            PipelineKind::PipelineRunRefOnly | PipelineKind::NonPipeline => None,
        }
    }
}

/// Loads and classifies the file at `path`, tolerating multi-document YAML
/// by looking only at the first non-empty document.
pub fn classify(path: &Path) -> Result<PipelineDocument, PmtError> {
    let source = std::fs::read_to_string(path).map_err(|source| PmtError::PipelineFileUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let first_document = first_non_empty_document(&source, path)?;
    let kind = classify_value(&first_document);

    Ok(PipelineDocument {
        path: path.to_path_buf(),
        source,
        kind,
    })
}

fn first_non_empty_document(source: &str, path: &Path) -> Result<serde_yaml::Value, PmtError> {
    for document in serde_yaml::Deserializer::from_str(source) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| PmtError::PipelineFileUnparseable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !matches!(value, serde_yaml::Value::Null) {
            return Ok(value);
        }
    }
    Ok(serde_yaml::Value::Null)
}

fn classify_value(value: &serde_yaml::Value) -> PipelineKind {
    let Some(mapping) = value.as_mapping() else {
        return PipelineKind::NonPipeline;
    };
    let kind = mapping
        .get(serde_yaml::Value::String("kind".to_string()))
        .and_then(serde_yaml::Value::as_str);

    match kind {
        Some("Pipeline") => PipelineKind::Pipeline,
        Some("PipelineRun") => classify_pipeline_run(mapping),
        _ => PipelineKind::NonPipeline,
    }
}

fn classify_pipeline_run(mapping: &serde_yaml::Mapping) -> PipelineKind {
    let spec = mapping
        .get(serde_yaml::Value::String("spec".to_string()))
        .and_then(serde_yaml::Value::as_mapping);
    let Some(spec) = spec else {
        return PipelineKind::PipelineRunRefOnly;
    };

    if spec.contains_key(serde_yaml::Value::String("pipelineSpec".to_string())) {
        PipelineKind::PipelineRunInline
    } else {
        PipelineKind::PipelineRunRefOnly
    }
}
