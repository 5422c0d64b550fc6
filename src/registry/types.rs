//! Wire-level OCI types consumed by the registry client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An OCI content descriptor (manifest, blob, or referrer entry).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(rename = "artifactType", default)]
    pub artifact_type: Option<String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

/// An OCI image (or artifact) manifest.
///
/// Only `annotations` are semantically consumed by the core; `media_type`
/// and `config` are carried for completeness and for re-serialization when
/// a manual `--new-bundle` replacement needs to echo a reference.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl Manifest {
    #[must_use]
    pub fn has_migration(&self) -> bool {
        self.annotations
            .get(crate::model::ANNOTATION_HAS_MIGRATION)
            .is_some_and(|v| v == "true")
    }
}

/// The OCI referrers API response body (an image index of referrer
/// descriptors).
#[derive(Debug, Clone, Deserialize)]
pub struct ReferrersIndex {
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

/// A single page of the OCI distribution tag-listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TagList {
    pub name: String,
    pub tags: Vec<String>,
}
