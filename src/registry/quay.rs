//! Quay Tag Lister (C2): paginated tag→digest history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::TagRecord;
use crate::registry::auth;
use crate::utils::error::PmtError;

/// The environment variable that relaxes the quay.io-only routing so
/// development can exercise the Quay code path against a local or mocked
/// registry.
pub const LOCAL_TEST_VAR: &str = "PMT_LOCAL_TEST";

/// A repository's tag→digest history, ordered newest-first, with the
/// referrers-fallback tag convention (`sha256-...`) already excluded.
#[async_trait]
pub trait TagLister: Send + Sync {
    async fn list_tags(&self, repository: &str) -> Result<Vec<TagRecord>, PmtError>;
}

#[derive(Debug, Deserialize)]
struct QuayTagsResponse {
    tags: Vec<QuayTagEntry>,
    #[serde(default)]
    has_additional: bool,
}

#[derive(Debug, Deserialize)]
struct QuayTagEntry {
    name: String,
    #[serde(default)]
    manifest_digest: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
}

/// Production [`TagLister`]: Quay's public tag-history API for
/// `quay.io`-hosted repositories (or any host, when `PMT_LOCAL_TEST` is
/// set), the standard OCI distribution tag-list endpoint otherwise.
pub struct DistributionTagLister {
    http: reqwest::Client,
    api_base: String,
    registry_host: String,
    origin: String,
}

impl DistributionTagLister {
    #[must_use]
    pub fn new(registry_host: impl Into<String>) -> Self {
        let registry_host = registry_host.into();
        let origin = format!("https://{registry_host}");
        Self {
            http: reqwest::Client::new(),
            api_base: "https://quay.io/api/v1".to_string(),
            registry_host,
            origin,
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Overrides the scheme+authority used for the OCI distribution
    /// fallback path (`registry_host` still drives Quay-vs-distribution
    /// routing and auth lookup). For tests against a mocked registry.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    fn uses_quay_api(&self) -> bool {
        self.registry_host == "quay.io" || std::env::var(LOCAL_TEST_VAR).is_ok()
    }

    async fn list_tags_quay(&self, repository: &str) -> Result<Vec<TagRecord>, PmtError> {
        let repo_path = repository
            .strip_prefix(&format!("{}/", self.registry_host))
            .unwrap_or(repository);

        let mut records = Vec::new();
        let mut page = 1_u32;
        loop {
            let url = format!(
                "{}/repository/{repo_path}/tag/?page={page}&onlyActiveTags=true&limit=100",
                self.api_base
            );
            let response = self.http.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(PmtError::registry_unavailable(format!(
                    "quay tag API returned HTTP {}",
                    response.status()
                )));
            }
            let body: QuayTagsResponse = response.json().await?;

            for entry in body.tags {
                if is_referrers_fallback_tag(&entry.name) {
                    continue;
                }
                let Some(digest) = entry.manifest_digest else {
                    continue;
                };
                let last_modified = entry
                    .last_modified
                    .as_deref()
                    .and_then(parse_quay_timestamp)
                    .unwrap_or_else(Utc::now);
                records.push(TagRecord {
                    tag: entry.name,
                    digest,
                    last_modified,
                });
            }

            if !body.has_additional {
                break;
            }
            page += 1;
        }

        Ok(records)
    }

    async fn list_tags_distribution(&self, repository: &str) -> Result<Vec<TagRecord>, PmtError> {
        let auth = auth::resolve(&self.registry_host);
        let url = format!("{}/v2/{repository}/tags/list", self.origin);
        let mut req = self.http.get(&url);
        if let Some(header) = auth.basic_header() {
            req = req.header("Authorization", header);
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(PmtError::registry_unavailable(format!(
                "distribution tags/list returned HTTP {}",
                response.status()
            )));
        }
        let body: crate::registry::types::TagList = response.json().await?;

        let mut records = Vec::with_capacity(body.tags.len());
        for tag in body.tags {
            if is_referrers_fallback_tag(&tag) {
                continue;
            }
            let digest = self.resolve_tag_digest(repository, &tag).await?;
            records.push(TagRecord {
                tag,
                digest,
                last_modified: Utc::now(),
            });
        }
        Ok(records)
    }

    /// The distribution tag-list endpoint doesn't carry digests; resolve
    /// each tag's digest from the `Docker-Content-Digest` response header
    /// on a manifest HEAD-equivalent request.
    async fn resolve_tag_digest(&self, repository: &str, tag: &str) -> Result<String, PmtError> {
        let auth = auth::resolve(&self.registry_host);
        let url = format!("{}/v2/{repository}/manifests/{tag}", self.origin);
        let mut req = self
            .http
            .head(&url)
            .header("Accept", "application/vnd.oci.image.manifest.v1+json");
        if let Some(header) = auth.basic_header() {
            req = req.header("Authorization", header);
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(PmtError::registry_unavailable(format!(
                "manifest HEAD for tag {tag} returned HTTP {}",
                response.status()
            )));
        }
        response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .ok_or_else(|| {
                PmtError::registry_unavailable(format!(
                    "manifest response for tag {tag} missing Docker-Content-Digest"
                ))
            })
    }
}

#[async_trait]
impl TagLister for DistributionTagLister {
    async fn list_tags(&self, repository: &str) -> Result<Vec<TagRecord>, PmtError> {
        if self.uses_quay_api() {
            self.list_tags_quay(repository).await
        } else {
            self.list_tags_distribution(repository).await
        }
    }
}

/// True for tags that follow the `sha256-<digest>` referrers-fallback
/// convention, which are not part of a bundle's logical tag history.
#[must_use]
pub fn is_referrers_fallback_tag(tag: &str) -> bool {
    tag.starts_with("sha256-") && tag.len() > "sha256-".len()
}

fn parse_quay_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
