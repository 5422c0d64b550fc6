//! Registry Client (C1): manifests, referrers, and blobs over HTTP, with
//! capped-exponential-backoff retry on transient failures.

use async_trait::async_trait;
use std::time::Duration;

use crate::registry::auth::{self, RegistryAuth};
use crate::registry::types::{Descriptor, Manifest, ReferrersIndex};
use crate::utils::error::PmtError;

/// Retry policy for transient registry failures (5xx, connection reset,
/// 429). 401/403/404 are never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// The delay before the `attempt`-th retry (0-indexed), capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self
            .initial_delay
            .saturating_mul(self.multiplier.saturating_pow(attempt));
        scaled.min(self.max_delay)
    }
}

/// Fetches manifests, referrers, and blobs from an OCI registry.
///
/// Object-safe so tests can substitute a fake implementation without
/// touching the resolver, mirroring how an LLM-provider seam is modeled
/// in the rest of this crate's ambient stack.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest, PmtError>;
    async fn list_referrers(&self, repository: &str, digest: &str) -> Result<Vec<Descriptor>, PmtError>;
    async fn fetch_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>, PmtError>;
}

/// `reqwest`-backed implementation of [`RegistryClient`] against the OCI
/// distribution API, falling back to the referrers-tag convention when the
/// server doesn't support the native referrers endpoint.
pub struct OciRegistryClient {
    http: reqwest::Client,
    registry_host: String,
    origin: String,
    retry: RetryConfig,
}

impl OciRegistryClient {
    #[must_use]
    pub fn new(registry_host: impl Into<String>) -> Self {
        let registry_host = registry_host.into();
        let origin = format!("https://{registry_host}");
        Self {
            http: reqwest::Client::new(),
            registry_host,
            origin,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the scheme+authority requests are sent to, while keeping
    /// `registry_host` (used for auth lookup) unchanged. Lets tests and a
    /// locally-mirrored registry point at a plain-HTTP origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    fn auth(&self) -> RegistryAuth {
        auth::resolve(&self.registry_host)
    }

    fn base_url(&self, repository: &str) -> String {
        let repo_path = repository
            .strip_prefix(&format!("{}/", self.registry_host))
            .unwrap_or(repository);
        format!("{}/v2/{repo_path}", self.origin)
    }

    /// Runs `op` with capped exponential backoff, retrying only on
    /// transient failures: connection errors, timeouts, 5xx, and 429.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, PmtError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
        T: TryFromResponse,
    {
        let mut attempt = 0;
        loop {
            let result = op().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return T::try_from_response(response).await;
                    }
                    if matches!(status.as_u16(), 401 | 403 | 404) {
                        return Err(PmtError::registry_unavailable(format!(
                            "registry returned HTTP {status}"
                        )));
                    }
                    if !Self::is_retryable_status(status.as_u16()) || attempt + 1 >= self.retry.max_attempts {
                        return Err(PmtError::registry_unavailable(format!(
                            "registry returned HTTP {status} after {attempt} retries"
                        )));
                    }
                }
                Err(err) => {
                    if !(err.is_connect() || err.is_timeout()) || attempt + 1 >= self.retry.max_attempts {
                        return Err(PmtError::from(err));
                    }
                }
            }
            let delay = self.retry.delay_for_attempt(attempt);
            tracing::debug!("retrying registry request after {delay:?} (attempt {attempt})");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn is_retryable_status(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }

    /// Calls the native OCI v1.1 referrers endpoint. Returns `Ok(None)`
    /// when the server doesn't support it (404), so the caller can fall
    /// back to the referrers-tag convention; any other non-2xx is a real
    /// registry error and propagates normally.
    async fn fetch_referrers_native(
        &self,
        repository: &str,
        digest: &str,
    ) -> Result<Option<Vec<Descriptor>>, PmtError> {
        let url = format!("{}/referrers/{digest}", self.base_url(repository));
        let auth = self.auth();
        let mut attempt = 0;
        loop {
            let mut req = self
                .http
                .get(&url)
                .header("Accept", "application/vnd.oci.image.index.v1+json");
            if let Some(header) = auth.basic_header() {
                req = req.header("Authorization", header);
            }
            match req.send().await {
                Ok(response) if response.status().as_u16() == 404 => return Ok(None),
                Ok(response) if response.status().is_success() => {
                    let index: ReferrersIndex = response.json().await?;
                    return Ok(Some(index.manifests));
                }
                Ok(response) => {
                    let status = response.status();
                    if !Self::is_retryable_status(status.as_u16()) || attempt + 1 >= self.retry.max_attempts {
                        return Err(PmtError::registry_unavailable(format!(
                            "registry returned HTTP {status} after {attempt} retries"
                        )));
                    }
                }
                Err(err) => {
                    if !(err.is_connect() || err.is_timeout()) || attempt + 1 >= self.retry.max_attempts {
                        return Err(PmtError::from(err));
                    }
                }
            }
            let delay = self.retry.delay_for_attempt(attempt);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fetch_referrers_tag(
        &self,
        repository: &str,
        digest: &str,
    ) -> Result<Vec<Descriptor>, PmtError> {
        let fallback_tag = digest.replace(':', "-");
        let manifest = self.get_manifest(repository, &fallback_tag).await?;
        Ok(manifest.layers)
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest, PmtError> {
        let url = format!("{}/manifests/{reference}", self.base_url(repository));
        let auth = self.auth();
        self.with_retry(|| {
            let mut req = self.http.get(&url).header(
                "Accept",
                "application/vnd.oci.image.manifest.v1+json,application/vnd.docker.distribution.manifest.v2+json",
            );
            if let Some(header) = auth.basic_header() {
                req = req.header("Authorization", header);
            }
            req.send()
        })
        .await
    }

    async fn list_referrers(&self, repository: &str, digest: &str) -> Result<Vec<Descriptor>, PmtError> {
        if let Some(descriptors) = self.fetch_referrers_native(repository, digest).await? {
            return Ok(descriptors);
        }
        self.fetch_referrers_tag(repository, digest).await
    }

    async fn fetch_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>, PmtError> {
        let url = format!("{}/blobs/{digest}", self.base_url(repository));
        let auth = self.auth();
        self.with_retry(|| {
            let mut req = self.http.get(&url);
            if let Some(header) = auth.basic_header() {
                req = req.header("Authorization", header);
            }
            req.send()
        })
        .await
    }
}

/// Conversion from an already-successful `reqwest::Response` into the
/// typed result `with_retry` returns, so the same retry loop serves JSON
/// and binary endpoints alike.
#[async_trait]
trait TryFromResponse: Sized {
    async fn try_from_response(response: reqwest::Response) -> Result<Self, PmtError>;
}

#[async_trait]
impl TryFromResponse for Manifest {
    async fn try_from_response(response: reqwest::Response) -> Result<Self, PmtError> {
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TryFromResponse for ReferrersIndex {
    async fn try_from_response(response: reqwest::Response) -> Result<Self, PmtError> {
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TryFromResponse for Vec<u8> {
    async fn try_from_response(response: reqwest::Response) -> Result<Self, PmtError> {
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_caps() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(cfg.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn retryable_status_excludes_client_errors() {
        assert!(OciRegistryClient::is_retryable_status(503));
        assert!(OciRegistryClient::is_retryable_status(429));
        assert!(!OciRegistryClient::is_retryable_status(404));
        assert!(!OciRegistryClient::is_retryable_status(401));
    }
}
