//! Ambient registry authentication.
//!
//! Credentials are never supplied on the command line; they are read from
//! the container-tools environment the same way `docker`/`podman` do.

use base64::Engine;
use docker_credential::{CredentialRetrievalError, DockerCredential};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Resolved credentials for a single registry host.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RegistryAuth {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn basic_header(&self) -> Option<String> {
        let (user, pass) = (self.username.as_ref()?, self.password.as_ref()?);
        let raw = format!("{user}:{pass}");
        Some(format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        ))
    }
}

/// The environment variable naming the ambient registry-auth file path.
pub const REGISTRY_AUTH_JSON_VAR: &str = "REGISTRY_AUTH_JSON";

#[derive(Debug, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerConfigAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerConfigAuthEntry {
    #[serde(default)]
    auth: Option<String>,
}

/// Locates the auth file: `REGISTRY_AUTH_JSON` if set, else the default
/// `~/.docker/config.json`.
#[must_use]
pub fn auth_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(REGISTRY_AUTH_JSON_VAR) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
}

/// Resolves credentials for `hostname`.
///
/// When `REGISTRY_AUTH_JSON` points at an explicit auth file, it is parsed
/// directly. Otherwise ambient lookup is delegated to `docker_credential`,
/// which understands credential helpers as well as the default config file
/// location. Falls back to anonymous access when no entry is found.
pub fn resolve(hostname: &str) -> RegistryAuth {
    if let Ok(path) = std::env::var(REGISTRY_AUTH_JSON_VAR) {
        return resolve_from_file(Path::new(&path), hostname).unwrap_or_else(RegistryAuth::anonymous);
    }

    match docker_credential::get_credential(hostname) {
        Ok(DockerCredential::UsernamePassword(username, password)) => RegistryAuth {
            username: Some(username),
            password: Some(password),
        },
        Ok(DockerCredential::IdentityToken(token)) => RegistryAuth {
            username: Some("<token>".to_string()),
            password: Some(token),
        },
        Err(CredentialRetrievalError::ConfigNotFound | CredentialRetrievalError::NoCredentialConfigured) => {
            RegistryAuth::anonymous()
        }
        Err(err) => {
            tracing::warn!("failed to read ambient registry auth for {hostname}: {err}");
            RegistryAuth::anonymous()
        }
    }
}

fn resolve_from_file(path: &Path, hostname: &str) -> Option<RegistryAuth> {
    let contents = std::fs::read_to_string(path)
        .inspect_err(|err| tracing::warn!("failed to read {}: {err}", path.display()))
        .ok()?;
    let config: DockerConfigFile = serde_json::from_str(&contents)
        .inspect_err(|err| tracing::warn!("failed to parse {}: {err}", path.display()))
        .ok()?;
    let entry = config.auths.get(hostname)?;
    let auth = entry.auth.as_ref()?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some(RegistryAuth {
        username: Some(user.to_string()),
        password: Some(pass.to_string()),
    })
}
