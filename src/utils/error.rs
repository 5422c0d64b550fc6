use std::path::PathBuf;
use thiserror::Error;

/// The structural error kinds the core engine raises.
///
/// Each variant maps to one of the exit codes in the CLI surface: see
/// [`PmtError::exit_code`].
#[derive(Debug, Error)]
pub enum PmtError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("registry unavailable: {message}")]
    RegistryUnavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("malformed bundle {reference}: {reason}")]
    MalformedBundle { reference: String, reason: String },

    #[error("upgrade endpoint not found: {digest} is not in the tag history of {repository}")]
    UpgradeEndpointNotFound { repository: String, digest: String },

    #[error("pipeline file unreadable: {path}")]
    PipelineFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline file unparseable: {path}: {reason}")]
    PipelineFileUnparseable { path: PathBuf, reason: String },

    #[error("migration failed: {bundle_ref} against {pipeline_file}: {reason}")]
    MigrationFailed {
        bundle_ref: String,
        pipeline_file: PathBuf,
        reason: String,
        timed_out: bool,
    },

    #[error("yaml surgery conflict: {0}")]
    YamlSurgeryConflict(String),
}

impl PmtError {
    /// Map an error kind to the process exit code described by the CLI surface.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_)
            | Self::PipelineFileUnreadable { .. }
            | Self::PipelineFileUnparseable { .. } => 1,
            Self::RegistryUnavailable { .. }
            | Self::MalformedBundle { .. }
            | Self::UpgradeEndpointNotFound { .. } => 2,
            Self::MigrationFailed { .. } => 3,
            Self::YamlSurgeryConflict(_) => 4,
        }
    }

    pub fn registry_unavailable(message: impl Into<String>) -> Self {
        Self::RegistryUnavailable {
            message: message.into(),
            source: None,
        }
    }
}

impl From<reqwest::Error> for PmtError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "failed to connect to registry".to_string()
        } else if let Some(status) = err.status() {
            format!("registry returned HTTP {status}")
        } else {
            "registry request failed".to_string()
        };

        Self::RegistryUnavailable {
            message,
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for PmtError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("malformed JSON: {err}"))
    }
}

/// Render a [`PmtError`] for display on stderr.
///
/// Non-verbose output is a single actionable line; `--verbose` appends the
/// full `Debug` representation and, where present, the error's source chain.
pub fn format_error(error: &PmtError, verbose: bool) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "\u{26a0} Error: {error}");

    if verbose {
        let _ = writeln!(out, "\nDebug info:\n{error:?}");
        if let Some(source) = std::error::Error::source(error) {
            let _ = writeln!(out, "\nCaused by:\n  {source}");
        }
    }

    out
}
