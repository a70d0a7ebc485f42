//! Error taxonomy for the update pipeline.

use std::path::PathBuf;

use thiserror::Error;

use super::manifest::ManifestParseError;

/// Errors that end an update session.
///
/// Every variant is terminal for the session it occurred in. The coordinator
/// keeps the error so the caller can show a short status line for it.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Transport failure fetching {resource}: {reason}")]
    Transport { resource: String, reason: String },

    #[error("Checksum mismatch for {subject}")]
    ChecksumMismatch { subject: String },

    #[error("Archive entry escapes the extraction root: {entry}")]
    PathTraversal { entry: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("No usable install instructions for {0}")]
    InstructionsUnavailable(String),

    #[error("Failed to launch install script {script}: {source}")]
    ProcessLaunch {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid release manifest: {0}")]
    ManifestParse(#[from] ManifestParseError),

    #[error("Operation not valid in the current state: {0}")]
    InvalidState(String),
}

impl UpdateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transport(resource: &str, reason: impl Into<String>) -> Self {
        Self::Transport {
            resource: resource.to_string(),
            reason: reason.into(),
        }
    }

    /// Short user-facing status line for this failure kind.
    pub fn status_message(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "Download failed",
            Self::ChecksumMismatch { .. } => "Update package is corrupted",
            Self::PathTraversal { .. } => "Update package contains unsafe paths",
            Self::Io { .. } => "Could not write update files",
            Self::Archive(_) => "Update package could not be unpacked",
            Self::UnsupportedPlatform(_) => "Updates are not available for this system",
            Self::InstructionsUnavailable(_) => "Install instructions unavailable",
            Self::ProcessLaunch { .. } => "Could not start the installer",
            Self::ManifestParse(_) => "Release information is invalid",
            Self::InvalidState(_) => "Update is not ready",
        }
    }
}
