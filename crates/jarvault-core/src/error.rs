use std::path::PathBuf;
use thiserror::Error;

/// Core error types for jarvault.
///
/// Resolution failures are *not* represented here: the resolver captures
/// them as [`crate::model::ArtifactState`] values so callers are forced to
/// handle every outcome. `BundleError` covers the lower-level mechanics
/// (network transport, filesystem, malformed input) that those states are
/// built from.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("request failed for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("empty response body from {0}")]
    EmptyDownload(String),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("invalid artifact coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("invalid naming template: {0}")]
    InvalidTemplate(String),

    #[error("failed to parse version manifest: {0}")]
    Manifest(String),

    #[error("failed to read archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("filesystem watch error: {0}")]
    Watch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for `Result<T, BundleError>`.
pub type Result<T> = std::result::Result<T, BundleError>;
