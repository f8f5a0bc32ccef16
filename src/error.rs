use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TierError {
    #[error("missing config file tierfetch.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("missing job parameter: {0}")]
    MissingParameter(String),

    #[error("invalid archive file id: {0}")]
    InvalidArchiveId(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("archive request failed: {0}")]
    ArchiveHttp(String),

    #[error("archive returned status {status}: {message}")]
    ArchiveStatus { status: u16, message: String },

    #[error("could not connect to archive: {0}")]
    ArchiveConnectivity(String),

    #[error("file not found in any storage tier: {0}")]
    NotFound(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("hashcheck error: {0}")]
    Hashcheck(String),

    #[error("integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    #[error("malformed CDTA file: {0}")]
    MalformedCdta(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl TierError {
    /// Transport-level failures that count toward tripping the archive circuit breaker.
    pub fn is_connectivity(&self) -> bool {
        match self {
            TierError::ArchiveConnectivity(_) => true,
            TierError::ArchiveStatus { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}
