use std::path::PathBuf;

use thiserror::Error;
use uxv_transport::TransportError;

#[derive(Error, Debug)]
pub enum GroundError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("invalid {kind} name {name:?}: must be a single path component")]
    InvalidName { kind: &'static str, name: String },

    #[error("mission {0} is closed")]
    MissionClosed(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl GroundError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| GroundError::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, GroundError>;

/// Failures uploading a single artifact to the archive endpoint
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid header value: {0}")]
    Header(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("archive rejected {name} (HTTP {status}): {body}")]
    Status {
        name: String,
        status: u16,
        body: String,
    },
}

/// Why a stream ended without an acknowledgment
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("peer closed the stream before end-of-stream after {records} records")]
    Cancelled { records: u64 },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unexpected frame: {0}")]
    Protocol(String),

    #[error("failed to record: {0}")]
    Recorder(#[source] GroundError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
