use std::path::PathBuf;

use thiserror::Error;
use uxv_schema::ErrorCode;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("missing certificate file: {0}")]
    MissingFile(PathBuf),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no PEM certificates in {0}")]
    NoCertificates(PathBuf),

    #[error("no PEM private key in {0}")]
    NoPrivateKey(PathBuf),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("client certificate verifier: {0}")]
    Verifier(String),

    #[error("invalid address {0:?}: expected host:port")]
    InvalidAddress(String),

    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("stream rejected ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("connection closed before acknowledgment")]
    NoAck,
}

impl TransportError {
    /// True for certificate and address problems that no retry can fix
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            TransportError::MissingFile(_)
                | TransportError::ReadFile { .. }
                | TransportError::NoCertificates(_)
                | TransportError::NoPrivateKey(_)
                | TransportError::Tls(_)
                | TransportError::Verifier(_)
                | TransportError::InvalidAddress(_)
                | TransportError::InvalidServerName(_)
        )
    }
}
