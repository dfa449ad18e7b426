use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TransportError;

/// Largest inbound frame accepted by default (20 MiB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 20 * 1024 * 1024;

/// Default TCP keepalive interval
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(20);

/// Default bound on the TCP connect + TLS handshake + hello exchange
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS settings for either end of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub enabled: bool,
    /// Directory holding `ca.crt` plus the role's cert/key pair
    pub cert_dir: PathBuf,
    /// Name to verify the server certificate against instead of the dialed
    /// host. Client side only; weakens verification, development use only.
    pub override_host: Option<String>,
}

impl TlsSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            cert_dir: PathBuf::new(),
            override_host: None,
        }
    }

    pub fn mutual(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            cert_dir: cert_dir.into(),
            override_host: None,
        }
    }

    pub fn with_override_host(mut self, host: impl Into<String>) -> Self {
        self.override_host = Some(host.into());
        self
    }
}

/// Transport tuning applied identically in plaintext and TLS mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTuning {
    pub max_message_bytes: usize,
    pub keepalive: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            keepalive: DEFAULT_KEEPALIVE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// A parsed `host:port` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parse `host:port`. IPv6 hosts must be bracketed (`[::1]:50051`).
    pub fn parse(addr: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidAddress(addr.to_string());

        let (host, port) = addr.trim().rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;

        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(v6) => v6,
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form suitable for binding or dialing
    pub fn authority(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
