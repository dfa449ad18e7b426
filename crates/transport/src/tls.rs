//! Certificate loading and rustls configuration for both channel roles.
//!
//! Every function here runs before any socket is bound or dialed, so a bad
//! certificate directory stops startup instead of degrading to plaintext.

use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::TransportError;
use crate::settings::Endpoint;

pub const CA_CERT: &str = "ca.crt";
pub const SERVER_CERT: &str = "server.crt";
pub const SERVER_KEY: &str = "server.key";
pub const CLIENT_CERT: &str = "client.crt";
pub const CLIENT_KEY: &str = "client.key";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    if !path.is_file() {
        return Err(TransportError::MissingFile(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|source| TransportError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    let fingerprint = format!("{:x}", Sha256::digest(&bytes));
    info!(
        path = %path.display(),
        bytes = bytes.len(),
        sha256 = &fingerprint[..16],
        "Loaded TLS material"
    );
    Ok(bytes)
}

/// Load every certificate in a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TransportError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TransportError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|source| TransportError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TransportError::NoPrivateKey(path.to_path_buf()))
}

fn load_roots(path: &Path) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// Server credentials: present `server.crt`/`server.key` and require a client
/// certificate chained to `ca.crt`.
pub fn server_config(cert_dir: &Path) -> Result<Arc<ServerConfig>, TransportError> {
    let roots = load_roots(&cert_dir.join(CA_CERT))?;
    let chain = load_certs(&cert_dir.join(SERVER_CERT))?;
    let key = load_private_key(&cert_dir.join(SERVER_KEY))?;

    let provider = provider();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| TransportError::Verifier(e.to_string()))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)?;

    info!(cert_dir = %cert_dir.display(), "Server TLS credentials built (client certificates required)");
    Ok(Arc::new(config))
}

/// Client credentials: verify the server against `ca.crt` and present
/// `client.crt`/`client.key`.
pub fn client_config(cert_dir: &Path) -> Result<Arc<ClientConfig>, TransportError> {
    let roots = load_roots(&cert_dir.join(CA_CERT))?;
    let chain = load_certs(&cert_dir.join(CLIENT_CERT))?;
    let key = load_private_key(&cert_dir.join(CLIENT_KEY))?;

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)?;

    info!(cert_dir = %cert_dir.display(), "Client TLS credentials built");
    Ok(Arc::new(config))
}

/// Identity the server certificate is verified against
pub fn server_name(
    endpoint: &Endpoint,
    override_host: Option<&str>,
) -> Result<ServerName<'static>, TransportError> {
    let name = override_host.unwrap_or(endpoint.host());
    ServerName::try_from(name.to_string())
        .map_err(|_| TransportError::InvalidServerName(name.to_string()))
}
