//! TLS for `wss://` listeners
//!
//! Certificates and the private key are read from PEM files. Clients get
//! TLS from `tokio-tungstenite` itself when the URL scheme is `wss`.

use super::TransportError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

fn open(path: &Path, what: &str) -> Result<BufReader<File>, TransportError> {
    File::open(path).map(BufReader::new).map_err(|e| {
        TransportError::Tls(format!("Failed to open {} file {}: {}", what, path.display(), e))
    })
}

/// Load the certificate chain from a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let mut file = open(path, "cert")?;
    let certs = rustls_pemfile::certs(&mut file)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("Failed to parse PEM certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    info!("Loaded {} certificate(s) from {}", certs.len(), path.display());
    Ok(certs)
}

/// Load the first private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let mut file = open(path, "key")?;
    rustls_pemfile::private_key(&mut file)
        .map_err(|e| TransportError::Tls(format!("Failed to parse PEM private key: {}", e)))?
        .ok_or_else(|| TransportError::Tls(format!("No private key found in {}", path.display())))
}

/// Build an acceptor serving the given certificate and key
pub fn build_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TransportError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Tls(format!("Failed to build TLS server config: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
