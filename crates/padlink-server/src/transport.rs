//! Listener-side TLS configuration.
//!
//! The brokers speak plain TCP by default; TLS is opt-in via certificate
//! and key files (PEM). A self-signed configuration is available for
//! tests.

use std::{path::Path, sync::Arc};

use tokio_rustls::TlsAcceptor;

use crate::error::ServerError;

/// Paths to PEM-encoded TLS material.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Certificate chain file.
    pub cert_path: std::path::PathBuf,
    /// Private key file.
    pub key_path: std::path::PathBuf,
}

/// Build a TLS acceptor from certificate and key files.
pub fn load_tls_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor, ServerError> {
    let cert_pem = std::fs::read(&settings.cert_path).map_err(|e| {
        ServerError::Config(format!("failed to read cert '{}': {e}", settings.cert_path.display()))
    })?;
    let key_pem = std::fs::read(&settings.key_path).map_err(|e| {
        ServerError::Config(format!("failed to read key '{}': {e}", settings.key_path.display()))
    })?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_owned()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a TLS acceptor with a freshly generated self-signed certificate.
pub fn self_signed_acceptor(hostnames: &[&str]) -> Result<TlsAcceptor, ServerError> {
    let names: Vec<String> = hostnames.iter().map(|&name| name.to_owned()).collect();
    let cert = rcgen::generate_simple_self_signed(names)
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_chain = vec![cert.cert.der().clone()];
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tracing::warn!("using self-signed certificate, not for production");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// `load_tls_acceptor` for optional CLI settings.
pub fn maybe_tls(
    cert: Option<&Path>,
    key: Option<&Path>,
) -> Result<Option<TlsAcceptor>, ServerError> {
    match (cert, key) {
        (Some(cert), Some(key)) => {
            let settings =
                TlsSettings { cert_path: cert.to_path_buf(), key_path: key.to_path_buf() };
            Ok(Some(load_tls_acceptor(&settings)?))
        },
        (None, None) => Ok(None),
        _ => Err(ServerError::Config(
            "TLS needs both a certificate and a key file".to_owned(),
        )),
    }
}
