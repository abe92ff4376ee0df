//! TLS acceptor construction for HTTPS stub servers.

use crate::config::TlsConfig;
use crate::error::TransportError;
use rustls::pki_types::CertificateDer;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Create a TLS acceptor from the PEM certificate chain and key in `tls`.
///
/// Any failure here means the server cannot start at all, so it surfaces as
/// [`TransportError::Start`].
pub fn create_tls_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, TransportError> {
    let cert_path = &tls.cert_path;
    let key_path = &tls.key_path;

    let cert_file = std::fs::File::open(cert_path).map_err(|e| {
        TransportError::Start(format!("Failed to open certificate file '{cert_path}': {e}"))
    })?;
    let mut cert_reader = std::io::BufReader::new(cert_file);
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| TransportError::Start(format!("Failed to parse certificate file: {e}")))?;

    if certs.is_empty() {
        return Err(TransportError::Start(format!(
            "No certificates found in certificate file: {cert_path}"
        )));
    }

    let key_file = std::fs::File::open(key_path).map_err(|e| {
        TransportError::Start(format!("Failed to open private key file '{key_path}': {e}"))
    })?;
    let mut key_reader = std::io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| TransportError::Start(format!("Failed to parse private key file: {e}")))?
        .ok_or_else(|| TransportError::Start(format!("No private key found in key file: {key_path}")))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Start(format!("Failed to build TLS configuration: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Start(format!("Failed to build TLS configuration: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_certificate_is_a_start_failure() {
        let tls = TlsConfig {
            cert_path: "/nonexistent/cert.pem".to_string(),
            key_path: "/nonexistent/key.pem".to_string(),
        };
        let Err(err) = create_tls_acceptor(&tls) else {
            panic!("expected the TLS setup to fail");
        };
        assert!(matches!(err, TransportError::Start(ref m) if m.contains("certificate file")));
    }

    #[test]
    fn test_empty_certificate_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        std::fs::write(&cert, "").unwrap();
        let tls = TlsConfig {
            cert_path: cert.to_string_lossy().to_string(),
            key_path: dir.path().join("key.pem").to_string_lossy().to_string(),
        };
        let Err(err) = create_tls_acceptor(&tls) else {
            panic!("expected the TLS setup to fail");
        };
        assert!(matches!(err, TransportError::Start(ref m) if m.contains("No certificates")));
    }
}
