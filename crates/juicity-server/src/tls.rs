//! TLS setup for the QUIC listener

use std::path::Path;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};

use crate::error::ConfigError;

/// Load certificate chain from file
pub fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let pem = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let chain = certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Certificate(format!("parse {:?}: {}", path, e)))?;
    if chain.is_empty() {
        return Err(ConfigError::Certificate(format!(
            "no certificates found in {:?}",
            path
        )));
    }
    Ok(chain)
}

/// Load private key from file. PKCS#8, PKCS#1 and SEC1 keys are accepted.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let pem = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    private_key(&mut pem.as_slice())
        .map_err(|e| ConfigError::Certificate(format!("parse {:?}: {}", path, e)))?
        .ok_or_else(|| ConfigError::Certificate(format!("no private key found in {:?}", path)))
}

/// TLS 1.3 only, no client certificates, advertising `alpn`.
pub fn server_crypto(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    alpn: &[&[u8]],
) -> Result<Arc<QuicServerConfig>, ConfigError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| ConfigError::Certificate(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;
    tls.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

    let crypto = QuicServerConfig::try_from(tls)
        .map_err(|e| ConfigError::Certificate(format!("QUIC server config: {}", e)))?;
    Ok(Arc::new(crypto))
}
