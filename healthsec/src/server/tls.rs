use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{SecurityError, SecurityResult};

/// Build a rustls server config from a PEM certificate chain and key.
pub fn load_rustls_config(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> SecurityResult<ServerConfig> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let mut cert_reader = open(cert_path)?;
    let mut key_reader = open(key_path)?;

    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SecurityError::Config(format!("failed to parse certificate chain: {}", e)))?;
    if cert_chain.is_empty() {
        return Err(SecurityError::Config(format!("no certificates in {}", cert_path.display())));
    }

    let key: PrivateKeyDer<'static> = private_key(&mut key_reader)
        .map_err(|e| SecurityError::Config(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| SecurityError::Config(format!("no private key in {}", key_path.display())))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| SecurityError::Config(format!("bad certificate/key: {}", e)))?;

    tracing::info!("TLS configured from {}", cert_path.display());
    Ok(config)
}

fn open(path: &Path) -> SecurityResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| SecurityError::Config(format!("cannot open {}: {}", path.display(), e)))
}
