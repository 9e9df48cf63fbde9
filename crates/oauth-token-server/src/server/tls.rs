//! TLS acceptor construction from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring::default_provider;
use rustls::pki_types::pem::{self, PemObject};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::error::ServerError;

/// Build an acceptor from the configured certificate chain and key.
///
/// Both files must be configured; either missing is a startup error.
pub fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let certificate_file = config
        .certificate_file
        .as_deref()
        .ok_or(ServerError::MissingTlsMaterial { missing: "certificate" })?;
    let key_file = config
        .key_file
        .as_deref()
        .ok_or(ServerError::MissingTlsMaterial { missing: "private key" })?;

    let certs = load_certificates(certificate_file)?;
    let key = load_private_key(key_file)?;

    let server_config = rustls::ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    tracing::info!(certificate = %certificate_file.display(), "Loaded TLS certificate");
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let reader = BufReader::new(File::open(path)?);
    let certs = CertificateDer::pem_reader_iter(reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ServerError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let reader = BufReader::new(File::open(path)?);
    match PrivateKeyDer::from_pem_reader(reader) {
        Ok(key) => Ok(key),
        Err(pem::Error::NoItemsFound) => {
            Err(ServerError::NoPrivateKey(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
