//! TLS configuration and certificate loading.

use std::io;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;
use crate::error::BootstrapError;

async fn read(path: &Path) -> io::Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
    })
}

/// Every certificate in a PEM bundle, as DER, in file order.
pub fn parse_certificates(pem: &[u8]) -> io::Result<Vec<Vec<u8>>> {
    let mut reader = pem;
    rustls_pemfile::certs(&mut reader)
        .map(|cert| cert.map(|der| der.as_ref().to_vec()))
        .collect()
}

fn parse_private_key(pem: &[u8]) -> io::Result<Vec<u8>> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)?
        .map(|key| key.secret_der().to_vec())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))
}

/// Served chain: the certificate file followed by each CA bundle.
pub async fn load_chain(config: &TlsConfig) -> io::Result<Vec<Vec<u8>>> {
    let mut chain = parse_certificates(&read(&config.cert_path).await?)?;
    if chain.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no certificate in {}", config.cert_path.display()),
        ));
    }
    for ca in &config.ca {
        let certs = parse_certificates(&read(ca).await?)?;
        tracing::debug!(file = %ca.display(), certificates = certs.len(), "CA bundle loaded");
        chain.extend(certs);
    }
    Ok(chain)
}

/// Load TLS configuration from certificate, key and CA files.
pub async fn load_tls_config(config: &TlsConfig) -> Result<RustlsConfig, BootstrapError> {
    let chain = load_chain(config).await.map_err(BootstrapError::Tls)?;
    let key = parse_private_key(&read(&config.key_path).await.map_err(BootstrapError::Tls)?)
        .map_err(BootstrapError::Tls)?;
    tracing::info!(certificates = chain.len(), "TLS certificate chain loaded");
    RustlsConfig::from_der(chain, key)
        .await
        .map_err(BootstrapError::Tls)
}
