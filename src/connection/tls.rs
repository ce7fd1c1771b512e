//! TLS configuration for outgoing connections.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::TlsOptions;
use crate::error::{ConnectionError, ConnectionErrorKind, TransportError, TransportResult};

/// Build a TLS connector trusting the configured CA bundle, or the webpki
/// roots when none is set.
pub fn build_tls_connector(options: &TlsOptions) -> TransportResult<TlsConnector> {
    let mut roots = RootCertStore::empty();
    match &options.ca_cert_path {
        Some(path) => {
            for cert in load_certs(path)? {
                roots
                    .add(cert)
                    .map_err(|e| TransportError::Configuration(format!("Failed to add CA {:?}: {}", path, e)))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Configuration(format!("Invalid TLS configuration: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> TransportResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| TransportError::Configuration(format!("Cannot open CA file {:?}: {}", path, e)))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .filter_map(|r| r.ok())
        .collect();
    if certs.is_empty() {
        return Err(TransportError::Configuration(format!(
            "No certificates found in CA file {:?}",
            path
        )));
    }
    Ok(certs)
}

/// Run the client handshake over `stream`.
pub async fn handshake<S>(connector: &TlsConnector, host: &str, stream: S) -> Result<TlsStream<S>, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = ServerName::try_from(host.trim_start_matches('[').trim_end_matches(']').to_string())
        .map_err(|e| ConnectionError::new(ConnectionErrorKind::Tls, format!("invalid server name '{}': {}", host, e)))?;

    connector
        .connect(name, stream)
        .await
        .map_err(|e| ConnectionError::new(ConnectionErrorKind::Tls, e.to_string()))
}
