//! TLS session setup for the `Transport` layer.

use crate::errors::RfbClientError;
use rfb_protocol::socket::TcpSocket;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, SignatureScheme};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// TLS session parameters for a VNC connection.
///
/// Built with [`TlsConfig::new`] and the builder-style setters, mirroring the
/// shape of [`crate::config::TlsConfig`] that the host-facing configuration
/// exposes.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    server_name: Option<String>,
    ca_file: Option<PathBuf>,
    accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Start from system root certificates, full verification enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the name presented in the TLS `ServerName` extension (SNI)
    /// and used for hostname verification. Defaults to the connection host.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Trust an additional CA certificate bundle (PEM) instead of, or in
    /// addition to, the system trust store.
    #[must_use]
    pub fn with_ca_file(mut self, path: PathBuf) -> Self {
        self.ca_file = Some(path);
        self
    }

    /// Disable certificate verification entirely.
    ///
    /// Only ever appropriate for self-signed lab servers; never the default.
    #[must_use]
    pub fn disable_verification(mut self) -> Self {
        self.accept_invalid_certs = true;
        self
    }
}

pub(super) async fn handshake(
    socket: TcpSocket,
    host: &str,
    cfg: TlsConfig,
) -> Result<TlsStream<TcpSocket>, RfbClientError> {
    let client_config = build_client_config(&cfg)?;
    let connector = TlsConnector::from(Arc::new(client_config));

    let server_name = cfg.server_name.as_deref().unwrap_or(host).to_string();
    let name = ServerName::try_from(server_name)
        .map_err(|e| RfbClientError::TlsError(format!("invalid server name: {e}")))?;

    connector
        .connect(name, socket)
        .await
        .map_err(|e| RfbClientError::TlsError(format!("TLS handshake failed: {e}")))
}

fn build_client_config(cfg: &TlsConfig) -> Result<ClientConfig, RfbClientError> {
    let builder = ClientConfig::builder();

    if cfg.accept_invalid_certs {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerification))
            .with_no_client_auth());
    }

    let mut roots = rustls::RootCertStore::empty();
    if let Some(ca_file) = &cfg.ca_file {
        let pem = std::fs::read(ca_file)
            .map_err(|e| RfbClientError::TlsError(format!("failed to read CA file: {e}")))?;
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RfbClientError::TlsError(format!("failed to parse CA file: {e}")))?;
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| RfbClientError::TlsError(format!("invalid CA certificate: {e}")))?;
        }
    } else {
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            let _ = roots.add(cert);
        }
    }

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

/// Accepts any server certificate. Used only when the host explicitly opts
/// into `danger_accept_invalid_certs`.
#[derive(Debug)]
struct NoCertVerification;

impl ServerCertVerifier for NoCertVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        // Accept broadly; certificate validity is not being checked at all.
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

