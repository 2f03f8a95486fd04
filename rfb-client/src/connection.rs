//! High-level connection management and handshake.
//!
//! Establishes a transport (TCP or TLS), performs the RFB version and full
//! security-type handshakes (delegating to [`crate::auth`] for anything
//! beyond the bare version negotiation), sends ClientInit, and reads
//! ServerInit. Returns buffered RFB input/output streams ready for normal
//! operation.

use crate::{
    auth,
    config::{Config, SecurityConfig},
    errors::RfbClientError,
    protocol,
    transport::{self, Transport, TransportRead, TransportWrite},
};
use rfb_protocol::handshake::{negotiate_version, NegotiatedVersion};
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages::ServerInit;

/// Connected RFB session components.
pub struct Connection {
    /// Buffered input stream for reading RFB data.
    pub input: RfbInStream<TransportRead>,
    /// Buffered output stream for writing RFB data.
    pub output: RfbOutStream<TransportWrite>,
    /// Negotiated protocol version.
    pub version: NegotiatedVersion,
    /// Initial server parameters (framebuffer size, pixel format, name).
    pub server_init: ServerInit,
}

impl Connection {
    /// Returns the negotiated framebuffer width and height.
    #[must_use]
    pub fn size(&self) -> (u16, u16) {
        (
            self.server_init.framebuffer_width,
            self.server_init.framebuffer_height,
        )
    }
}

/// Establish a new RFB connection using the given configuration.
///
/// Steps:
/// 1) Create transport (TCP, or TLS if `security.tls.enabled`)
/// 2) Split into read/write halves and wrap with RfbInStream/RfbOutStream
/// 3) Negotiate version
/// 4) Negotiate a security type and run its authentication exchange
///    (VeNCrypt may swap the transport for a TLS one mid-negotiation)
/// 5) Send ClientInit (shared session)
/// 6) Read ServerInit (framebuffer params)
pub async fn establish(config: &Config) -> Result<Connection, RfbClientError> {
    let host = &config.connection.host;
    let port = config.connection.port;

    let transport = if use_tls(&config.security) {
        let tls_cfg = to_transport_tls_config(&config.security);
        Transport::connect_tls(host, port, tls_cfg).await?
    } else {
        Transport::connect_tcp(host, port).await?
    };

    let (mut input, mut output) = transport.split();

    let version = negotiate_version(&mut input, &mut output)
        .await
        .map_err(|e| RfbClientError::Handshake(format!("version negotiation failed: {e}")))?;

    let (mut input, mut output) = auth::negotiate(input, output, version, config).await?;

    protocol::write_client_init(&mut output, config.connection.shared).await?;

    let server_init = ServerInit::read_from(&mut input)
        .await
        .map_err(|e| RfbClientError::Protocol(format!("failed to read ServerInit: {e}")))?;

    Ok(Connection {
        input,
        output,
        version,
        server_init,
    })
}

fn use_tls(security: &SecurityConfig) -> bool {
    match &security.tls {
        Some(t) => t.enabled,
        None => false,
    }
}

fn to_transport_tls_config(security: &SecurityConfig) -> transport::TlsConfig {
    let mut cfg = transport::TlsConfig::new();
    if let Some(tls) = &security.tls {
        if let Some(server_name) = &tls.server_name {
            cfg = cfg.with_server_name(server_name.clone());
        }
        if let Some(ca_file) = &tls.ca_file {
            cfg = cfg.with_ca_file(ca_file.clone());
        }
        if tls.danger_accept_invalid_certs {
            cfg = cfg.disable_verification();
        }
    }
    cfg
}
