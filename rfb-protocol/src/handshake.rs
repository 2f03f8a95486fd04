//! RFB protocol handshake implementation.
//!
//! This module implements the three-phase RFB (Remote Framebuffer) protocol handshake
//! according to the RFB Protocol 3.8 specification:
//!
//! 1. **Protocol Version Negotiation** - Client and server agree on RFB version (3.3 or 3.8)
//! 2. **Security Handshake** - Negotiate and execute security/authentication type
//! 3. **Initialization** - Exchange ClientInit/ServerInit messages
//!
//! # Supported Protocol Versions
//!
//! - **RFB 3.8** - Full support (preferred)
//! - **RFB 3.3** - Basic compatibility support
//!
//! The client always advertises RFB 3.8 but will negotiate down to 3.3 if the server
//! only supports 3.3-3.6. This maintains compatibility while preferring modern features.
//!
//! # Security Types
//!
//! **Current Implementation**: Only `SecurityType::None` (value 1) is supported.
//! This is suitable for connections over SSH tunnels or trusted networks.
//!
//! **Future**: VNC Authentication (type 2), VeNCrypt/TLS, and other security types
//! may be added in later phases.
//!
//! # Wire Format
//!
//! All multi-byte integers use **big-endian** (network byte order) per RFB specification.
//!
//! # Error Handling
//!
//! This module follows the project's **fail-fast** policy:
//! - Invalid protocol versions are rejected immediately
//! - Unsupported security types cause connection failure
//! - Malformed messages result in clear error messages
//! - No defensive fallbacks or silent degradation
//!
//! # References
//!
//! - [RFB Protocol 3.8 Specification](https://github.com/rfbproto/rfbproto/blob/master/rfbproto.rst)
//! - TigerVNC CConnection.cxx implementation (C++ reference)

use crate::io::{RfbInStream, RfbOutStream};
use crate::messages;
use tokio::io::{AsyncRead, AsyncWrite};

/// Security type constant for no authentication (connection over trusted network).
const SECURITY_TYPE_NONE: u8 = 1;

/// Negotiated RFB protocol version after handshake.
///
/// The client never claims a version higher than it actually speaks back to
/// the server: the reply banner is `min((server.major, server.minor), (3,8))`
/// clamped down to the nearest of the three versions this client
/// understands. A server offering anything in 3.3-3.6 gets `003.003` back
/// (single-security-type auth framing); exactly 3.7 gets `003.007` (list-based
/// security types, no failure-reason text); 3.8 and anything newer gets
/// `003.008` (list-based security types, with failure-reason text).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedVersion {
    /// RFB 3.3 - Original protocol with limited security options
    V3_3,
    /// RFB 3.7 - Security-type list, no failure-reason text
    V3_7,
    /// RFB 3.8 - Modern protocol with improved security negotiation
    V3_8,
}

impl NegotiatedVersion {
    /// The `(major, minor)` pair written back to the server for this version.
    fn wire_pair(self) -> (u32, u32) {
        match self {
            NegotiatedVersion::V3_3 => (3, 3),
            NegotiatedVersion::V3_7 => (3, 7),
            NegotiatedVersion::V3_8 => (3, 8),
        }
    }
}

/// Negotiate RFB protocol version with the server.
pub async fn negotiate_version<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
) -> std::io::Result<NegotiatedVersion> {
    // Read server version string (exactly 12 bytes)
    let mut version_buf = [0u8; 12];
    instream.read_bytes(&mut version_buf).await?;

    // Validate format: "RFB xxx.yyy\n"
    if &version_buf[0..4] != b"RFB " || version_buf[11] != b'\n' || version_buf[7] != b'.' {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "invalid RFB version string: expected 'RFB xxx.yyy\\n', got {:?}",
                String::from_utf8_lossy(&version_buf)
            ),
        ));
    }

    // Parse major and minor version numbers
    let major_str = std::str::from_utf8(&version_buf[4..7]).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid major version digits: {}", e),
        )
    })?;

    let minor_str = std::str::from_utf8(&version_buf[8..11]).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid minor version digits: {}", e),
        )
    })?;

    let major: u32 = major_str.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid major version number: {}", e),
        )
    })?;

    let minor: u32 = minor_str.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid minor version number: {}", e),
        )
    })?;

    // Validate server version is supported (>= 3.3)
    if major < 3 || (major == 3 && minor < 3) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!(
                "unsupported RFB version {}.{} (< 003.003)",
                major, minor
            ),
        ));
    }

    // Clamp to the nearest of the three versions this client understands:
    // min((major, minor), (3, 8)), rounded down to {(3,3), (3,7), (3,8)}.
    let negotiated = if major > 3 || minor >= 8 {
        NegotiatedVersion::V3_8
    } else if minor == 7 {
        NegotiatedVersion::V3_7
    } else {
        NegotiatedVersion::V3_3
    };

    // Echo back the clamped version, not whatever the server claimed: a
    // server that speaks 3.3 must see "003.003" or it will frame the rest
    // of the handshake (single-u32 security type, no failure-reason text)
    // differently than a client that actually replied 3.8.
    let (reply_major, reply_minor) = negotiated.wire_pair();
    let reply = format!("RFB {reply_major:03}.{reply_minor:03}\n");
    outstream.write_bytes(reply.as_bytes());
    outstream.flush().await?;

    Ok(negotiated)
}

/// Negotiate security type with the server.
pub async fn negotiate_security<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    negotiated: NegotiatedVersion,
) -> std::io::Result<()> {
    match negotiated {
        NegotiatedVersion::V3_8 => negotiate_security_list(instream, outstream, true).await,
        NegotiatedVersion::V3_7 => negotiate_security_list(instream, outstream, false).await,
        NegotiatedVersion::V3_3 => negotiate_security_3_3(instream).await,
    }
}

/// Security-type-list negotiation shared by 3.7 and 3.8: both read a
/// client-chosen list of u8 security types rather than a single
/// server-chosen u32. They differ only in whether a failure carries a
/// UTF-8 reason string afterward — that text was added in 3.8, so a 3.7
/// server's rejection is reported generically instead.
async fn negotiate_security_list<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    has_failure_reason: bool,
) -> std::io::Result<()> {
    let count = instream.read_u8().await?;

    if count == 0 {
        if has_failure_reason {
            let reason_len = instream.read_u32().await? as usize;
            let mut reason_buf = vec![0u8; reason_len];
            instream.read_bytes(&mut reason_buf).await?;
            let reason = String::from_utf8_lossy(&reason_buf);
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("server offered no security types: {}", reason),
            ));
        }
        return Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "server offered no security types",
        ));
    }

    let mut types = vec![0u8; count as usize];
    instream.read_bytes(&mut types).await?;

    if !types.contains(&SECURITY_TYPE_NONE) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!(
                "no supported security types offered by server (got {:?}, only None=1 supported)",
                types
            ),
        ));
    }

    outstream.write_u8(SECURITY_TYPE_NONE);
    outstream.flush().await?;

    let result = instream.read_u32().await?;
    match result {
        0 => Ok(()),
        1 if has_failure_reason => {
            let reason_len = instream.read_u32().await? as usize;
            let mut reason_buf = vec![0u8; reason_len];
            instream.read_bytes(&mut reason_buf).await?;
            let reason = String::from_utf8_lossy(&reason_buf);
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("security handshake failed: {}", reason),
            ))
        }
        1 => Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "security handshake failed",
        )),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid security result value: {} (expected 0 or 1)", other),
        )),
    }
}

async fn negotiate_security_3_3<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> std::io::Result<()> {
    let security_type = instream.read_u32().await?;

    match security_type {
        0 => {
            let reason_len = instream.read_u32().await? as usize;
            let mut reason_buf = vec![0u8; reason_len];
            instream.read_bytes(&mut reason_buf).await?;
            let reason = String::from_utf8_lossy(&reason_buf);
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("server rejected connection: {}", reason),
            ))
        }
        1 => Ok(()),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!(
                "unsupported security type for RFB 3.3: {} (only None=1 supported)",
                other
            ),
        )),
    }
}

/// Send ClientInit message to the server.
pub async fn send_client_init<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    shared: bool,
) -> std::io::Result<()> {
    let client_init = messages::ClientInit { shared };
    client_init.write_to(outstream);
    outstream.flush().await?;
    Ok(())
}

/// Receive ServerInit message from the server.
pub async fn recv_server_init<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> std::io::Result<messages::ServerInit> {
    messages::ServerInit::read_from(instream).await
}
