//! Security type negotiation and authentication.
//!
//! Extends the bare RFB version handshake with the full security-type
//! negotiation: the server offers a list of security types, the client picks
//! one it supports, and the two sides run that type's authentication
//! exchange before the client proceeds to `ClientInit`.
//!
//! Credentials (password, username, client certificates) are supplied
//! up-front via [`crate::config::Config`] — this module never blocks waiting
//! for the host to supply one interactively. A security type that needs a
//! credential the configuration doesn't have fails fast with
//! [`RfbClientError::Config`].

mod ard;
mod ms_logon;
mod none;
mod sasl;
mod vencrypt;
mod vnc_des;

use crate::config::Config;
use crate::errors::RfbClientError;
use crate::transport::{TransportRead, TransportWrite};
use rfb_protocol::handshake::NegotiatedVersion;
use rfb_protocol::io::{RfbInStream, RfbOutStream};

/// RFB security type identifiers (RFB 3.8 §7.2.1, plus VeNCrypt/TLS/SASL
/// extensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityType {
    None,
    VncAuth,
    Tight,
    VeNCrypt,
    MsLogon,
    Ard,
    Sasl,
    Unknown(u8),
}

impl SecurityType {
    const NONE: u8 = 1;
    const VNC_AUTH: u8 = 2;
    const TIGHT: u8 = 16;
    const VENCRYPT: u8 = 19;
    const SASL: u8 = 20;
    const MS_LOGON: u8 = 0xFD; // 253, used by UltraVNC MS-Logon II
    const ARD: u8 = 30;

    fn from_wire(value: u8) -> Self {
        match value {
            Self::NONE => SecurityType::None,
            Self::VNC_AUTH => SecurityType::VncAuth,
            Self::TIGHT => SecurityType::Tight,
            Self::VENCRYPT => SecurityType::VeNCrypt,
            Self::SASL => SecurityType::Sasl,
            Self::MS_LOGON => SecurityType::MsLogon,
            Self::ARD => SecurityType::Ard,
            other => SecurityType::Unknown(other),
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            SecurityType::None => Self::NONE,
            SecurityType::VncAuth => Self::VNC_AUTH,
            SecurityType::Tight => Self::TIGHT,
            SecurityType::VeNCrypt => Self::VENCRYPT,
            SecurityType::Sasl => Self::SASL,
            SecurityType::MsLogon => Self::MS_LOGON,
            SecurityType::Ard => Self::ARD,
            SecurityType::Unknown(v) => v,
        }
    }

    /// Whether this client implementation can actually carry out this
    /// security type's authentication exchange.
    fn supported(self) -> bool {
        matches!(
            self,
            SecurityType::None
                | SecurityType::VncAuth
                | SecurityType::MsLogon
                | SecurityType::Ard
                | SecurityType::VeNCrypt
                | SecurityType::Sasl
        )
    }

    /// Client preference rank, lowest wins, among whatever subset the server
    /// offers: VeNCrypt, SASL, MS-Logon, ARD, classic VNC auth, then None
    /// (spec.md §4.3's default ordering; there's no standalone "TLS" wire
    /// type in this enum since it's folded into VeNCrypt's subtypes here).
    fn preference_rank(self) -> u8 {
        match self {
            SecurityType::VeNCrypt => 0,
            SecurityType::Sasl => 1,
            SecurityType::MsLogon => 2,
            SecurityType::Ard => 3,
            SecurityType::VncAuth => 4,
            SecurityType::None => 5,
            SecurityType::Tight | SecurityType::Unknown(_) => u8::MAX,
        }
    }
}

/// Negotiates a security type and runs its authentication exchange.
///
/// Mirrors [`rfb_protocol::handshake::negotiate_security`]'s responsibilities
/// but dispatches into the full set of security types this crate
/// understands rather than accepting only `None`. Returns the streams to
/// continue the handshake with: ordinarily the same ones passed in, but
/// VeNCrypt may hand back streams backed by a freshly-negotiated TLS
/// transport.
pub async fn negotiate(
    instream: RfbInStream<TransportRead>,
    outstream: RfbOutStream<TransportWrite>,
    version: NegotiatedVersion,
    config: &Config,
) -> Result<(RfbInStream<TransportRead>, RfbOutStream<TransportWrite>), RfbClientError> {
    match version {
        NegotiatedVersion::V3_8 => negotiate_list(instream, outstream, config, true).await,
        NegotiatedVersion::V3_7 => negotiate_list(instream, outstream, config, false).await,
        NegotiatedVersion::V3_3 => negotiate_3_3(instream, outstream, config).await,
    }
}

/// Security-type-list negotiation shared by 3.7 and 3.8. Identical except
/// for whether a rejection carries a UTF-8 reason string: that framing was
/// added in 3.8, so a 3.7 server's `count == 0` or failed security result
/// is reported without trying to read text that was never sent.
async fn negotiate_list(
    mut instream: RfbInStream<TransportRead>,
    mut outstream: RfbOutStream<TransportWrite>,
    config: &Config,
    has_failure_reason: bool,
) -> Result<(RfbInStream<TransportRead>, RfbOutStream<TransportWrite>), RfbClientError> {
    let count = instream.read_u8().await.map_err(RfbClientError::Transport)?;
    if count == 0 {
        let reason = if has_failure_reason {
            read_reason(&mut instream).await?
        } else {
            "server offered no security types".to_string()
        };
        return Err(RfbClientError::AuthFailed(reason));
    }

    let mut raw_types = vec![0u8; count as usize];
    instream
        .read_bytes(&mut raw_types)
        .await
        .map_err(RfbClientError::Transport)?;
    let offered: Vec<SecurityType> = raw_types.iter().map(|&b| SecurityType::from_wire(b)).collect();

    let chosen = offered
        .iter()
        .copied()
        .filter(|t| t.supported())
        .min_by_key(|t| t.preference_rank())
        .ok_or_else(|| {
            tracing::warn!(target: "rfb_client::auth", offered = ?raw_types, "no supported security type offered by server");
            RfbClientError::AuthUnsupported(raw_types[0])
        })?;

    tracing::debug!(target: "rfb_client::auth", ?offered, ?chosen, "security type negotiated");

    outstream.write_u8(chosen.to_wire());
    outstream.flush().await.map_err(RfbClientError::Transport)?;

    let (mut instream, outstream) = run_security_type(instream, outstream, chosen, config).await?;

    let result = instream.read_u32().await.map_err(RfbClientError::Transport)?;
    match result {
        0 => Ok((instream, outstream)),
        1 => {
            let reason = if has_failure_reason {
                read_reason(&mut instream).await?
            } else {
                "security handshake failed".to_string()
            };
            Err(RfbClientError::AuthFailed(reason))
        }
        other => Err(RfbClientError::Protocol(format!(
            "invalid security result value: {other} (expected 0 or 1)"
        ))),
    }
}

async fn negotiate_3_3(
    mut instream: RfbInStream<TransportRead>,
    mut outstream: RfbOutStream<TransportWrite>,
    config: &Config,
) -> Result<(RfbInStream<TransportRead>, RfbOutStream<TransportWrite>), RfbClientError> {
    let security_type = instream.read_u32().await.map_err(RfbClientError::Transport)?;
    match security_type {
        0 => {
            let reason = read_reason(&mut instream).await?;
            Err(RfbClientError::AuthFailed(reason))
        }
        1 => Ok((instream, outstream)),
        2 => {
            let (mut instream, outstream) =
                run_security_type(instream, outstream, SecurityType::VncAuth, config).await?;
            let result = instream.read_u32().await.map_err(RfbClientError::Transport)?;
            match result {
                0 => Ok((instream, outstream)),
                _ => Err(RfbClientError::AuthFailed(
                    "VNC authentication rejected".to_string(),
                )),
            }
        }
        other => Err(RfbClientError::AuthUnsupported(other as u8)),
    }
}

async fn run_security_type(
    mut instream: RfbInStream<TransportRead>,
    mut outstream: RfbOutStream<TransportWrite>,
    security_type: SecurityType,
    config: &Config,
) -> Result<(RfbInStream<TransportRead>, RfbOutStream<TransportWrite>), RfbClientError> {
    match security_type {
        SecurityType::VeNCrypt => return vencrypt::authenticate(instream, outstream, config).await,
        SecurityType::None => none::authenticate()?,
        SecurityType::VncAuth => vnc_des::authenticate(&mut instream, &mut outstream, config).await?,
        SecurityType::MsLogon => ms_logon::authenticate(&mut instream, &mut outstream, config).await?,
        SecurityType::Ard => ard::authenticate(&mut instream, &mut outstream, config).await?,
        SecurityType::Sasl => sasl::authenticate(&mut instream, &mut outstream, config).await?,
        SecurityType::Tight | SecurityType::Unknown(_) => {
            return Err(RfbClientError::AuthUnsupported(security_type.to_wire()))
        }
    }
    Ok((instream, outstream))
}

async fn read_reason(
    instream: &mut RfbInStream<TransportRead>,
) -> Result<String, RfbClientError> {
    let len = instream.read_u32().await.map_err(RfbClientError::Transport)? as usize;
    let mut buf = vec![0u8; len];
    instream.read_bytes(&mut buf).await.map_err(RfbClientError::Transport)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
