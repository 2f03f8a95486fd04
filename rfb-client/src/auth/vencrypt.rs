//! VeNCrypt (security type 19): a sub-negotiation that wraps the rest of
//! the handshake in TLS before running an inner authentication scheme.
//!
//! VeNCrypt has its own two-byte version handshake (client and server agree
//! on 0.2, the only version this client speaks), followed by a list of
//! "subtypes" the server offers. Each subtype names both a transport
//! decision (plain, anonymous TLS, or X.509 TLS) and an inner
//! authentication scheme (none, classic VNC auth, plaintext
//! username/password, or SASL). Once a TLS subtype is chosen, the TCP connection is
//! re-keyed in place — nothing else may be in flight on the wire at that
//! point, which is why this function takes ownership of the streams rather
//! than borrowing them: the plain-socket streams are unwound back into a
//! raw [`Transport`] and rebuilt as TLS streams afterward.

use crate::config::Config;
use crate::errors::RfbClientError;
use crate::transport::{Transport, TlsConfig, TransportRead, TransportWrite};
use rfb_protocol::io::{RfbInStream, RfbOutStream};

const PLAIN: u32 = 256;
const TLS_NONE: u32 = 257;
const TLS_VNC: u32 = 258;
const TLS_PLAIN: u32 = 259;
const X509_NONE: u32 = 260;
const X509_VNC: u32 = 261;
const X509_PLAIN: u32 = 262;
const X509_SASL: u32 = 263;
const TLS_SASL: u32 = 264;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subtype {
    Plain,
    TlsNone,
    TlsVnc,
    TlsPlain,
    X509None,
    X509Vnc,
    X509Plain,
    X509Sasl,
    TlsSasl,
}

impl Subtype {
    fn from_wire(value: u32) -> Option<Self> {
        match value {
            PLAIN => Some(Subtype::Plain),
            TLS_NONE => Some(Subtype::TlsNone),
            TLS_VNC => Some(Subtype::TlsVnc),
            TLS_PLAIN => Some(Subtype::TlsPlain),
            X509_NONE => Some(Subtype::X509None),
            X509_VNC => Some(Subtype::X509Vnc),
            X509_PLAIN => Some(Subtype::X509Plain),
            X509_SASL => Some(Subtype::X509Sasl),
            TLS_SASL => Some(Subtype::TlsSasl),
            _ => None,
        }
    }

    fn to_wire(self) -> u32 {
        match self {
            Subtype::Plain => PLAIN,
            Subtype::TlsNone => TLS_NONE,
            Subtype::TlsVnc => TLS_VNC,
            Subtype::TlsPlain => TLS_PLAIN,
            Subtype::X509None => X509_NONE,
            Subtype::X509Vnc => X509_VNC,
            Subtype::X509Plain => X509_PLAIN,
            Subtype::X509Sasl => X509_SASL,
            Subtype::TlsSasl => TLS_SASL,
        }
    }

    fn needs_tls(self) -> bool {
        !matches!(self, Subtype::Plain)
    }
}

/// Runs the VeNCrypt sub-negotiation to completion, possibly upgrading the
/// transport to TLS, and returns the streams to continue the handshake
/// with (backed by the new transport if one was negotiated).
pub async fn authenticate(
    mut instream: RfbInStream<TransportRead>,
    mut outstream: RfbOutStream<TransportWrite>,
    config: &Config,
) -> Result<(RfbInStream<TransportRead>, RfbOutStream<TransportWrite>), RfbClientError> {
    negotiate_version(&mut instream, &mut outstream).await?;

    let count = instream.read_u8().await.map_err(RfbClientError::Transport)?;
    if count == 0 {
        return Err(RfbClientError::Security(
            "VeNCrypt server offered no subtypes".to_string(),
        ));
    }
    let mut offered = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = instream.read_u32().await.map_err(RfbClientError::Transport)?;
        if let Some(subtype) = Subtype::from_wire(raw) {
            offered.push(subtype);
        }
    }

    let chosen = offered
        .iter()
        .copied()
        .find(|s| supported(*s, config))
        .ok_or_else(|| {
            RfbClientError::Security("no supported VeNCrypt subtype offered by server".to_string())
        })?;

    outstream.write_u32(chosen.to_wire());
    outstream.flush().await.map_err(RfbClientError::Transport)?;

    let (mut instream, mut outstream) = if chosen.needs_tls() {
        upgrade_to_tls(instream, outstream, config).await?
    } else {
        (instream, outstream)
    };

    run_inner_auth(chosen, &mut instream, &mut outstream, config).await?;
    Ok((instream, outstream))
}

/// Performs VeNCrypt's own version handshake: server sends major.minor as
/// two bytes, client echoes back the highest mutually supported version
/// (0.2, the only one implemented here) and the server acks with a single
/// status byte (0 = accepted).
async fn negotiate_version(
    instream: &mut RfbInStream<TransportRead>,
    outstream: &mut RfbOutStream<TransportWrite>,
) -> Result<(), RfbClientError> {
    let major = instream.read_u8().await.map_err(RfbClientError::Transport)?;
    let _minor = instream.read_u8().await.map_err(RfbClientError::Transport)?;
    if major != 0 {
        return Err(RfbClientError::Security(format!(
            "unsupported VeNCrypt major version {major}"
        )));
    }

    outstream.write_u8(0);
    outstream.write_u8(2);
    outstream.flush().await.map_err(RfbClientError::Transport)?;

    let status = instream.read_u8().await.map_err(RfbClientError::Transport)?;
    if status != 0 {
        return Err(RfbClientError::Security(
            "server rejected VeNCrypt version 0.2".to_string(),
        ));
    }
    Ok(())
}

fn supported(subtype: Subtype, config: &Config) -> bool {
    match subtype {
        Subtype::Plain | Subtype::TlsPlain | Subtype::X509Plain => {
            config.connection.username.is_some() && config.connection.password.is_some()
        }
        Subtype::TlsNone | Subtype::X509None => true,
        Subtype::TlsVnc | Subtype::X509Vnc => config.connection.password.is_some(),
        Subtype::TlsSasl | Subtype::X509Sasl => {
            config.connection.username.is_some() && config.connection.password.is_some()
        }
    }
}

/// Rebuilds the plain-socket streams back into a [`Transport`], performs
/// the TLS handshake, and returns streams backed by the upgraded transport.
///
/// Relies on VeNCrypt's framing guarantee that nothing further arrives on
/// the plain socket once the client has sent its chosen subtype, so no
/// already-buffered bytes are lost when the streams are torn down.
async fn upgrade_to_tls(
    instream: RfbInStream<TransportRead>,
    outstream: RfbOutStream<TransportWrite>,
    config: &Config,
) -> Result<(RfbInStream<TransportRead>, RfbOutStream<TransportWrite>), RfbClientError> {
    if instream.available() != 0 {
        return Err(RfbClientError::Protocol(
            "unexpected buffered data before VeNCrypt TLS upgrade".to_string(),
        ));
    }

    let read_half = instream.into_inner();
    let write_half = outstream.into_inner();
    let transport = match (read_half, write_half) {
        (TransportRead::Plain(r), TransportWrite::Plain(w)) => Transport::Plain(r.unsplit(w)),
        _ => {
            return Err(RfbClientError::TlsError(
                "VeNCrypt TLS upgrade attempted on an already-TLS transport".to_string(),
            ))
        }
    };

    let mut tls_cfg = TlsConfig::new();
    if let Some(tls) = config.security.tls.as_ref() {
        if let Some(server_name) = tls.server_name.as_ref() {
            tls_cfg = tls_cfg.with_server_name(server_name.clone());
        }
        if let Some(ca_file) = tls.ca_file.as_ref() {
            tls_cfg = tls_cfg.with_ca_file(ca_file.clone());
        }
        if tls.danger_accept_invalid_certs {
            tls_cfg = tls_cfg.disable_verification();
        }
    }

    let upgraded = transport
        .upgrade_tls(&config.connection.host, tls_cfg)
        .await?;
    let (new_read, new_write) = upgraded.split();

    Ok((RfbInStream::new(new_read), RfbOutStream::new(new_write)))
}

async fn run_inner_auth(
    subtype: Subtype,
    instream: &mut RfbInStream<TransportRead>,
    outstream: &mut RfbOutStream<TransportWrite>,
    config: &Config,
) -> Result<(), RfbClientError> {
    match subtype {
        Subtype::Plain | Subtype::TlsPlain | Subtype::X509Plain => {
            plain_auth(instream, outstream, config).await
        }
        Subtype::TlsNone | Subtype::X509None => Ok(()),
        Subtype::TlsVnc | Subtype::X509Vnc => {
            super::vnc_des::authenticate(instream, outstream, config).await
        }
        Subtype::TlsSasl | Subtype::X509Sasl => {
            super::sasl::authenticate(instream, outstream, config).await
        }
    }
}

/// VeNCrypt's "Plain" inner scheme: username and password sent as
/// length-prefixed UTF-8 over the (by now TLS-protected, for the TLS*
/// subtypes) channel.
async fn plain_auth(
    _instream: &mut RfbInStream<TransportRead>,
    outstream: &mut RfbOutStream<TransportWrite>,
    config: &Config,
) -> Result<(), RfbClientError> {
    let username = config
        .connection
        .username
        .as_deref()
        .ok_or_else(|| RfbClientError::Config("VeNCrypt Plain auth requires a username".into()))?;
    let password = config
        .connection
        .password
        .as_deref()
        .ok_or_else(|| RfbClientError::Config("VeNCrypt Plain auth requires a password".into()))?;

    outstream.write_u32(username.len() as u32);
    outstream.write_u32(password.len() as u32);
    outstream.write_bytes(username.as_bytes());
    outstream.write_bytes(password.as_bytes());
    outstream.flush().await.map_err(RfbClientError::Transport)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_nine_subtypes_round_trip() {
        for s in [
            Subtype::Plain,
            Subtype::TlsNone,
            Subtype::TlsVnc,
            Subtype::TlsPlain,
            Subtype::X509None,
            Subtype::X509Vnc,
            Subtype::X509Plain,
            Subtype::X509Sasl,
            Subtype::TlsSasl,
        ] {
            assert_eq!(Subtype::from_wire(s.to_wire()), Some(s));
        }
    }

    #[test]
    fn test_only_plain_skips_tls() {
        assert!(!Subtype::Plain.needs_tls());
        for s in [
            Subtype::TlsNone,
            Subtype::TlsVnc,
            Subtype::TlsPlain,
            Subtype::X509None,
            Subtype::X509Vnc,
            Subtype::X509Plain,
            Subtype::X509Sasl,
            Subtype::TlsSasl,
        ] {
            assert!(s.needs_tls());
        }
    }
}
