//! SASL authentication (security type 20), as used by oVirt/RHEV-style VNC
//! proxies.
//!
//! The server advertises a space-separated mechanism list; the client picks
//! one and runs SASL's generic step loop (client sends data, server replies
//! with a completion flag and its own data) until both sides report
//! completion. This client only implements the `PLAIN` mechanism — the one
//! mechanism expressible without linking a full SASL library — so any
//! negotiation that requires `DIGEST-MD5`, `GSSAPI`, `SCRAM-*` or a
//! security layer (SSF > 0) fails fast with [`RfbClientError::Security`]
//! rather than silently downgrading.

use crate::config::Config;
use crate::errors::RfbClientError;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

const MECHANISM: &str = "PLAIN";

pub async fn authenticate<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    config: &Config,
) -> Result<(), RfbClientError> {
    let username = config
        .connection
        .username
        .as_deref()
        .ok_or_else(|| RfbClientError::Config("SASL authentication requires a username".into()))?;
    let password = config
        .connection
        .password
        .as_deref()
        .ok_or_else(|| RfbClientError::Config("SASL authentication requires a password".into()))?;

    let mechlist = read_mechlist(instream).await?;
    let mechanisms: Vec<&str> = mechlist.split_whitespace().collect();
    if !mechanisms.iter().any(|m| m.eq_ignore_ascii_case(MECHANISM)) {
        return Err(RfbClientError::Security(format!(
            "server does not offer a supported SASL mechanism (offered: {mechanisms:?}, only PLAIN is implemented)"
        )));
    }

    outstream.write_u32(MECHANISM.len() as u32);
    outstream.write_bytes(MECHANISM.as_bytes());
    outstream.flush().await.map_err(RfbClientError::Transport)?;

    let initial = plain_response(username, password);
    outstream.write_u32(initial.len() as u32);
    outstream.write_bytes(&initial);
    outstream.flush().await.map_err(RfbClientError::Transport)?;

    let complete = instream.read_u8().await.map_err(RfbClientError::Transport)?;
    let server_data_len = instream.read_u32().await.map_err(RfbClientError::Transport)? as usize;
    let mut server_data = vec![0u8; server_data_len];
    instream
        .read_bytes(&mut server_data)
        .await
        .map_err(RfbClientError::Transport)?;

    if complete == 0 {
        return Err(RfbClientError::Security(
            "SASL PLAIN requires additional steps this client cannot perform".to_string(),
        ));
    }

    let ssf = instream.read_u32().await.map_err(RfbClientError::Transport)?;
    if ssf != 0 {
        return Err(RfbClientError::Security(format!(
            "server requires a SASL security layer (SSF {ssf}), which this client cannot negotiate"
        )));
    }

    Ok(())
}

async fn read_mechlist<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> Result<String, RfbClientError> {
    let len = instream.read_u32().await.map_err(RfbClientError::Transport)? as usize;
    let mut buf = vec![0u8; len];
    instream
        .read_bytes(&mut buf)
        .await
        .map_err(RfbClientError::Transport)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Builds the SASL PLAIN initial response: `authzid\0authcid\0passwd`, with
/// an empty authorization identity.
fn plain_response(username: &str, password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(username.len() + password.len() + 2);
    out.push(0);
    out.extend_from_slice(username.as_bytes());
    out.push(0);
    out.extend_from_slice(password.as_bytes());
    out
}
