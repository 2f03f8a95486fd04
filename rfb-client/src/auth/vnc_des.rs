//! Classic VNC authentication (RFB §7.2.2): a DES challenge-response keyed
//! by the password, using the VNC-specific bit-reversed key schedule.
//!
//! The server sends a 16-byte random challenge. The client encrypts it with
//! DES in two independent 8-byte blocks (i.e. ECB, no chaining) using a key
//! derived from the password: each password byte has its bits reversed
//! before being used as DES key material. This quirk comes from the
//! original RFB implementation swapping bit order when loading the key and
//! is required for interoperability with every real VNC server.

use crate::config::Config;
use crate::errors::RfbClientError;
use cipher::{BlockEncrypt, KeyInit};
use des::Des;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

const CHALLENGE_LEN: usize = 16;

/// Reverses the bits within each byte of a DES key, matching the RFB spec's
/// password-to-key derivation.
fn reverse_bits(byte: u8) -> u8 {
    byte.reverse_bits()
}

/// Builds an 8-byte DES key from a password: truncated/zero-padded to 8
/// bytes, then each byte's bits reversed.
fn derive_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    for (i, b) in password.bytes().take(8).enumerate() {
        key[i] = b;
    }
    for b in key.iter_mut() {
        *b = reverse_bits(*b);
    }
    key
}

pub async fn authenticate<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    config: &Config,
) -> Result<(), RfbClientError> {
    let password = config.connection.password.as_deref().ok_or_else(|| {
        RfbClientError::Config("VNC authentication requires a password".to_string())
    })?;

    let mut challenge = [0u8; CHALLENGE_LEN];
    instream
        .read_bytes(&mut challenge)
        .await
        .map_err(RfbClientError::Transport)?;

    let response = encrypt_challenge(&challenge, password);

    outstream.write_bytes(&response);
    outstream.flush().await.map_err(RfbClientError::Transport)?;

    Ok(())
}

fn encrypt_challenge(challenge: &[u8; CHALLENGE_LEN], password: &str) -> [u8; CHALLENGE_LEN] {
    let key = derive_key(password);
    let cipher = Des::new_from_slice(&key).expect("DES key is always exactly 8 bytes");

    let mut response = [0u8; CHALLENGE_LEN];
    for (src, dst) in challenge.chunks_exact(8).zip(response.chunks_exact_mut(8)) {
        let mut block = cipher::generic_array::GenericArray::clone_from_slice(src);
        cipher.encrypt_block(&mut block);
        dst.copy_from_slice(&block);
    }
    response
}
