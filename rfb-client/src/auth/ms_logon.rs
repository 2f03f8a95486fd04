//! UltraVNC MS-Logon authentication (security type 0xFD).
//!
//! A fixed-size (64-bit) Diffie-Hellman key exchange establishes a shared
//! secret between client and server; the shared secret then keys a DES
//! cipher used in CBC mode (zero IV) to encrypt the username and password
//! before they go over the wire. Unlike classic VNC auth, credentials
//! travel encrypted rather than being used only in a challenge-response, so
//! both username and password are required.

use crate::config::Config;
use crate::errors::RfbClientError;
use cipher::{BlockEncrypt, KeyInit};
use des::Des;
use num_bigint::BigUint;
use rand::RngCore;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

const USERNAME_LEN: usize = 256;
const PASSWORD_LEN: usize = 64;

pub async fn authenticate<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    config: &Config,
) -> Result<(), RfbClientError> {
    let username = config.connection.username.as_deref().ok_or_else(|| {
        RfbClientError::Config("MS-Logon authentication requires a username".to_string())
    })?;
    let password = config.connection.password.as_deref().ok_or_else(|| {
        RfbClientError::Config("MS-Logon authentication requires a password".to_string())
    })?;

    let generator = read_u64(instream).await?;
    let modulus = read_u64(instream).await?;
    let server_public = read_u64(instream).await?;

    let modulus_big = BigUint::from(modulus);
    let generator_big = BigUint::from(generator);

    let mut priv_bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut priv_bytes);
    let private_key = BigUint::from_bytes_be(&priv_bytes);

    let client_public = generator_big.modpow(&private_key, &modulus_big);
    let shared_secret = BigUint::from(server_public).modpow(&private_key, &modulus_big);

    outstream.write_bytes(&to_u64(&client_public).to_be_bytes());
    outstream.flush().await.map_err(RfbClientError::Transport)?;

    let key = shared_secret_key(&shared_secret);

    let mut username_buf = [0u8; USERNAME_LEN];
    let ulen = username.len().min(USERNAME_LEN);
    username_buf[..ulen].copy_from_slice(&username.as_bytes()[..ulen]);

    let mut password_buf = [0u8; PASSWORD_LEN];
    let plen = password.len().min(PASSWORD_LEN);
    password_buf[..plen].copy_from_slice(&password.as_bytes()[..plen]);

    let enc_username = des_cbc_encrypt(&key, &username_buf);
    let enc_password = des_cbc_encrypt(&key, &password_buf);

    outstream.write_bytes(&enc_username);
    outstream.write_bytes(&enc_password);
    outstream.flush().await.map_err(RfbClientError::Transport)?;

    Ok(())
}

async fn read_u64<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> Result<u64, RfbClientError> {
    let mut buf = [0u8; 8];
    instream
        .read_bytes(&mut buf)
        .await
        .map_err(RfbClientError::Transport)?;
    Ok(u64::from_be_bytes(buf))
}

fn to_u64(value: &BigUint) -> u64 {
    let bytes = value.to_bytes_be();
    let mut buf = [0u8; 8];
    let start = 8usize.saturating_sub(bytes.len());
    buf[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(8)..]);
    u64::from_be_bytes(buf)
}

/// Derives the 8-byte DES key from the Diffie-Hellman shared secret.
fn shared_secret_key(shared_secret: &BigUint) -> [u8; 8] {
    let mut key = [0u8; 8];
    let bytes = shared_secret.to_bytes_be();
    let start = 8usize.saturating_sub(bytes.len());
    key[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(8)..]);
    key
}

/// DES-CBC encryption with an all-zero IV, chaining ciphertext blocks by
/// XOR before each encryption as per standard CBC.
fn des_cbc_encrypt(key: &[u8; 8], plaintext: &[u8]) -> Vec<u8> {
    debug_assert_eq!(plaintext.len() % 8, 0);
    let cipher = Des::new_from_slice(key).expect("DES key is always exactly 8 bytes");
    let mut prev = [0u8; 8];
    let mut out = Vec::with_capacity(plaintext.len());
    for chunk in plaintext.chunks_exact(8) {
        let mut block = [0u8; 8];
        for i in 0..8 {
            block[i] = chunk[i] ^ prev[i];
        }
        let mut generic = cipher::generic_array::GenericArray::clone_from_slice(&block);
        cipher.encrypt_block(&mut generic);
        prev.copy_from_slice(&generic);
        out.extend_from_slice(&generic);
    }
    out
}
