//! Apple Remote Desktop authentication (security type 30).
//!
//! Like MS-Logon this is a Diffie-Hellman key exchange followed by
//! encrypted credentials, but the modulus and generator are variable length
//! (not fixed at 64 bits) and the derived key feeds AES-128 in ECB mode
//! rather than DES-CBC. The MD5 digest of the shared secret supplies the
//! AES key.

use crate::config::Config;
use crate::errors::RfbClientError;
use aes::Aes128;
use cipher::{BlockEncrypt, KeyInit};
use md5::{Digest, Md5};
use num_bigint::BigUint;
use rand::RngCore;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

const CREDENTIAL_FIELD_LEN: usize = 64;

pub async fn authenticate<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    config: &Config,
) -> Result<(), RfbClientError> {
    let username = config.connection.username.as_deref().ok_or_else(|| {
        RfbClientError::Config("ARD authentication requires a username".to_string())
    })?;
    let password = config.connection.password.as_deref().ok_or_else(|| {
        RfbClientError::Config("ARD authentication requires a password".to_string())
    })?;

    let generator_len = instream.read_u16().await.map_err(RfbClientError::Transport)? as usize;
    let mut generator_bytes = vec![0u8; generator_len];
    instream
        .read_bytes(&mut generator_bytes)
        .await
        .map_err(RfbClientError::Transport)?;

    let key_len = instream.read_u16().await.map_err(RfbClientError::Transport)? as usize;
    let mut modulus_bytes = vec![0u8; key_len];
    instream
        .read_bytes(&mut modulus_bytes)
        .await
        .map_err(RfbClientError::Transport)?;

    let mut server_public_bytes = vec![0u8; key_len];
    instream
        .read_bytes(&mut server_public_bytes)
        .await
        .map_err(RfbClientError::Transport)?;

    let generator = BigUint::from_bytes_be(&generator_bytes);
    let modulus = BigUint::from_bytes_be(&modulus_bytes);
    let server_public = BigUint::from_bytes_be(&server_public_bytes);

    let mut priv_bytes = vec![0u8; key_len];
    rand::thread_rng().fill_bytes(&mut priv_bytes);
    let private_key = BigUint::from_bytes_be(&priv_bytes);

    let client_public = generator.modpow(&private_key, &modulus);
    let shared_secret = server_public.modpow(&private_key, &modulus);

    let client_public_bytes = to_fixed_len(&client_public, key_len);
    outstream.write_bytes(&client_public_bytes);

    let aes_key = derive_aes_key(&shared_secret, key_len);
    let credentials = pack_credentials(username, password);
    let encrypted = aes128_ecb_encrypt(&aes_key, &credentials);
    outstream.write_bytes(&encrypted);

    outstream.flush().await.map_err(RfbClientError::Transport)?;

    Ok(())
}

fn to_fixed_len(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; len];
    if bytes.len() >= len {
        out.copy_from_slice(&bytes[bytes.len() - len..]);
    } else {
        out[len - bytes.len()..].copy_from_slice(&bytes);
    }
    out
}

/// AES-128 key is the MD5 digest of the shared secret's fixed-width
/// big-endian representation.
fn derive_aes_key(shared_secret: &BigUint, key_len: usize) -> [u8; 16] {
    let secret_bytes = to_fixed_len(shared_secret, key_len);
    let mut hasher = Md5::new();
    hasher.update(&secret_bytes);
    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest);
    key
}

fn pack_credentials(username: &str, password: &str) -> [u8; CREDENTIAL_FIELD_LEN * 2] {
    let mut buf = [0u8; CREDENTIAL_FIELD_LEN * 2];
    let ulen = username.len().min(CREDENTIAL_FIELD_LEN - 1);
    buf[..ulen].copy_from_slice(&username.as_bytes()[..ulen]);
    let plen = password.len().min(CREDENTIAL_FIELD_LEN - 1);
    buf[CREDENTIAL_FIELD_LEN..CREDENTIAL_FIELD_LEN + plen]
        .copy_from_slice(&password.as_bytes()[..plen]);
    buf
}

fn aes128_ecb_encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    debug_assert_eq!(plaintext.len() % 16, 0);
    let cipher = Aes128::new_from_slice(key).expect("AES-128 key is always exactly 16 bytes");
    let mut out = Vec::with_capacity(plaintext.len());
    for chunk in plaintext.chunks_exact(16) {
        let mut block = cipher::generic_array::GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_credentials_splits_fields() {
        let buf = pack_credentials("alice", "hunter2");
        assert_eq!(&buf[0..5], b"alice");
        assert_eq!(buf[5], 0);
        assert_eq!(&buf[CREDENTIAL_FIELD_LEN..CREDENTIAL_FIELD_LEN + 7], b"hunter2");
    }

    #[test]
    fn test_aes128_ecb_encrypt_preserves_length() {
        let key = [0u8; 16];
        let plaintext = [0u8; 128];
        let ct = aes128_ecb_encrypt(&key, &plaintext);
        assert_eq!(ct.len(), 128);
    }

    #[test]
    fn test_to_fixed_len_zero_pads() {
        let value = BigUint::from(5u32);
        let bytes = to_fixed_len(&value, 4);
        assert_eq!(bytes, vec![0, 0, 0, 5]);
    }

    #[test]
    fn test_derive_aes_key_is_deterministic() {
        let secret = BigUint::from(42u32);
        let a = derive_aes_key(&secret, 8);
        let b = derive_aes_key(&secret, 8);
        assert_eq!(a, b);
    }
}
