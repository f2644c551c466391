/// XChaCha20-Poly1305 AEAD for protected chunks.
///
/// Each encrypted object gets its own derived key and a random 24-byte
/// nonce. The object header (policy and encryption id) is bound in as AAD,
/// so a ciphertext cannot be replayed under a different policy.
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{Result, VaultError};

pub const NONCE_LEN: usize = 24;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

/// Random 256-bit key, e.g. a key server master secret.
pub fn generate_key() -> SensitiveBytes32 {
    let mut key = [0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    SensitiveBytes32::new(key)
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

fn cipher(key: &SensitiveBytes32) -> Result<XChaCha20Poly1305> {
    XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(e.to_string()))
}

/// Encrypt with a caller-chosen nonce. Returns ciphertext with the tag appended.
pub fn encrypt_with_nonce(
    key: &SensitiveBytes32,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    cipher(key)?
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| VaultError::Encryption(e.to_string()))
}

/// Decrypt and authenticate. A wrong key, nonce, AAD or any flipped bit fails.
pub fn decrypt(
    key: &SensitiveBytes32,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    cipher(key)?
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| VaultError::Decryption("authentication tag mismatch".into()))
}
