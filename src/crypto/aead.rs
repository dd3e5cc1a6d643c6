//! AEAD payload encryption.
//!
//! Media payloads are encrypted with XChaCha20-Poly1305 and framed as:
//!
//! ```text
//! [MAGIC 8B]["MSAFEENC"]
//! [VERSION 1B][0x01]
//! [NONCE 24B][random, fresh per encryption]
//! [CIPHERTEXT variable][includes 16B Poly1305 tag]
//! ```
//!
//! The auth tag detects tampering and wrong-key use; there is no silent
//! misdecode path.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};

use super::keys::{generate_nonce, MediaKey, NONCE_LEN};
use crate::error::{StoreError, StoreResult};

/// Magic bytes identifying an encrypted payload file
pub const MAGIC: &[u8; 8] = b"MSAFEENC";

/// Current payload format version
pub const VERSION: u8 = 0x01;

/// Poly1305 authentication tag size
pub const TAG_LEN: usize = 16;

/// Header size: MAGIC(8) + VERSION(1) + NONCE(24)
pub const HEADER_LEN: usize = 8 + 1 + NONCE_LEN;

/// Minimum valid payload size
pub const MIN_PAYLOAD_LEN: usize = HEADER_LEN + TAG_LEN;

/// Encrypted payload split into its framed parts
pub struct EncryptedPayload {
    /// Nonce (24 bytes)
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Serialize to the on-disk framing
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the on-disk framing, validating magic, version, and length
    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        if data.len() < MIN_PAYLOAD_LEN {
            return Err(StoreError::DecryptionFailed("payload too short".into()));
        }
        if &data[0..8] != MAGIC {
            return Err(StoreError::DecryptionFailed("invalid magic bytes".into()));
        }
        let version = data[8];
        if version != VERSION {
            return Err(StoreError::DecryptionFailed(format!(
                "unsupported payload version: {}",
                version
            )));
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&data[9..9 + NONCE_LEN]);

        Ok(Self {
            nonce,
            ciphertext: data[HEADER_LEN..].to_vec(),
        })
    }
}

/// Encrypt a cleartext payload with a fresh nonce
pub fn encrypt_payload(key: &MediaKey, plaintext: &[u8]) -> StoreResult<EncryptedPayload> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
        .map_err(|e| StoreError::EncryptionFailed(e.to_string()))?;

    let nonce = generate_nonce();

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| StoreError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedPayload { nonce, ciphertext })
}

/// Decrypt a payload, verifying the authentication tag
pub fn decrypt_payload(key: &MediaKey, payload: &EncryptedPayload) -> StoreResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
        .map_err(|e| StoreError::DecryptionFailed(e.to_string()))?;

    cipher
        .decrypt(
            XNonce::from_slice(&payload.nonce),
            payload.ciphertext.as_slice(),
        )
        .map_err(|_| StoreError::DecryptionFailed("authentication failed".into()))
}
