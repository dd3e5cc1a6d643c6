//! Key material handling.
//!
//! All media keys are 256-bit secrets wrapped so they are zeroized on drop
//! and never printed by accident.

use hkdf::Hkdf;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;

use crate::error::{StoreError, StoreResult};

/// Key length for XChaCha20-Poly1305 and AES-256-GCM
pub const KEY_LEN: usize = 32;

/// Nonce length for XChaCha20-Poly1305
pub const NONCE_LEN: usize = 24;

/// HKDF contexts for derived keys
pub mod contexts {
    /// Context for the secret-store wrapping key
    pub const SECRETS: &[u8] = b"MEDIASAFE:SECRETS:v1";
}

/// Secure key wrapper with automatic zeroization
#[derive(Clone)]
pub struct MediaKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl MediaKey {
    /// Create a key from raw bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Create a key from a byte slice, failing on wrong length
    pub fn from_slice(bytes: &[u8]) -> StoreResult<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            StoreError::KeyDerivationFailed(format!(
                "expected {} key bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self::new(array))
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

impl std::fmt::Debug for MediaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MediaKey(..)")
    }
}

/// Derive a subkey using HKDF-SHA256
pub fn derive_subkey(ikm: &[u8], salt: &[u8], info: &[u8]) -> StoreResult<MediaKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_LEN];

    hk.expand(info, &mut okm)
        .map_err(|e| StoreError::KeyDerivationFailed(e.to_string()))?;

    Ok(MediaKey::new(okm))
}

/// Generate a random nonce for XChaCha20-Poly1305
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
