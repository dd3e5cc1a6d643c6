//! Cryptographic primitives: key wrappers and AEAD payload handling.

pub mod aead;
pub mod keys;

pub use aead::{decrypt_payload, encrypt_payload, EncryptedPayload};
pub use keys::{derive_subkey, generate_nonce, MediaKey, KEY_LEN, NONCE_LEN};
