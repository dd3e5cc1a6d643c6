//! Secret key storage.
//!
//! Raw key bytes never touch the preference store; they live in an encrypted
//! secrets file — the OS-keychain equivalent on plain filesystems. The file
//! body (a JSON list of key records) is wrapped with AES-256-GCM under a key
//! derived via HKDF from either a device secret generated on first use or an
//! Argon2id-stretched passphrase:
//!
//! ```text
//! [MAGIC 8B]["MSAFEKEY"]
//! [VERSION 1B][0x01]
//! [NONCE 12B][random]
//! [CIPHERTEXT variable][AES-256-GCM encrypted JSON + tag]
//! ```

use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::keys::{contexts, derive_subkey, MediaKey, KEY_LEN};
use crate::error::{StoreError, StoreResult};
use crate::secure_fs;

const MAGIC: &[u8; 8] = b"MSAFEKEY";
const VERSION: u8 = 0x01;
const GCM_NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 8 + 1 + GCM_NONCE_LEN;

const DEVICE_SECRET_FILE: &str = "device.secret";
const SALT_FILE: &str = "secrets.salt";
const SECRETS_FILE: &str = "secrets.enc";

/// Stored form of a private key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKeyRecord {
    pub id: Uuid,
    pub name: String,
    /// Raw key bytes, base64; only ever serialized inside the encrypted body
    pub key_b64: String,
    pub created_at: DateTime<Utc>,
}

impl StoredKeyRecord {
    pub fn key_bytes(&self) -> StoreResult<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.key_b64)
            .map_err(|e| StoreError::SecretStore(format!("corrupt key record: {}", e)))
    }
}

/// Secure storage seam for raw key material.
///
/// The registry depends on this interface; platforms with a real keychain
/// can provide their own implementation.
pub trait SecretKeyStore: Send + Sync {
    fn load_all(&self) -> StoreResult<Vec<StoredKeyRecord>>;
    fn persist(&self, records: &[StoredKeyRecord]) -> StoreResult<()>;
    fn clear(&self) -> StoreResult<()>;
}

/// How the secrets file's wrapping key is obtained
pub enum Protection {
    /// Random 32-byte secret kept in a 0600 file next to the secrets
    DeviceKey,
    /// Argon2id-stretched passphrase (salt stored next to the secrets)
    Passphrase(String),
}

/// File-backed secret store
pub struct FileSecretStore {
    secrets_path: PathBuf,
    wrapping_key: MediaKey,
}

impl FileSecretStore {
    /// Open (or initialize) the secret store under `dir`
    pub fn open(dir: &Path, protection: Protection) -> StoreResult<Self> {
        std::fs::create_dir_all(dir)?;

        let seed: Zeroizing<[u8; KEY_LEN]> = match protection {
            Protection::DeviceKey => {
                Zeroizing::new(load_or_create_device_secret(&dir.join(DEVICE_SECRET_FILE))?)
            }
            Protection::Passphrase(passphrase) => {
                let salt = load_or_create_salt(&dir.join(SALT_FILE))?;
                Zeroizing::new(stretch_passphrase(&passphrase, &salt)?)
            }
        };

        let wrapping_key = derive_subkey(seed.as_ref(), b"", contexts::SECRETS)?;

        Ok(Self {
            secrets_path: dir.join(SECRETS_FILE),
            wrapping_key,
        })
    }

    fn encrypt_body(&self, body: &[u8]) -> StoreResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(self.wrapping_key.expose())
            .map_err(|e| StoreError::SecretStore(e.to_string()))?;

        let mut nonce = [0u8; GCM_NONCE_LEN];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), body)
            .map_err(|e| StoreError::SecretStore(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt_body(&self, data: &[u8]) -> StoreResult<Vec<u8>> {
        if data.len() < HEADER_LEN + 16 || &data[0..8] != MAGIC {
            return Err(StoreError::SecretStore("unrecognized secrets file".into()));
        }
        if data[8] != VERSION {
            return Err(StoreError::SecretStore(format!(
                "unsupported secrets version: {}",
                data[8]
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(self.wrapping_key.expose())
            .map_err(|e| StoreError::SecretStore(e.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(&data[9..HEADER_LEN]), &data[HEADER_LEN..])
            .map_err(|_| {
                StoreError::SecretStore("secrets authentication failed - wrong secret?".into())
            })
    }
}

impl SecretKeyStore for FileSecretStore {
    fn load_all(&self) -> StoreResult<Vec<StoredKeyRecord>> {
        if !self.secrets_path.exists() {
            return Ok(Vec::new());
        }

        let data = std::fs::read(&self.secrets_path)?;
        let body = self.decrypt_body(&data)?;
        let records: Vec<StoredKeyRecord> = serde_json::from_slice(&body)?;
        Ok(records)
    }

    fn persist(&self, records: &[StoredKeyRecord]) -> StoreResult<()> {
        let body = serde_json::to_vec(records)?;
        let framed = self.encrypt_body(&body)?;
        secure_fs::write_atomic(&self.secrets_path, &framed)
    }

    fn clear(&self) -> StoreResult<()> {
        if self.secrets_path.exists() {
            secure_fs::delete_with_overwrite(&self.secrets_path)?;
        }
        Ok(())
    }
}

fn load_or_create_device_secret(path: &Path) -> StoreResult<[u8; KEY_LEN]> {
    if path.exists() {
        let data = std::fs::read(path)?;
        return data.as_slice().try_into().map_err(|_| {
            StoreError::SecretStore("device secret has the wrong length".into())
        });
    }

    use rand::RngCore;
    let mut secret = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut secret);

    secure_fs::write_atomic(path, &secret)?;
    restrict_permissions(path)?;

    log::info!("generated device secret at {}", path.display());
    Ok(secret)
}

fn load_or_create_salt(path: &Path) -> StoreResult<[u8; 16]> {
    if path.exists() {
        let data = std::fs::read(path)?;
        return data
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::SecretStore("salt file has the wrong length".into()));
    }

    use rand::RngCore;
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    secure_fs::write_atomic(path, &salt)?;
    Ok(salt)
}

/// Stretch a passphrase into a 32-byte seed with Argon2id
fn stretch_passphrase(passphrase: &str, salt: &[u8]) -> StoreResult<[u8; KEY_LEN]> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let params = Params::new(65536, 3, 4, Some(KEY_LEN))
        .map_err(|e| StoreError::KeyDerivationFailed(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut seed = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut seed)
        .map_err(|e| StoreError::KeyDerivationFailed(e.to_string()))?;

    Ok(seed)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> StoreResult<()> {
    Ok(())
}
