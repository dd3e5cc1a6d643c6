//! Key registry.
//!
//! Owns the set of named encryption keys and the "current" pointer. Raw key
//! bytes persist through the [`SecretKeyStore`] seam; the current-key name
//! goes through the preference store. All mutations run under a single
//! writer lock and readers receive cloned snapshots, so a key switch or
//! deletion is never observable half-done.

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::crypto::MediaKey;
use crate::error::{StoreError, StoreResult};
use crate::keychain::{SecretKeyStore, StoredKeyRecord};
use crate::prefs::{PrefKey, PreferenceStore};

/// Minimum key name length (exclusive)
const MIN_NAME_LEN: usize = 1;

/// A named encryption key
#[derive(Debug, Clone)]
pub struct PrivateKey {
    pub id: Uuid,
    pub name: String,
    pub key: MediaKey,
    pub created_at: DateTime<Utc>,
}

impl PrivateKey {
    fn to_record(&self) -> StoredKeyRecord {
        StoredKeyRecord {
            id: self.id,
            name: self.name.clone(),
            key_b64: base64::engine::general_purpose::STANDARD.encode(self.key.expose()),
            created_at: self.created_at,
        }
    }

    fn from_record(record: &StoredKeyRecord) -> StoreResult<Self> {
        Ok(Self {
            id: record.id,
            name: record.name.clone(),
            key: MediaKey::from_slice(&record.key_bytes()?)?,
            created_at: record.created_at,
        })
    }

    /// Base64 form of the key bytes, for backup documents
    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.key.expose())
    }

    /// Short hex fingerprint of the key material, safe to display
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.key.expose());
        hex::encode(&digest[..4])
    }
}

struct RegistryState {
    keys: Vec<PrivateKey>,
    current: Option<String>,
}

/// Registry of named, rotatable encryption keys
pub struct KeyRegistry {
    secrets: Box<dyn SecretKeyStore>,
    prefs: Arc<PreferenceStore>,
    state: RwLock<RegistryState>,
}

impl KeyRegistry {
    /// Load the registry from the secret store.
    ///
    /// When the persisted current-key name no longer resolves (or was never
    /// set), the oldest stored key becomes current, matching the behavior a
    /// fresh install recovers with.
    pub fn open(secrets: Box<dyn SecretKeyStore>, prefs: Arc<PreferenceStore>) -> StoreResult<Self> {
        let mut keys = Vec::new();
        for record in secrets.load_all()? {
            keys.push(PrivateKey::from_record(&record)?);
        }
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let persisted = prefs.string(PrefKey::CurrentKeyName);
        let current = match persisted {
            Some(name) if keys.iter().any(|k| k.name == name) => Some(name),
            _ => {
                let fallback = keys.first().map(|k| k.name.clone());
                if let Some(ref name) = fallback {
                    prefs.set_string(PrefKey::CurrentKeyName, name)?;
                }
                fallback
            }
        };

        Ok(Self {
            secrets,
            prefs,
            state: RwLock::new(RegistryState { keys, current }),
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // KEY LIFECYCLE
    // ═══════════════════════════════════════════════════════════════

    /// Create a key with fresh random material.
    ///
    /// The first key ever created becomes current regardless of
    /// `make_current`.
    pub fn create(&self, name: &str, make_current: bool) -> StoreResult<PrivateKey> {
        self.validate_name(name)?;

        let mut state = self.state.write();
        if state.keys.iter().any(|k| k.name == name) {
            return Err(StoreError::DuplicateKeyName(name.to_string()));
        }

        let key = PrivateKey {
            id: Uuid::new_v4(),
            name: name.to_string(),
            key: MediaKey::generate(),
            created_at: Utc::now(),
        };

        let first_key = state.keys.is_empty();
        state.keys.push(key.clone());
        self.persist_keys(&state.keys)?;

        if first_key || make_current {
            state.current = Some(name.to_string());
            self.prefs.set_string(PrefKey::CurrentKeyName, name)?;
        }

        log::info!("created key '{}' ({})", name, key.id);
        Ok(key)
    }

    /// Import a key from its base64 backup form
    pub fn import_key(&self, name: &str, base64_key: &str) -> StoreResult<PrivateKey> {
        self.validate_name(name)?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(base64_key.trim())
            .map_err(|e| StoreError::KeyDerivationFailed(format!("invalid key backup: {}", e)))?;

        let mut state = self.state.write();
        if state.keys.iter().any(|k| k.name == name) {
            return Err(StoreError::DuplicateKeyName(name.to_string()));
        }

        let key = PrivateKey {
            id: Uuid::new_v4(),
            name: name.to_string(),
            key: MediaKey::from_slice(&bytes)?,
            created_at: Utc::now(),
        };

        let first_key = state.keys.is_empty();
        state.keys.push(key.clone());
        self.persist_keys(&state.keys)?;

        if first_key {
            state.current = Some(name.to_string());
            self.prefs.set_string(PrefKey::CurrentKeyName, name)?;
        }

        log::info!("imported key '{}' ({})", name, key.id);
        Ok(key)
    }

    /// Make a stored key the current one
    pub fn set_active(&self, name: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        if !state.keys.iter().any(|k| k.name == name) {
            return Err(StoreError::KeyNotFound(name.to_string()));
        }

        state.current = Some(name.to_string());
        self.prefs.set_string(PrefKey::CurrentKeyName, name)?;
        Ok(())
    }

    /// Delete a key's material.
    ///
    /// Media encrypted under it stays on disk, undecryptable until the key
    /// is imported again.
    pub fn delete(&self, name: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        let before = state.keys.len();
        state.keys.retain(|k| k.name != name);
        if state.keys.len() == before {
            return Err(StoreError::KeyNotFound(name.to_string()));
        }

        self.persist_keys(&state.keys)?;

        if state.current.as_deref() == Some(name) {
            state.current = None;
            self.prefs.remove(PrefKey::CurrentKeyName)?;
        }

        log::info!("deleted key '{}'", name);
        Ok(())
    }

    /// Fail with `InvalidKeyName` unless the name is longer than one char
    pub fn validate_name(&self, name: &str) -> StoreResult<()> {
        if name.chars().count() <= MIN_NAME_LEN {
            return Err(StoreError::InvalidKeyName);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // LOOKUPS
    // ═══════════════════════════════════════════════════════════════

    /// The current key, if one is set
    pub fn current_key(&self) -> Option<PrivateKey> {
        let state = self.state.read();
        let name = state.current.as_deref()?;
        state.keys.iter().find(|k| k.name == name).cloned()
    }

    /// Lookup by id; absence is not an error — callers decide the fallback
    pub fn find_by_id(&self, id: Uuid) -> Option<PrivateKey> {
        self.state.read().keys.iter().find(|k| k.id == id).cloned()
    }

    /// Lookup by exact (case-sensitive) name
    pub fn find_by_name(&self, name: &str) -> Option<PrivateKey> {
        self.state.read().keys.iter().find(|k| k.name == name).cloned()
    }

    /// All stored keys, oldest first
    pub fn stored_keys(&self) -> Vec<PrivateKey> {
        self.state.read().keys.clone()
    }

    // ═══════════════════════════════════════════════════════════════
    // BACKUP
    // ═══════════════════════════════════════════════════════════════

    /// Human-readable backup document listing every key in base64
    pub fn backup_document(&self) -> String {
        let state = self.state.read();
        let mut doc = state
            .keys
            .iter()
            .map(|key| format!("Name: {}\nCode:\n{}", key.name, key.base64()))
            .collect::<Vec<_>>()
            .join("\n");
        doc.push_str("\n\nImport a code with `mediasafe key import` to use the key again.");
        doc
    }

    fn persist_keys(&self, keys: &[PrivateKey]) -> StoreResult<()> {
        let records: Vec<StoredKeyRecord> = keys.iter().map(|k| k.to_record()).collect();
        self.secrets.persist(&records)
    }
}
