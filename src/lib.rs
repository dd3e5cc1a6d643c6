//! # mediasafe
//!
//! Encrypted media store with rotatable named keys and a resumable
//! background import pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       MEDIASAFE                          │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────┐   │
//! │  │ KEY REGISTRY│  │  MEDIA STORE │  │ IMPORT MANAGER │   │
//! │  │ named keys, │  │ XChaCha20-   │  │ pause/resume/  │   │
//! │  │ current ptr │  │ Poly1305 +   │  │ cancel, events │   │
//! │  └──────┬──────┘  │ key tags     │  └───────┬────────┘   │
//! │         │         └──────┬───────┘          │            │
//! │  ┌──────┴────────────────┴─────────────────┴──────────┐  │
//! │  │   SECRET STORE (AES-256-GCM)  ·  PREFERENCE STORE  │  │
//! │  │   raw key bytes at rest       ·  local + cloud KV  │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security model
//!
//! - Media payloads encrypted with XChaCha20-Poly1305, fresh nonce per file
//! - Each ciphertext tagged out-of-band with the id of its encrypting key,
//!   so keys can rotate without re-encrypting history
//! - Raw key bytes only ever at rest inside the AES-256-GCM secrets file
//! - Key material zeroized in memory after use

pub mod album;
pub mod crypto;
pub mod error;
pub mod import;
pub mod keychain;
pub mod keyring;
pub mod media;
pub mod migrate;
pub mod prefs;
pub mod secure_fs;
pub mod store;
pub mod tag;

pub use album::{Album, AlbumManager, StorageOption};
pub use error::{StoreError, StoreResult};
pub use import::{ImportManager, ImportProgressUpdate, ImportTask, ImportTaskState};
pub use keychain::{FileSecretStore, Protection, SecretKeyStore};
pub use keyring::{KeyRegistry, PrivateKey};
pub use media::{CleartextMedia, EncryptedMediaFile};
pub use migrate::{KeyTagMigrator, MigrationReport};
pub use prefs::{PrefKey, PreferenceStore};
pub use store::MediaStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
