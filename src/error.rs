//! Error types shared across the crate.

use thiserror::Error;

/// Result type for store and key operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error taxonomy for key lifecycle, media store, and import operations
#[derive(Error, Debug)]
pub enum StoreError {
    // ═══════════════════════════════════════════════════════════════
    // KEY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("A key named '{0}' already exists")]
    DuplicateKeyName(String),

    #[error("Invalid key name: must be longer than one character")]
    InvalidKeyName,

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("No current key is set")]
    MissingPrivateKey,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    // ═══════════════════════════════════════════════════════════════
    // FILE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    FileIo(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // ALBUM / TASK ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Album not found: {0}")]
    AlbumNotFound(String),

    #[error("Invalid task state: {0}")]
    InvalidTaskState(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    // ═══════════════════════════════════════════════════════════════
    // PERSISTENCE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Secret store error: {0}")]
    SecretStore(String),
}

impl StoreError {
    /// Check if this error indicates tampering or a wrong key
    pub fn is_security_critical(&self) -> bool {
        matches!(self, StoreError::DecryptionFailed(_))
    }

    /// Check if a batch operation should continue past this error
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            StoreError::FileNotFound(_)
                | StoreError::FileIo(_)
                | StoreError::DecryptionFailed(_)
                | StoreError::EncryptionFailed(_)
        )
    }
}
