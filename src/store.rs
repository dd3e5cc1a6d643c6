//! Encrypted media store.
//!
//! One store per album. Every saved payload is encrypted under the
//! registry's current key and tagged out-of-band with that key's id; at load
//! time the tag picks the decryption key, with the current key as the only
//! fallback. Copy and move carry the payload, its key tag, and its preview
//! sidecar verbatim — files never get silently re-encrypted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::album::{Album, AlbumManager};
use crate::crypto::{decrypt_payload, encrypt_payload, EncryptedPayload};
use crate::error::{StoreError, StoreResult};
use crate::keyring::{KeyRegistry, PrivateKey};
use crate::media::{detect_mime, CleartextMedia, EncryptedMediaFile, PreviewModel};
use crate::migrate::{KeyTagMigrator, MigrationReport};
use crate::prefs::{PrefKey, PreferenceStore};
use crate::{secure_fs, tag};

/// Extension for encrypted payload files
pub const PAYLOAD_EXT: &str = "enc";

/// Outcome of a best-effort multi-file delete
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: usize,
    pub failures: Vec<DeleteFailure>,
}

#[derive(Debug)]
pub struct DeleteFailure {
    pub id: String,
    pub reason: String,
}

impl DeleteReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Per-album encrypted media store
pub struct MediaStore {
    album: Album,
    root: PathBuf,
    registry: Arc<KeyRegistry>,
    prefs: Arc<PreferenceStore>,
}

impl MediaStore {
    /// Open the store for an album, creating its directory layout
    pub fn open(album: &Album, manager: &AlbumManager) -> StoreResult<Self> {
        let root = manager.storage_root(album);
        std::fs::create_dir_all(root.join("media"))?;
        std::fs::create_dir_all(root.join("previews"))?;

        Ok(Self {
            album: album.clone(),
            root,
            registry: manager.registry().clone(),
            prefs: manager.preferences().clone(),
        })
    }

    pub fn album(&self) -> &Album {
        &self.album
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    pub fn previews_dir(&self) -> PathBuf {
        self.root.join("previews")
    }

    fn media_path(&self, id: &str) -> PathBuf {
        self.media_dir().join(format!("{}.{}", id, PAYLOAD_EXT))
    }

    fn preview_path(&self, id: &str) -> PathBuf {
        self.previews_dir().join(format!("{}.{}", id, PAYLOAD_EXT))
    }

    fn current_key(&self) -> StoreResult<PrivateKey> {
        self.registry
            .current_key()
            .ok_or(StoreError::MissingPrivateKey)
    }

    // ═══════════════════════════════════════════════════════════════
    // SAVE
    // ═══════════════════════════════════════════════════════════════

    /// Encrypt and persist one media item.
    ///
    /// The payload lands via atomic replace, then the key tag is set, then
    /// the encrypted preview sidecar is written. A crash between payload and
    /// tag leaves a legacy-style untagged file that the migrator or the
    /// current-key fallback handles.
    pub fn save(&self, media: &CleartextMedia) -> StoreResult<EncryptedMediaFile> {
        let key = self.current_key()?;
        let cleartext = media.read_bytes()?;

        let payload = encrypt_payload(&key.key, &cleartext)?;
        let path = self.media_path(&media.id);
        secure_fs::write_atomic(&path, &payload.to_bytes())?;
        tag::write_tag(&path, key.id)?;

        self.write_preview(&media.id, media.file_name(), &cleartext, &key)?;

        // Imported-media stats
        let _ = self.prefs.increase_integer(PrefKey::ImportedMediaCount, 1);
        let _ = self
            .prefs
            .increase_integer(PrefKey::ImportedMediaBytes, cleartext.len() as i64);
        let _ = self
            .prefs
            .set_string(PrefKey::LastImportDate, &Utc::now().to_rfc3339());

        log::debug!(
            "saved media {} ({} bytes) under key '{}'",
            media.id,
            cleartext.len(),
            key.name
        );

        Ok(EncryptedMediaFile::new(media.id.clone(), path))
    }

    fn write_preview(
        &self,
        id: &str,
        file_name: Option<String>,
        cleartext: &[u8],
        key: &PrivateKey,
    ) -> StoreResult<()> {
        let preview = PreviewModel {
            id: id.to_string(),
            file_name,
            byte_len: cleartext.len() as u64,
            mime_type: detect_mime(cleartext),
            created_at: Utc::now(),
        };

        let body = serde_json::to_vec(&preview)?;
        let payload = encrypt_payload(&key.key, &body)?;
        let path = self.preview_path(id);
        secure_fs::write_atomic(&path, &payload.to_bytes())?;
        tag::write_tag(&path, key.id)
    }

    // ═══════════════════════════════════════════════════════════════
    // LOAD
    // ═══════════════════════════════════════════════════════════════

    /// Decrypt a payload, resolving the key from its tag.
    ///
    /// Resolution: a well-formed tag that matches a stored key wins; an
    /// absent tag, a malformed tag, or an unknown key id falls back to the
    /// current key. Authentication failure with the chosen key is final —
    /// no other keys are tried.
    pub fn load(&self, file: &EncryptedMediaFile) -> StoreResult<Vec<u8>> {
        self.decrypt_at(&file.path)
    }

    /// Decrypt and parse a media item's preview sidecar
    pub fn load_preview(&self, file: &EncryptedMediaFile) -> StoreResult<PreviewModel> {
        let body = self.decrypt_at(&self.preview_path(&file.id))?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn decrypt_at(&self, path: &Path) -> StoreResult<Vec<u8>> {
        if !path.exists() {
            return Err(StoreError::FileNotFound(path.display().to_string()));
        }

        let data = std::fs::read(path)?;
        let payload = EncryptedPayload::from_bytes(&data)?;
        let key = self.resolve_key(path)?;

        decrypt_payload(&key.key, &payload)
    }

    /// Key resolution for one payload file
    fn resolve_key(&self, path: &Path) -> StoreResult<PrivateKey> {
        if let Some(key_id) = tag::read_tag(path) {
            if let Some(key) = self.registry.find_by_id(key_id) {
                return Ok(key);
            }
            log::warn!(
                "key {} tagged on {} is not in the registry, falling back to current key",
                key_id,
                path.display()
            );
        }
        self.current_key()
    }

    // ═══════════════════════════════════════════════════════════════
    // COPY / MOVE
    // ═══════════════════════════════════════════════════════════════

    /// Duplicate a payload into another album's store.
    ///
    /// The ciphertext, key tag, and preview travel verbatim — the copy stays
    /// decryptable under its original key no matter which key the
    /// destination album uses.
    pub fn copy(
        &self,
        file: &EncryptedMediaFile,
        dest: &MediaStore,
    ) -> StoreResult<EncryptedMediaFile> {
        if !file.path.exists() {
            return Err(StoreError::FileNotFound(file.path.display().to_string()));
        }

        let dest_path = dest.media_path(&file.id);
        let payload = std::fs::read(&file.path)?;
        secure_fs::write_atomic(&dest_path, &payload)?;
        tag::copy_tag(&file.path, &dest_path)?;

        let src_preview = self.preview_path(&file.id);
        if src_preview.exists() {
            let dest_preview = dest.preview_path(&file.id);
            let preview = std::fs::read(&src_preview)?;
            secure_fs::write_atomic(&dest_preview, &preview)?;
            tag::copy_tag(&src_preview, &dest_preview)?;
        }

        Ok(EncryptedMediaFile::new(file.id.clone(), dest_path))
    }

    /// Relocate a payload into another album's store.
    ///
    /// The source is removed only after the destination write is durably on
    /// disk (the copy path fsyncs before renaming into place).
    pub fn move_to(
        &self,
        file: &EncryptedMediaFile,
        dest: &MediaStore,
    ) -> StoreResult<EncryptedMediaFile> {
        let moved = self.copy(file, dest)?;
        self.remove_artifacts(file)?;
        Ok(moved)
    }

    // ═══════════════════════════════════════════════════════════════
    // DELETE
    // ═══════════════════════════════════════════════════════════════

    /// Delete payloads and their preview/sidecar artifacts.
    ///
    /// Best-effort over the list: one failure is recorded and the rest still
    /// get deleted.
    pub fn delete(&self, files: &[EncryptedMediaFile]) -> DeleteReport {
        let mut report = DeleteReport::default();

        for file in files {
            match self.remove_artifacts(file) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    log::warn!("failed to delete {}: {}", file.id, e);
                    report.failures.push(DeleteFailure {
                        id: file.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }

    fn remove_artifacts(&self, file: &EncryptedMediaFile) -> StoreResult<()> {
        secure_fs::delete_with_overwrite(&file.path)?;
        tag::remove_tag(&file.path)?;

        let preview = self.preview_path(&file.id);
        secure_fs::delete_with_overwrite(&preview)?;
        tag::remove_tag(&preview)?;

        Ok(())
    }

    /// Remove every file under the album's storage root
    pub fn delete_all(&self) -> StoreResult<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        std::fs::create_dir_all(self.media_dir())?;
        std::fs::create_dir_all(self.previews_dir())?;
        log::info!("deleted all media for album '{}'", self.album.name);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // ENUMERATION / MIGRATION
    // ═══════════════════════════════════════════════════════════════

    /// All payload files in the album, newest first
    pub fn enumerate_media(&self) -> StoreResult<Vec<EncryptedMediaFile>> {
        let mut entries: Vec<(std::time::SystemTime, EncryptedMediaFile)> = Vec::new();

        for entry in std::fs::read_dir(self.media_dir())? {
            let entry = entry?;
            let path = entry.path();

            if tag::is_tag_sidecar(&path) {
                continue;
            }
            if path.extension().map_or(true, |ext| ext != PAYLOAD_EXT) {
                continue;
            }

            let Some(file) = EncryptedMediaFile::from_path(&path) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            entries.push((modified, file));
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, f)| f).collect())
    }

    /// Backfill key tags on files created before tagging existed
    pub fn set_key_tag_for_existing_files(&self) -> StoreResult<MigrationReport> {
        KeyTagMigrator::new(self).run()
    }

    /// Id of the key a payload is tagged with, if any (used by the migrator)
    pub fn tagged_key_id(&self, path: &Path) -> Option<Uuid> {
        tag::read_tag(path)
    }
}
