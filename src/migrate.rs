//! Key tag backfill for legacy files.
//!
//! Files encrypted before key tagging existed carry no tag and rely on the
//! current-key fallback forever. This sweep stamps them with the current
//! key's id once, so later key switches cannot strand them. Running it again
//! is a no-op: well-formed tags are never rewritten.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::crypto::aead::EncryptedPayload;
use crate::store::{MediaStore, PAYLOAD_EXT};
use crate::tag;

/// Summary of one migration sweep
#[derive(Debug, Default, Clone)]
pub struct MigrationReport {
    /// Payload files visited (media and previews)
    pub scanned: usize,
    /// Files that received a tag this run
    pub tagged: usize,
    /// Files whose tag was already present and well-formed
    pub already_tagged: usize,
    /// Unreadable or corrupted files left alone
    pub skipped: usize,
}

impl MigrationReport {
    pub fn changed_anything(&self) -> bool {
        self.tagged > 0
    }
}

/// Idempotent key-tag sweep over one album's store
pub struct KeyTagMigrator<'a> {
    store: &'a MediaStore,
}

impl<'a> KeyTagMigrator<'a> {
    pub fn new(store: &'a MediaStore) -> Self {
        Self { store }
    }

    /// Run the sweep. Requires a current key; per-file problems are logged
    /// and skipped, never fatal. Operates file-by-file with no global lock,
    /// so concurrent saves and loads on other files are unaffected.
    pub fn run(&self) -> StoreResult<MigrationReport> {
        let current = self
            .store
            .registry()
            .current_key()
            .ok_or(StoreError::MissingPrivateKey)?;

        let mut report = MigrationReport::default();

        for dir in [self.store.media_dir(), self.store.previews_dir()] {
            self.sweep_dir(&dir, current.id, &mut report);
        }

        log::info!(
            "key tag migration: {} scanned, {} tagged, {} already tagged, {} skipped",
            report.scanned,
            report.tagged,
            report.already_tagged,
            report.skipped
        );

        Ok(report)
    }

    fn sweep_dir(&self, dir: &Path, key_id: uuid::Uuid, report: &mut MigrationReport) {
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() || tag::is_tag_sidecar(path) {
                continue;
            }
            if path.extension().map_or(true, |ext| ext != PAYLOAD_EXT) {
                continue;
            }

            report.scanned += 1;

            if self.store.tagged_key_id(path).is_some() {
                report.already_tagged += 1;
                continue;
            }

            // Do not stamp files that are not actually our payloads
            match std::fs::read(path) {
                Ok(data) if EncryptedPayload::from_bytes(&data).is_ok() => {}
                Ok(_) => {
                    log::warn!("skipping corrupted payload {}", path.display());
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    log::warn!("skipping unreadable file {}: {}", path.display(), e);
                    report.skipped += 1;
                    continue;
                }
            }

            match tag::write_tag(path, key_id) {
                Ok(()) => report.tagged += 1,
                Err(e) => {
                    log::warn!("could not tag {}: {}", path.display(), e);
                    report.skipped += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::album::{AlbumManager, StorageOption};
    use crate::keychain::{FileSecretStore, Protection};
    use crate::keyring::KeyRegistry;
    use crate::media::CleartextMedia;
    use crate::prefs::PreferenceStore;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, Arc<KeyRegistry>, AlbumManager) {
        let dir = tempdir().unwrap();
        let prefs =
            Arc::new(PreferenceStore::open(&dir.path().join("prefs.json"), None).unwrap());
        let secrets =
            FileSecretStore::open(&dir.path().join("keys"), Protection::DeviceKey).unwrap();
        let registry = Arc::new(KeyRegistry::open(Box::new(secrets), prefs.clone()).unwrap());
        let albums = AlbumManager::new(prefs, registry.clone(), &dir.path().join("data"), None);
        (dir, registry, albums)
    }

    fn store(albums: &AlbumManager) -> MediaStore {
        let album = albums.create("migration-album", StorageOption::Local).unwrap();
        MediaStore::open(&album, albums).unwrap()
    }

    #[test]
    fn test_requires_current_key() {
        let (_dir, registry, albums) = setup();
        registry.create("main", true).unwrap();
        let store = store(&albums);
        registry.delete("main").unwrap();

        assert!(matches!(
            store.set_key_tag_for_existing_files(),
            Err(StoreError::MissingPrivateKey)
        ));
    }

    #[test]
    fn test_backfills_untagged_files() {
        let (_dir, registry, albums) = setup();
        let key = registry.create("main", true).unwrap();
        let store = store(&albums);

        let mut saved = Vec::new();
        for i in 0..3u8 {
            let file = store.save(&CleartextMedia::from_bytes(vec![i])).unwrap();
            tag::remove_tag(&file.path).unwrap();
            saved.push(file);
        }

        let report = store.set_key_tag_for_existing_files().unwrap();
        assert_eq!(report.tagged, 3);
        assert_eq!(report.already_tagged, 3); // previews kept their tags

        for file in &saved {
            assert_eq!(tag::read_tag(&file.path), Some(key.id));
        }
    }

    #[test]
    fn test_previews_are_swept_too() {
        let (_dir, registry, albums) = setup();
        let key = registry.create("main", true).unwrap();
        let store = store(&albums);

        let file = store.save(&CleartextMedia::from_bytes(b"img".to_vec())).unwrap();
        let preview_path = store.previews_dir().join(format!("{}.enc", file.id));
        tag::remove_tag(&preview_path).unwrap();

        store.set_key_tag_for_existing_files().unwrap();
        assert_eq!(tag::read_tag(&preview_path), Some(key.id));
    }

    #[test]
    fn test_second_run_is_noop() {
        let (_dir, registry, albums) = setup();
        registry.create("main", true).unwrap();
        let store = store(&albums);

        let file = store.save(&CleartextMedia::from_bytes(b"x".to_vec())).unwrap();
        tag::remove_tag(&file.path).unwrap();

        let first = store.set_key_tag_for_existing_files().unwrap();
        assert!(first.changed_anything());

        let second = store.set_key_tag_for_existing_files().unwrap();
        assert_eq!(second.tagged, 0);
        assert_eq!(second.already_tagged, first.scanned);
    }

    #[test]
    fn test_existing_tags_are_untouched() {
        let (_dir, registry, albums) = setup();
        let key_a = registry.create("A", true).unwrap();
        let store = store(&albums);

        // File tagged under A; switch current to B before the sweep
        let file = store.save(&CleartextMedia::from_bytes(b"keep".to_vec())).unwrap();
        registry.create("B", true).unwrap();

        store.set_key_tag_for_existing_files().unwrap();

        // Sweep under B must not rewrite A's tag
        assert_eq!(tag::read_tag(&file.path), Some(key_a.id));
    }

    #[test]
    fn test_corrupted_files_are_skipped() {
        let (_dir, registry, albums) = setup();
        registry.create("main", true).unwrap();
        let store = store(&albums);

        let garbage = store.media_dir().join("corrupt.enc");
        std::fs::write(&garbage, b"not a payload").unwrap();

        let untagged = store.save(&CleartextMedia::from_bytes(b"good".to_vec())).unwrap();
        tag::remove_tag(&untagged.path).unwrap();

        let report = store.set_key_tag_for_existing_files().unwrap();

        assert_eq!(report.skipped, 1);
        assert!(tag::read_tag(&garbage).is_none());
        // The valid file still got its tag
        assert!(tag::read_tag(&untagged.path).is_some());
    }

    #[test]
    fn test_malformed_tag_is_replaced() {
        let (_dir, registry, albums) = setup();
        let key = registry.create("main", true).unwrap();
        let store = store(&albums);

        let file = store.save(&CleartextMedia::from_bytes(b"x".to_vec())).unwrap();
        // Overwrite the tag with garbage of the wrong length
        std::fs::write(tag::tag_path(&file.path), b"bogus").unwrap();

        store.set_key_tag_for_existing_files().unwrap();
        assert_eq!(tag::read_tag(&file.path), Some(key.id));
    }
}
