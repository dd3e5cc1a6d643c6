//! Albums: named collections of encrypted media, each bound to a key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::keyring::KeyRegistry;
use crate::prefs::{PrefKey, PreferenceStore};

/// Where an album's files live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageOption {
    Local,
    Cloud,
}

/// An album record.
///
/// `key_name` records the key the album was created under; the key itself is
/// always resolved through the registry so key material has a single owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: Uuid,
    pub name: String,
    pub storage: StorageOption,
    pub created_at: DateTime<Utc>,
    pub key_name: String,
}

/// Creates and resolves albums; persists records through the preference
/// store and maps each album to its storage root.
pub struct AlbumManager {
    prefs: Arc<PreferenceStore>,
    registry: Arc<KeyRegistry>,
    local_root: PathBuf,
    cloud_root: Option<PathBuf>,
}

impl AlbumManager {
    /// `cloud_root` points at a synced volume for Cloud albums; when absent,
    /// Cloud albums fall back to the local root.
    pub fn new(
        prefs: Arc<PreferenceStore>,
        registry: Arc<KeyRegistry>,
        local_root: &Path,
        cloud_root: Option<PathBuf>,
    ) -> Self {
        Self {
            prefs,
            registry,
            local_root: local_root.to_path_buf(),
            cloud_root,
        }
    }

    /// Create an album bound to the registry's current key
    pub fn create(&self, name: &str, storage: StorageOption) -> StoreResult<Album> {
        let key = self
            .registry
            .current_key()
            .ok_or(StoreError::MissingPrivateKey)?;

        let album = Album {
            id: Uuid::new_v4(),
            name: name.to_string(),
            storage,
            created_at: Utc::now(),
            key_name: key.name,
        };

        let mut records = self.prefs.dictionary(PrefKey::Albums).unwrap_or_default();
        records.insert(album.id.to_string(), serde_json::to_value(&album)?);
        self.prefs.set_dictionary(PrefKey::Albums, records)?;

        std::fs::create_dir_all(self.storage_root(&album))?;

        log::info!("created album '{}' ({})", album.name, album.id);
        Ok(album)
    }

    /// All known albums, oldest first
    pub fn albums(&self) -> Vec<Album> {
        let records = self.prefs.dictionary(PrefKey::Albums).unwrap_or_default();
        let mut albums: Vec<Album> = records
            .values()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();
        albums.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        albums
    }

    pub fn find(&self, id: Uuid) -> Option<Album> {
        let records = self.prefs.dictionary(PrefKey::Albums)?;
        let value = records.get(&id.to_string())?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Album> {
        self.albums().into_iter().find(|a| a.name == name)
    }

    /// Remove the album record. Media under its storage root is untouched;
    /// use the store's `delete_all` first when the files should go too.
    pub fn remove(&self, id: Uuid) -> StoreResult<()> {
        let mut records = self.prefs.dictionary(PrefKey::Albums).unwrap_or_default();
        if records.remove(&id.to_string()).is_none() {
            return Err(StoreError::AlbumNotFound(id.to_string()));
        }
        self.prefs.set_dictionary(PrefKey::Albums, records)?;
        Ok(())
    }

    /// Storage root for an album's payloads and sidecars
    pub fn storage_root(&self, album: &Album) -> PathBuf {
        let base = match album.storage {
            StorageOption::Local => &self.local_root,
            StorageOption::Cloud => self.cloud_root.as_ref().unwrap_or(&self.local_root),
        };
        base.join("albums").join(album.id.to_string())
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.prefs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keychain::{FileSecretStore, Protection};
    use tempfile::tempdir;

    fn manager(dir: &Path) -> AlbumManager {
        let prefs = Arc::new(PreferenceStore::open(&dir.join("prefs.json"), None).unwrap());
        let secrets = FileSecretStore::open(&dir.join("keys"), Protection::DeviceKey).unwrap();
        let registry = Arc::new(KeyRegistry::open(Box::new(secrets), prefs.clone()).unwrap());
        AlbumManager::new(prefs, registry, &dir.join("data"), Some(dir.join("cloud")))
    }

    #[test]
    fn test_create_requires_current_key() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        assert!(matches!(
            mgr.create("holidays", StorageOption::Local),
            Err(StoreError::MissingPrivateKey)
        ));
    }

    #[test]
    fn test_create_find_remove() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.registry().create("main", true).unwrap();

        let album = mgr.create("holidays", StorageOption::Local).unwrap();
        assert_eq!(album.key_name, "main");
        assert!(mgr.storage_root(&album).exists());

        assert_eq!(mgr.find(album.id).unwrap().name, "holidays");
        assert_eq!(mgr.find_by_name("holidays").unwrap().id, album.id);
        assert_eq!(mgr.albums().len(), 1);

        mgr.remove(album.id).unwrap();
        assert!(mgr.find(album.id).is_none());
        assert!(matches!(
            mgr.remove(album.id),
            Err(StoreError::AlbumNotFound(_))
        ));
    }

    #[test]
    fn test_storage_roots_split_by_option() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.registry().create("main", true).unwrap();

        let local = mgr.create("local-album", StorageOption::Local).unwrap();
        let cloud = mgr.create("cloud-album", StorageOption::Cloud).unwrap();

        assert!(mgr.storage_root(&local).starts_with(dir.path().join("data")));
        assert!(mgr.storage_root(&cloud).starts_with(dir.path().join("cloud")));
    }
}
