//! Import task record.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::progress::{ImportProgressUpdate, ImportTaskState};
use crate::media::CleartextMedia;

/// A per-item failure carried in the task result, never thrown
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub media_id: String,
    pub reason: String,
}

/// One batch-import run, owned by the import manager for its lifetime
#[derive(Debug, Clone)]
pub struct ImportTask {
    pub id: String,
    pub media: Vec<CleartextMedia>,
    pub album_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub progress: ImportProgressUpdate,
    /// External source identifiers (e.g. photo-library asset ids)
    pub asset_identifiers: Vec<String>,
    /// Items that failed individually while the batch continued
    pub failed_items: Vec<FailedItem>,
}

impl ImportTask {
    pub fn new(
        media: Vec<CleartextMedia>,
        album_id: Uuid,
        asset_identifiers: Vec<String>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let total = media.len();
        Self {
            id: id.clone(),
            media,
            album_id,
            created_at: Utc::now(),
            progress: ImportProgressUpdate::initial(&id, total, ImportTaskState::Idle),
            asset_identifiers,
            failed_items: Vec::new(),
        }
    }

    pub fn state(&self) -> &ImportTaskState {
        &self.progress.state
    }
}
