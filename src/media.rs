//! Media models shared between the store and the import pipeline.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Media kind, sniffed from content where possible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Photo,
    Video,
    Unknown,
}

/// Where the cleartext bytes come from
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Already in memory (share-extension style input)
    Bytes(Vec<u8>),
    /// On disk, read lazily at encryption time
    Path(PathBuf),
}

/// A cleartext media item queued for encryption
#[derive(Debug, Clone)]
pub struct CleartextMedia {
    /// Stable identifier; becomes the encrypted file's stem
    pub id: String,
    pub source: MediaSource,
    pub media_type: MediaType,
}

impl CleartextMedia {
    /// Wrap in-memory bytes, sniffing the media type
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let media_type = sniff_media_type(&bytes);
        Self {
            id: Uuid::new_v4().to_string(),
            source: MediaSource::Bytes(bytes),
            media_type,
        }
    }

    /// Reference a file on disk; the type is sniffed when the bytes are read
    pub fn from_path(path: &Path) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: MediaSource::Path(path.to_path_buf()),
            media_type: MediaType::Unknown,
        }
    }

    /// Read the cleartext bytes, wherever they live
    pub fn read_bytes(&self) -> StoreResult<Vec<u8>> {
        match &self.source {
            MediaSource::Bytes(bytes) => Ok(bytes.clone()),
            MediaSource::Path(path) => {
                if !path.exists() {
                    return Err(StoreError::FileNotFound(path.display().to_string()));
                }
                Ok(std::fs::read(path)?)
            }
        }
    }

    /// Original file name, when the source has one
    pub fn file_name(&self) -> Option<String> {
        match &self.source {
            MediaSource::Bytes(_) => None,
            MediaSource::Path(path) => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|s| s.to_string()),
        }
    }
}

/// Handle to an encrypted payload on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMediaFile {
    /// Identifier derived from the file stem
    pub id: String,
    /// Full path to the payload
    pub path: PathBuf,
}

impl EncryptedMediaFile {
    pub fn new(id: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id: id.into(),
            path,
        }
    }

    /// Build a handle from an existing payload path
    pub fn from_path(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        Some(Self {
            id: stem.to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// Preview descriptor, JSON-encoded and stored as an encrypted sidecar
/// artifact next to each media payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewModel {
    pub id: String,
    pub file_name: Option<String>,
    pub byte_len: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// Detect the media type from magic bytes
pub fn sniff_media_type(data: &[u8]) -> MediaType {
    match detect_mime(data) {
        m if m.starts_with("image/") => MediaType::Photo,
        m if m.starts_with("video/") => MediaType::Video,
        _ => MediaType::Unknown,
    }
}

/// Detect a MIME type from file content
pub fn detect_mime(data: &[u8]) -> String {
    if data.len() < 8 {
        return "application/octet-stream".into();
    }

    match &data[0..8] {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg".into(),
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] => "image/png".into(),
        [0x47, 0x49, 0x46, 0x38, ..] => "image/gif".into(),
        [0x52, 0x49, 0x46, 0x46, ..] => {
            if data.len() > 12 && &data[8..12] == b"WEBP" {
                "image/webp".into()
            } else {
                "application/octet-stream".into()
            }
        }
        _ => {
            if data.len() > 12 && &data[4..8] == b"ftyp" {
                match &data[8..12] {
                    b"heic" | b"heix" => return "image/heic".into(),
                    b"mif1" => return "image/heif".into(),
                    b"isom" | b"mp41" | b"mp42" | b"qt  " => return "video/mp4".into(),
                    _ => {}
                }
            }
            "application/octet-stream".into()
        }
    }
}
