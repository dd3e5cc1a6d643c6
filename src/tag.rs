//! Key tag metadata channel.
//!
//! Each ciphertext file carries the 16-byte id of the key that encrypted it,
//! stored out-of-band in a co-located sidecar file (`<payload>.keytag`) so it
//! survives independently of the payload bytes. An absent sidecar reads as
//! "not set"; content of any other length is malformed and treated as absent.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::StoreResult;
use crate::secure_fs;

/// Sidecar extension appended to the payload path
const TAG_SUFFIX: &str = "keytag";

/// Tag payload size: a raw UUID
const TAG_LEN: usize = 16;

/// Sidecar path for a payload
pub fn tag_path(payload: &Path) -> PathBuf {
    let mut name = payload
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(TAG_SUFFIX);
    payload.with_file_name(name)
}

/// True for key tag sidecar files; enumeration and migration skip these
pub fn is_tag_sidecar(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == TAG_SUFFIX)
}

/// Write the key tag for a payload file (atomic replace)
pub fn write_tag(payload: &Path, key_id: Uuid) -> StoreResult<()> {
    secure_fs::write_atomic(&tag_path(payload), key_id.as_bytes())
}

/// Read the key tag for a payload file.
///
/// Returns `None` when the tag is absent or malformed — both fall back to
/// the current key at decrypt time rather than failing.
pub fn read_tag(payload: &Path) -> Option<Uuid> {
    let path = tag_path(payload);
    let data = std::fs::read(&path).ok()?;

    if data.len() != TAG_LEN {
        log::warn!(
            "malformed key tag on {} ({} bytes), treating as absent",
            payload.display(),
            data.len()
        );
        return None;
    }

    let bytes: [u8; TAG_LEN] = data.try_into().ok()?;
    Some(Uuid::from_bytes(bytes))
}

/// Remove the key tag for a payload file, if present
pub fn remove_tag(payload: &Path) -> StoreResult<()> {
    let path = tag_path(payload);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// Copy the tag from one payload to another, verbatim.
///
/// A source without a tag leaves the destination untagged; the destination
/// then resolves through the current-key fallback like any legacy file.
pub fn copy_tag(src_payload: &Path, dst_payload: &Path) -> StoreResult<()> {
    let src = tag_path(src_payload);
    if !src.exists() {
        return Ok(());
    }
    let data = std::fs::read(&src)?;
    secure_fs::write_atomic(&tag_path(dst_payload), &data)
}
