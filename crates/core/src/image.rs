//! Preparing image bytes for the vision model.

use crate::error::CoreError;
use crate::metadata::MetadataStore;
use std::path::Path;
use tracing::debug;

/// Embedded JPEG previews, most detailed first.
pub const PREVIEW_TAGS: [&str; 3] = ["PreviewImage", "JpgFromRaw", "ThumbnailImage"];

const RAW_EXTENSIONS: &[&str] = &[
    "nef", "raf", "cr2", "cr3", "arw", "dng", "raw", "orf", "rw2", "pef", "srw",
];
const HEIC_EXTENSIONS: &[&str] = &["heic", "heif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Standard,
    Raw,
    Heic,
}

impl ImageKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if RAW_EXTENSIONS.contains(&ext.as_str()) {
            ImageKind::Raw
        } else if HEIC_EXTENSIONS.contains(&ext.as_str()) {
            ImageKind::Heic
        } else {
            ImageKind::Standard
        }
    }
}

/// Fails when the file is gone or larger than `limit_mb`. Returns the size in bytes.
pub async fn check_file(path: &Path, limit_mb: u64) -> Result<u64, CoreError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Err(CoreError::FileNotFound),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(CoreError::FileNotFound),
        Err(e) => return Err(e.into()),
    };
    let size = meta.len();
    if size > limit_mb.saturating_mul(1024 * 1024) {
        return Err(CoreError::FileTooLarge {
            size_mb: size as f64 / (1024.0 * 1024.0),
            limit_mb,
        });
    }
    Ok(size)
}

pub async fn load_for_ai(path: &Path, metadata: &dyn MetadataStore) -> Result<Vec<u8>, CoreError> {
    match ImageKind::from_path(path) {
        ImageKind::Standard => Ok(tokio::fs::read(path).await?),
        ImageKind::Raw => embedded_preview(path, metadata).await?.ok_or_else(|| {
            CoreError::ImageLoad("RAW file has no embedded preview image".into())
        }),
        ImageKind::Heic => match embedded_preview(path, metadata).await? {
            Some(bytes) => Ok(bytes),
            None => {
                debug!(path = %path.display(), "no HEIC preview, sending original bytes");
                Ok(tokio::fs::read(path).await?)
            }
        },
    }
}

async fn embedded_preview(
    path: &Path,
    metadata: &dyn MetadataStore,
) -> Result<Option<Vec<u8>>, CoreError> {
    for tag in PREVIEW_TAGS {
        match metadata.extract_binary_tag(path, tag).await {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                debug!(path = %path.display(), tag, bytes = bytes.len(), "using embedded preview");
                return Ok(Some(bytes));
            }
            Ok(_) => continue,
            Err(e) => debug!(path = %path.display(), tag, error = %e, "preview extraction failed"),
        }
    }
    Ok(None)
}
