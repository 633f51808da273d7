//! Boundary to the external metadata tool.

use crate::error::MetadataError;
use crate::reconcile::{TagSnapshot, WriteSet};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Edit the file in place instead of leaving an `_original` backup.
    pub in_place: bool,
}

/// File counts reported by the tool for one write, plus its warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub warnings: Vec<String>,
}

/// Reads and writes named tags on image files.
///
/// Implementations hold one long-lived worker: `init` starts it, `shutdown`
/// releases it, and every other call fails with
/// [`MetadataError::ShutDown`] afterwards.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn init(&self) -> Result<(), MetadataError>;

    async fn shutdown(&self) -> Result<(), MetadataError>;

    /// Current values of `tags` on `path`. Missing tags are absent from the map.
    async fn read_tags(&self, path: &Path, tags: &[String]) -> Result<TagSnapshot, MetadataError>;

    async fn write_tags(
        &self,
        path: &Path,
        values: &WriteSet,
        opts: WriteOptions,
    ) -> Result<WriteReport, MetadataError>;

    /// Raw bytes of a binary tag such as an embedded preview, if present.
    async fn extract_binary_tag(
        &self,
        path: &Path,
        tag: &str,
    ) -> Result<Option<Vec<u8>>, MetadataError>;
}
