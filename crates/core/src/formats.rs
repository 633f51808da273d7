//! Format filter and input collection.
//!
//! Turns a directory or an explicit file list into the ordered list of image
//! paths the pipeline will process.

use crate::config::normalize_formats;
use crate::error::CoreError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct FormatFilter {
    formats: Vec<String>,
}

impl FormatFilter {
    pub fn new(formats: &[String]) -> Self {
        Self {
            formats: normalize_formats(formats),
        }
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .map(|ext| self.formats.iter().any(|f| *f == ext))
            .unwrap_or(false)
    }

    pub fn filter_supported(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        paths
            .iter()
            .filter(|p| self.is_supported(p))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum InputSource {
    Directory(PathBuf),
    Files(Vec<PathBuf>),
}

/// Resolves the input into a sorted, de-duplicated list of supported images.
/// An empty result is fatal.
pub fn collect_inputs(
    source: &InputSource,
    filter: &FormatFilter,
    recursive: bool,
    excludes: &[String],
) -> Result<Vec<PathBuf>, CoreError> {
    let exclude_set = build_globset(excludes)?;
    let files: BTreeSet<PathBuf> = match source {
        InputSource::Directory(dir) => walk_dir(dir, filter, recursive, &exclude_set)?,
        InputSource::Files(paths) => filter
            .filter_supported(paths)
            .into_iter()
            .filter(|p| !is_excluded(p, &exclude_set))
            .collect(),
    };
    if files.is_empty() {
        return Err(CoreError::NoImageFiles);
    }
    Ok(files.into_iter().collect())
}

fn walk_dir(
    dir: &Path,
    filter: &FormatFilter,
    recursive: bool,
    exclude_set: &GlobSet,
) -> Result<BTreeSet<PathBuf>, CoreError> {
    if !dir.exists() {
        return Err(CoreError::DirectoryNotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(CoreError::NotADirectory(dir.to_path_buf()));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut found = BTreeSet::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), exclude_set))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_file() && filter.is_supported(path) {
            found.insert(path.to_path_buf());
        }
    }
    Ok(found)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, CoreError> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

fn should_descend(path: &Path, excludes: &GlobSet) -> bool {
    !is_excluded(path, excludes) && !is_hidden(path)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
        || path
            .file_name()
            .map(|name| excludes.is_match(Path::new(name)))
            .unwrap_or(false)
}
