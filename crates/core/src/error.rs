use std::path::PathBuf;
use thiserror::Error;

/// Failures from the metadata tool boundary.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to start exiftool ({program}): {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("exiftool worker io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("exiftool worker is shut down")]
    ShutDown,
    #[error("failed to read metadata: {0}")]
    Read(String),
    #[error("failed to write metadata: {0}")]
    Write(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration file does not exist: {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("configuration file format error: {0}")]
    ConfigFormat(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("specified path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("invalid exclude pattern: {0}")]
    ExcludePattern(#[from] globset::Error),
    #[error("no supported image files found")]
    NoImageFiles,
    #[error("file does not exist")]
    FileNotFound,
    #[error("file too large ({size_mb:.1}MB), maximum supported size is {limit_mb}MB")]
    FileTooLarge { size_mb: f64, limit_mb: u64 },
    #[error("failed to prepare image for AI: {0}")]
    ImageLoad(String),
    #[error(transparent)]
    Provider(#[from] providers::ProviderError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Errors that abort a run before any file is touched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::ConfigNotFound(_)
                | CoreError::ConfigFormat(_)
                | CoreError::InvalidConfig(_)
                | CoreError::DirectoryNotFound(_)
                | CoreError::NotADirectory(_)
                | CoreError::ExcludePattern(_)
                | CoreError::NoImageFiles
        )
    }
}
