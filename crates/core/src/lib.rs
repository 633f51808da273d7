//! Core library: configuration, input collection, tag reconciliation,
//! metadata I/O and batch orchestration.

pub mod config;
pub mod error;
pub mod exiftool;
pub mod formats;
pub mod image;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod reconcile;

pub use error::{CoreError, MetadataError};
pub use pipeline::{BatchOptions, Pipeline};
