//! Error types for the sync layer.

use std::path::PathBuf;

use quire_blocks::StoreError;
use quire_types::{BlockId, DocumentId};
use thiserror::Error;

use crate::state::{Busy, ContentState};
use crate::surface::SurfaceKind;

/// Errors from a rendering surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("{0} surface is closed")]
    Closed(SurfaceKind),
    #[error("{kind} surface rejected the request: {reason}")]
    Rejected { kind: SurfaceKind, reason: String },
}

/// Errors from a block repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("document not found: {0}")]
    NotFound(DocumentId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("repository backend error: {0}")]
    Backend(String),
}

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid pseudo-section pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Session-level errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Another transition is in flight; the request was not started.
    #[error("busy: {0} in progress")]
    Busy(ContentState),

    /// Zoom-out requested with no active zoom.
    #[error("not zoomed")]
    NotZoomed,

    /// Operation not allowed while zoomed.
    #[error("not allowed while zoomed")]
    ZoomActive,

    #[error("section not found: {0}")]
    SectionNotFound(BlockId),

    #[error("invalid move: {0}")]
    InvalidMove(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<Busy> for SyncError {
    fn from(busy: Busy) -> Self {
        SyncError::Busy(busy.0)
    }
}
