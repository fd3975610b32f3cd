//! Session layer for Quire: keeps two editing surfaces and the block store in
//! step.
//!
//! A [`DocumentSession`] owns one document's [`BlockStore`](quire_blocks::BlockStore)
//! and two [`RenderSurface`]s (the tree view and the flat markdown view).
//! Only one surface is active at a time. The session pushes a projection of
//! the store to it (either the whole document or a zoomed section) and pulls
//! user edits back.
//!
//! Every multi-step operation runs under a [`ContentState`] claimed from the
//! [`StateMachine`]. A watchdog forces a stuck state back to idle, resolving
//! pending acknowledgements and parking any active zoom so no edit is lost.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn demo() -> Result<(), quire_sync::SyncError> {
//! use std::sync::Arc;
//! use quire_sync::{DocumentSession, MemoryRepository, MemorySurface, SurfaceKind, SyncConfig};
//! use quire_types::DocumentId;
//!
//! let config = SyncConfig::default();
//! let doc = DocumentId::new();
//! let repo = Arc::new(MemoryRepository::with_markdown(doc, "# Hello\n", &config.parse_options()));
//! let session = DocumentSession::open(
//!     doc,
//!     repo,
//!     Arc::new(MemorySurface::new(SurfaceKind::Tree)),
//!     Arc::new(MemorySurface::new(SurfaceKind::Flat)),
//!     config,
//! )
//! .await?;
//! let poller = session.spawn_poller();
//! # poller.abort();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod position;
pub mod repository;
pub mod session;
pub mod state;
pub mod surface;

pub use bridge::{AckOutcome, AckRegistry, Bridge};
pub use config::SyncConfig;
pub use error::{ConfigError, RepositoryError, SurfaceError, SyncError};
pub use events::SessionEvent;
pub use position::{LineCol, PositionMap};
pub use repository::{BlockRepository, MemoryRepository};
pub use session::{DocumentSession, FlushOutcome, ZoomOutcome};
pub use state::{Busy, ContentState, StateMachine, Transition, WatchdogHook};
pub use surface::{
    AckMode, Acknowledger, MemorySurface, Push, RenderSurface, SurfaceKind, SurfaceStats,
    ThemeVariables,
};

// Re-exported so callers can name zoom modes without depending on quire-blocks.
pub use quire_blocks::{Section, ZoomMode, ZoomScope};

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SyncError>;
