//! Session notifications.
//!
//! Broadcast to any number of UI collaborators via
//! [`DocumentSession::subscribe`](crate::DocumentSession::subscribe). Slow
//! receivers lag and skip; the session never blocks on them.

use std::sync::Arc;

use quire_blocks::Section;
use quire_types::BlockId;

use crate::state::ContentState;
use crate::surface::SurfaceKind;

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The active surface changed.
    ModeToggleRequested { from: SurfaceKind, to: SurfaceKind },
    /// The full document is back on the surface after a zoom.
    ZoomOutCompleted { anchor: Option<BlockId> },
    /// Fresh outline. Only published while idle.
    SectionsUpdated {
        sections: Arc<Vec<Section>>,
        version: u64,
    },
    StateChanged {
        from: ContentState,
        to: ContentState,
    },
    /// The watchdog forced `state` back to idle.
    WatchdogReset { state: ContentState },
}
