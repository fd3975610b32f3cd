//! Sync configuration constants.
//!
//! Centralizes the default timings; [`SyncConfig`](crate::SyncConfig) starts
//! from these and may override any of them.

use std::time::Duration;

/// How long a non-idle state may last before the watchdog forces it back to
/// idle.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(5);

/// How long a push waits for the surface to acknowledge it.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Content pulled within this window after a push is treated as the surface
/// settling, not as a user edit.
pub const DEFAULT_PULL_GRACE: Duration = Duration::from_millis(300);

/// Debounce for re-parsing after the surface reports a change.
pub const DEFAULT_REPARSE_DEBOUNCE: Duration = Duration::from_millis(400);

/// Poll interval for surfaces that cannot push change notifications.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Broadcast channel capacity for session events.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Title of the bibliography heading created when a document has none.
pub const DEFAULT_BIBLIOGRAPHY_HEADING: &str = "References";
