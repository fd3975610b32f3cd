//! Push / pull / acknowledge toward one rendering surface.
//!
//! The bridge owns the feedback-loop bookkeeping for its surface:
//!
//! - a push whose content equals what was just pulled is skipped (the surface
//!   already shows it)
//! - a pull equal to the last push, equal to the last committed pull, or
//!   arriving within the grace window after a push is not a user edit
//!
//! Pulls are two-phase: [`Bridge::pull`] classifies, and the caller
//! [`commit_pull`](Bridge::commit_pull)s once the edit is safely in the store.
//! An edit that could not be applied is therefore seen again on the next pull.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::SurfaceError;
use crate::position::LineCol;
use crate::state::{ContentState, WatchdogHook};
use crate::surface::{Acknowledger, Push, RenderSurface, SurfaceKind, ThemeVariables};

/// How a push ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// The surface confirmed the push.
    Acknowledged,
    /// The surface dropped the acknowledger without confirming.
    Dropped,
    /// No confirmation within the ack timeout.
    TimedOut,
    /// The watchdog resolved the wait.
    Forced,
    /// Nothing was sent: the surface already shows this content.
    Skipped,
}

impl AckOutcome {
    /// Whether the surface is known to show the pushed content.
    pub fn confirmed(self) -> bool {
        matches!(self, AckOutcome::Acknowledged | AckOutcome::Skipped)
    }
}

// ============================================================================
// AckRegistry
// ============================================================================

/// Lets the watchdog resolve every in-flight acknowledgement wait at once.
///
/// Waiters subscribe before they push, so a force that lands between the push
/// and the wait is not missed.
#[derive(Clone)]
pub struct AckRegistry {
    force: Arc<watch::Sender<u64>>,
}

impl AckRegistry {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { force: Arc::new(tx) }
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.force.subscribe()
    }

    /// Resolve all current waits with [`AckOutcome::Forced`].
    pub fn force_resolve_all(&self) {
        self.force.send_modify(|epoch| *epoch += 1);
    }
}

impl Default for AckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogHook for AckRegistry {
    fn on_watchdog_reset(&self, stuck: ContentState) {
        tracing::debug!(state = %stuck, "forcing pending acknowledgements");
        self.force_resolve_all();
    }
}

// ============================================================================
// Bridge
// ============================================================================

#[derive(Default)]
struct Tracker {
    last_pushed: Option<String>,
    last_push_at: Option<Instant>,
    last_pulled: Option<String>,
}

/// Bridge to one surface.
pub struct Bridge {
    surface: Arc<dyn RenderSurface>,
    tracker: Mutex<Tracker>,
    seq: AtomicU64,
    grace: Duration,
    ack_timeout: Duration,
    acks: AckRegistry,
}

impl Bridge {
    pub fn new(
        surface: Arc<dyn RenderSurface>,
        acks: AckRegistry,
        grace: Duration,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            surface,
            tracker: Mutex::new(Tracker::default()),
            seq: AtomicU64::new(0),
            grace,
            ack_timeout,
            acks,
        }
    }

    pub fn kind(&self) -> SurfaceKind {
        self.surface.kind()
    }

    pub fn surface(&self) -> &Arc<dyn RenderSurface> {
        &self.surface
    }

    /// Push `markdown` and wait for the surface to confirm it.
    pub async fn push_and_wait(&self, markdown: &str) -> Result<AckOutcome, SurfaceError> {
        {
            let tracker = self.tracker.lock();
            if tracker.last_pulled.as_deref() == Some(markdown) {
                tracing::debug!(surface = %self.kind(), "push skipped, surface already shows content");
                return Ok(AckOutcome::Skipped);
            }
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (ack, ack_rx) = Acknowledger::new(seq);
        let mut force_rx = self.acks.subscribe();
        force_rx.borrow_and_update();

        {
            let mut tracker = self.tracker.lock();
            tracker.last_pushed = Some(markdown.to_string());
            tracker.last_push_at = Some(Instant::now());
            tracker.last_pulled = None;
        }
        tracing::debug!(surface = %self.kind(), seq, bytes = markdown.len(), "push");
        self.surface
            .set_content(Push {
                seq,
                markdown: markdown.to_string(),
                ack,
            })
            .await?;

        let outcome = tokio::select! {
            acked = ack_rx => match acked {
                Ok(_) => AckOutcome::Acknowledged,
                Err(_) => {
                    tracing::warn!(surface = %self.kind(), seq, "acknowledger dropped without confirming");
                    AckOutcome::Dropped
                }
            },
            _ = force_rx.changed() => AckOutcome::Forced,
            _ = tokio::time::sleep(self.ack_timeout) => {
                tracing::warn!(surface = %self.kind(), seq, timeout = ?self.ack_timeout, "acknowledgement timed out");
                AckOutcome::TimedOut
            }
        };
        tracing::debug!(surface = %self.kind(), seq, ?outcome, "push settled");
        Ok(outcome)
    }

    /// Read the surface and classify. `Some` is a user edit that still needs
    /// [`commit_pull`](Self::commit_pull).
    pub async fn pull(&self) -> Result<Option<String>, SurfaceError> {
        let content = self.surface.get_content().await?;
        let tracker = self.tracker.lock();
        if tracker.last_pushed.as_deref() == Some(content.as_str()) {
            return Ok(None);
        }
        if tracker.last_pulled.as_deref() == Some(content.as_str()) {
            return Ok(None);
        }
        if tracker
            .last_push_at
            .is_some_and(|at| at.elapsed() < self.grace)
        {
            tracing::debug!(surface = %self.kind(), "pull inside grace window ignored");
            return Ok(None);
        }
        tracing::debug!(surface = %self.kind(), bytes = content.len(), "pulled user edit");
        Ok(Some(content))
    }

    /// Record `content` as applied.
    pub fn commit_pull(&self, content: &str) {
        self.tracker.lock().last_pulled = Some(content.to_string());
    }

    pub async fn cursor_position(&self) -> Result<LineCol, SurfaceError> {
        self.surface.cursor_position().await
    }

    pub async fn set_cursor_position(&self, position: LineCol) -> Result<(), SurfaceError> {
        self.surface.set_cursor_position(position).await
    }

    pub async fn set_theme(&self, theme: &ThemeVariables) -> Result<(), SurfaceError> {
        self.surface.set_theme(theme).await
    }
}
