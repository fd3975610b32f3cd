//! Rendering surfaces.
//!
//! A surface is an external editor the session pushes projections into and
//! pulls user edits out of: the tree (rich-text) view or the flat (source)
//! view. The session talks to both through [`RenderSurface`].
//!
//! A push carries an [`Acknowledger`]; the surface calls
//! [`Acknowledger::ack`] once the content is actually on screen. Dropping it
//! without acking is reported as [`AckOutcome::Dropped`](crate::AckOutcome).

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::oneshot;

use crate::SurfaceError;
use crate::position::LineCol;

/// Which view a surface is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    /// Tree-structured rich-text view.
    Tree,
    /// Flat markdown source view.
    Flat,
}

impl SurfaceKind {
    pub fn other(self) -> Self {
        match self {
            SurfaceKind::Tree => SurfaceKind::Flat,
            SurfaceKind::Flat => SurfaceKind::Tree,
        }
    }
}

/// One-shot confirmation that a push landed.
#[derive(Debug)]
pub struct Acknowledger {
    seq: u64,
    tx: oneshot::Sender<u64>,
}

impl Acknowledger {
    pub(crate) fn new(seq: u64) -> (Self, oneshot::Receiver<u64>) {
        let (tx, rx) = oneshot::channel();
        (Self { seq, tx }, rx)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Confirm the push. The waiter may already be gone; that's fine.
    pub fn ack(self) {
        let _ = self.tx.send(self.seq);
    }
}

/// Content sent to a surface.
#[derive(Debug)]
pub struct Push {
    pub seq: u64,
    pub markdown: String,
    pub ack: Acknowledger,
}

/// CSS-style theme variables forwarded to surfaces.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThemeVariables(pub BTreeMap<String, String>);

impl ThemeVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Content statistics reported by a surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceStats {
    pub words: usize,
    pub characters: usize,
    pub lines: usize,
}

impl SurfaceStats {
    pub fn of(text: &str) -> Self {
        Self {
            words: text.split_whitespace().count(),
            characters: text.chars().count(),
            lines: text.lines().count(),
        }
    }
}

/// An external editor the session can push to and pull from.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    fn kind(&self) -> SurfaceKind;

    /// Replace the displayed content.
    async fn set_content(&self, push: Push) -> Result<(), SurfaceError>;

    /// Current content as markdown.
    async fn get_content(&self) -> Result<String, SurfaceError>;

    /// Cursor in markdown line/column coordinates.
    async fn cursor_position(&self) -> Result<LineCol, SurfaceError>;

    async fn set_cursor_position(&self, position: LineCol) -> Result<(), SurfaceError>;

    async fn set_theme(&self, theme: &ThemeVariables) -> Result<(), SurfaceError>;

    async fn stats(&self) -> Result<SurfaceStats, SurfaceError>;
}

// ============================================================================
// MemorySurface
// ============================================================================

/// How a [`MemorySurface`] acknowledges pushes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Ack as soon as the content is stored.
    #[default]
    Immediate,
    /// Hold acks until [`MemorySurface::release_acks`].
    Deferred,
    /// Hold acks forever (a surface that never confirms).
    Never,
}

#[derive(Default)]
struct MemoryState {
    content: String,
    cursor: LineCol,
    theme: ThemeVariables,
    pushes: Vec<u64>,
    pending: Vec<Acknowledger>,
    closed: bool,
}

/// In-memory surface for tests and the CLI.
pub struct MemorySurface {
    kind: SurfaceKind,
    ack_mode: Mutex<AckMode>,
    normalize: bool,
    state: Mutex<MemoryState>,
}

impl MemorySurface {
    pub fn new(kind: SurfaceKind) -> Self {
        Self {
            kind,
            ack_mode: Mutex::new(AckMode::Immediate),
            normalize: false,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_ack_mode(self, mode: AckMode) -> Self {
        *self.ack_mode.lock() = mode;
        self
    }

    /// Rewrite pushed content the way a renderer would (trailing whitespace
    /// trimmed, runs of blank lines collapsed).
    pub fn normalizing(mut self) -> Self {
        self.normalize = true;
        self
    }

    pub fn set_ack_mode(&self, mode: AckMode) {
        *self.ack_mode.lock() = mode;
    }

    /// Simulate the user replacing the content.
    pub fn type_text(&self, content: impl Into<String>) {
        self.state.lock().content = content.into();
    }

    /// Simulate the user moving the cursor.
    pub fn move_cursor(&self, position: LineCol) {
        self.state.lock().cursor = position;
    }

    pub fn content(&self) -> String {
        self.state.lock().content.clone()
    }

    pub fn cursor(&self) -> LineCol {
        self.state.lock().cursor
    }

    pub fn theme(&self) -> ThemeVariables {
        self.state.lock().theme.clone()
    }

    /// Sequence numbers of every push received.
    pub fn pushes(&self) -> Vec<u64> {
        self.state.lock().pushes.clone()
    }

    /// Ack everything held back. Returns how many were released.
    pub fn release_acks(&self) -> usize {
        let pending = std::mem::take(&mut self.state.lock().pending);
        let n = pending.len();
        for ack in pending {
            ack.ack();
        }
        n
    }

    /// Drop held acks without confirming them.
    pub fn drop_acks(&self) -> usize {
        let pending = std::mem::take(&mut self.state.lock().pending);
        pending.len()
    }

    /// Make every further call fail with [`SurfaceError::Closed`].
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    fn check_open(&self, state: &MemoryState) -> Result<(), SurfaceError> {
        if state.closed {
            Err(SurfaceError::Closed(self.kind))
        } else {
            Ok(())
        }
    }
}

fn normalize(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut blank_run = 0;
    for line in markdown.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[async_trait]
impl RenderSurface for MemorySurface {
    fn kind(&self) -> SurfaceKind {
        self.kind
    }

    async fn set_content(&self, push: Push) -> Result<(), SurfaceError> {
        let mode = *self.ack_mode.lock();
        let mut state = self.state.lock();
        self.check_open(&state)?;
        state.content = if self.normalize {
            normalize(&push.markdown)
        } else {
            push.markdown
        };
        state.pushes.push(push.seq);
        match mode {
            AckMode::Immediate => push.ack.ack(),
            AckMode::Deferred | AckMode::Never => state.pending.push(push.ack),
        }
        Ok(())
    }

    async fn get_content(&self) -> Result<String, SurfaceError> {
        let state = self.state.lock();
        self.check_open(&state)?;
        Ok(state.content.clone())
    }

    async fn cursor_position(&self) -> Result<LineCol, SurfaceError> {
        let state = self.state.lock();
        self.check_open(&state)?;
        Ok(state.cursor)
    }

    async fn set_cursor_position(&self, position: LineCol) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        state.cursor = position;
        Ok(())
    }

    async fn set_theme(&self, theme: &ThemeVariables) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        state.theme = theme.clone();
        Ok(())
    }

    async fn stats(&self) -> Result<SurfaceStats, SurfaceError> {
        let state = self.state.lock();
        self.check_open(&state)?;
        Ok(SurfaceStats::of(&state.content))
    }
}
