//! Document session: the state machine, the store and both surfaces.
//!
//! ```text
//!               ┌──────────────── DocumentSession ────────────────┐
//!   tree view ◀─┤ Bridge ◀─┐                                      │
//!               │          ├── projection ◀── BlockStore ◀─┐      │
//!   flat view ◀─┤ Bridge ◀─┘   (zoom buffer   (Mutex)      │      │
//!               │              or full doc)                │      │
//!               │   pull ──▶ apply_edit ───────────────────┘      │
//!               │                                                 │
//!               │   StateMachine ── watchdog ──▶ ZoomTracker      │
//!               │                             └▶ AckRegistry      │
//!               └──────────────────────────┬──────────────────────┘
//!                                          ▼
//!                               BlockRepository / SessionEvent
//! ```
//!
//! Every operation that awaits claims a [`ContentState`] first, flushes the
//! active surface into the store, mutates, pushes the new projection and
//! releases. The store mutex is never held across an `.await`.

use std::sync::Arc;

use parking_lot::Mutex;
use quire_blocks::{
    BlockStore, ParseOptions, PseudoSectionMatcher, Section, ZoomMode, ZoomScope, build_outline,
    enforce_levels, extract, flush_zoomed, render_scope, scope_range,
};
use quire_types::{Block, BlockId, DocumentId, ManagedRegion};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bridge::{AckOutcome, AckRegistry, Bridge};
use crate::config::SyncConfig;
use crate::constants::DEFAULT_BIBLIOGRAPHY_HEADING;
use crate::events::SessionEvent;
use crate::position::PositionMap;
use crate::repository::BlockRepository;
use crate::state::{ContentState, StateMachine, Transition, WatchdogHook};
use crate::surface::{RenderSurface, SurfaceKind, ThemeVariables};
use crate::SyncError;

/// Result of a zoom request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoomOutcome {
    /// The section buffer is on the active surface.
    Zoomed { anchor: BlockId, ack: AckOutcome },
    /// The full document is back on the active surface.
    ZoomedOut { ack: AckOutcome },
    /// The target section no longer exists; nothing is zoomed.
    TargetMissing,
    /// The watchdog reset the transition before the push settled. The
    /// surface may show the section buffer, but the zoom is parked: the next
    /// edit merges into its range and the full document comes back.
    Parked { anchor: BlockId },
}

/// Result of a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The surface holds nothing new.
    Unchanged,
    /// A transition is in flight; the edit is picked up by it or a later poll.
    Deferred,
    /// An edit was merged into the store.
    Applied { zoom_ended: bool },
}

// ============================================================================
// Zoom bookkeeping
// ============================================================================

/// Active zoom scope, plus a scope orphaned by a watchdog reset.
///
/// After a reset the surface may still show the zoom buffer; the orphan lets
/// the next pulled edit land in the range it came from instead of replacing
/// the whole document.
#[derive(Default)]
struct ZoomTracker {
    active: Mutex<Option<ZoomScope>>,
    orphaned: Mutex<Option<ZoomScope>>,
}

impl ZoomTracker {
    fn active(&self) -> Option<ZoomScope> {
        self.active.lock().clone()
    }

    fn is_engaged(&self) -> bool {
        self.active.lock().is_some() || self.orphaned.lock().is_some()
    }

    fn set(&self, scope: ZoomScope) {
        *self.active.lock() = Some(scope);
        *self.orphaned.lock() = None;
    }

    /// Clear everything; returns the anchor of whatever was zoomed.
    fn clear(&self) -> Option<BlockId> {
        let active = self.active.lock().take();
        let orphan = self.orphaned.lock().take();
        active.or(orphan).map(|s| s.anchor)
    }

    fn take_orphan(&self) -> Option<ZoomScope> {
        self.orphaned.lock().take()
    }
}

impl WatchdogHook for ZoomTracker {
    fn on_watchdog_reset(&self, stuck: ContentState) {
        let taken = self.active.lock().take();
        if let Some(scope) = taken {
            tracing::warn!(state = %stuck, anchor = %scope.anchor, "zoom state cleared by watchdog");
            *self.orphaned.lock() = Some(scope);
        }
    }
}

struct EventHook(broadcast::Sender<SessionEvent>);

impl WatchdogHook for EventHook {
    fn on_watchdog_reset(&self, stuck: ContentState) {
        let _ = self.0.send(SessionEvent::WatchdogReset { state: stuck });
        let _ = self.0.send(SessionEvent::StateChanged {
            from: stuck,
            to: ContentState::Idle,
        });
    }
}

// ============================================================================
// DocumentSession
// ============================================================================

#[derive(Default)]
struct Applied {
    zoom_ended: Option<BlockId>,
    needs_full_push: bool,
}

struct Inner {
    document_id: DocumentId,
    config: SyncConfig,
    matcher: PseudoSectionMatcher,
    parse_opts: ParseOptions,
    store: Mutex<BlockStore>,
    machine: StateMachine,
    zoom: Arc<ZoomTracker>,
    tree: Bridge,
    flat: Bridge,
    active: Mutex<SurfaceKind>,
    events: broadcast::Sender<SessionEvent>,
    repository: Arc<dyn BlockRepository>,
    reparse: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap-to-clone handle to one open document.
#[derive(Clone)]
pub struct DocumentSession {
    inner: Arc<Inner>,
}

impl DocumentSession {
    /// Load `document_id` from the repository and show it on the tree
    /// surface.
    pub async fn open(
        document_id: DocumentId,
        repository: Arc<dyn BlockRepository>,
        tree: Arc<dyn RenderSurface>,
        flat: Arc<dyn RenderSurface>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let matcher = config.pseudo_matcher()?;
        let parse_opts = config.parse_options();

        let blocks = repository.fetch_blocks(document_id).await?;
        let store = BlockStore::from_blocks(document_id, blocks)?;

        let machine = StateMachine::new(config.watchdog());
        let acks = AckRegistry::new();
        let zoom = Arc::new(ZoomTracker::default());
        let (events, _) = broadcast::channel(config.event_capacity);
        machine.add_hook(zoom.clone());
        machine.add_hook(Arc::new(acks.clone()));
        machine.add_hook(Arc::new(EventHook(events.clone())));

        let bridge = |surface| {
            Bridge::new(surface, acks.clone(), config.pull_grace(), config.ack_timeout())
        };
        let session = Self {
            inner: Arc::new(Inner {
                document_id,
                tree: bridge(tree),
                flat: bridge(flat),
                matcher,
                parse_opts,
                store: Mutex::new(store),
                machine,
                zoom,
                active: Mutex::new(SurfaceKind::Tree),
                events,
                repository,
                reparse: Mutex::new(None),
                config,
            }),
        };

        let markdown = session.markdown();
        session.inner.tree.push_and_wait(&markdown).await?;
        tracing::info!(
            document = %document_id,
            blocks = session.inner.store.lock().block_count(),
            "session opened"
        );
        session.publish_sections();
        Ok(session)
    }

    // ── accessors ───────────────────────────────────────────────────────

    pub fn document_id(&self) -> DocumentId {
        self.inner.document_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ContentState {
        self.inner.machine.state()
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.inner.machine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn active_surface(&self) -> SurfaceKind {
        *self.inner.active.lock()
    }

    pub fn zoom_scope(&self) -> Option<ZoomScope> {
        self.inner.zoom.active()
    }

    pub fn store_version(&self) -> u64 {
        self.inner.store.lock().version()
    }

    /// The whole document as markdown.
    pub fn markdown(&self) -> String {
        self.inner.store.lock().assemble()
    }

    /// Blocks in document order.
    pub fn blocks(&self) -> Vec<Block> {
        self.inner.store.lock().blocks_ordered()
    }

    /// Current outline.
    pub fn sections(&self) -> Vec<Section> {
        let blocks = self.blocks();
        build_outline(&blocks, &self.inner.matcher)
    }

    // ── internals ───────────────────────────────────────────────────────

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    fn bridge(&self, kind: SurfaceKind) -> &Bridge {
        match kind {
            SurfaceKind::Tree => &self.inner.tree,
            SurfaceKind::Flat => &self.inner.flat,
        }
    }

    fn active_bridge(&self) -> &Bridge {
        self.bridge(self.active_surface())
    }

    /// Claim `state` without touching the debounced re-parse.
    fn claim(&self, state: ContentState) -> Result<Transition, SyncError> {
        let transition = self.inner.machine.begin(state)?;
        self.emit(SessionEvent::StateChanged {
            from: ContentState::Idle,
            to: state,
        });
        Ok(transition)
    }

    /// Claim `state`, aborting any pending re-parse.
    fn begin(&self, state: ContentState) -> Result<Transition, SyncError> {
        let transition = self.claim(state)?;
        self.cancel_reparse();
        Ok(transition)
    }

    fn finish(&self, transition: Transition) {
        let state = transition.state();
        if self.inner.machine.finish(transition) {
            self.emit(SessionEvent::StateChanged {
                from: state,
                to: ContentState::Idle,
            });
        }
    }

    fn cancel_reparse(&self) {
        if let Some(handle) = self.inner.reparse.lock().take() {
            handle.abort();
        }
    }

    /// Publish the outline, but only while idle.
    fn publish_sections(&self) {
        if !self.inner.machine.is_idle() {
            return;
        }
        let (sections, version) = {
            let store = self.inner.store.lock();
            let blocks = store.blocks_ordered();
            (build_outline(&blocks, &self.inner.matcher), store.version())
        };
        self.emit(SessionEvent::SectionsUpdated {
            sections: Arc::new(sections),
            version,
        });
    }

    /// What the active surface should show: the zoom buffer, or the whole
    /// document.
    fn projection(&self) -> String {
        let store = self.inner.store.lock();
        if let Some(scope) = self.inner.zoom.active() {
            match render_scope(&store, &scope) {
                Some(extraction) => {
                    self.inner.zoom.set(extraction.scope);
                    return extraction.buffer;
                }
                None => {
                    tracing::warn!(anchor = %scope.anchor, "zoom range gone, showing full document");
                    self.inner.zoom.clear();
                }
            }
        }
        store.assemble()
    }

    /// Write the whole store back. A zoomed flush can also rewrite footnote
    /// definitions outside its range, and the repository must hold the
    /// store's keys rather than mint its own.
    async fn persist(&self) -> Result<(), SyncError> {
        let blocks = self.blocks();
        self.inner
            .repository
            .replace_blocks(self.inner.document_id, blocks)
            .await?;
        Ok(())
    }

    /// Merge pulled surface content into the store.
    fn apply_edit(&self, content: &str) -> Result<Applied, SyncError> {
        let inner = &self.inner;
        let mut store = inner.store.lock();

        if let Some(scope) = inner.zoom.active() {
            let flush = flush_zoomed(&mut store, &scope, content, &inner.parse_opts)?;
            return Ok(match flush.scope {
                Some(next) => {
                    inner.zoom.set(next);
                    Applied::default()
                }
                None => {
                    inner.zoom.clear();
                    Applied {
                        zoom_ended: Some(scope.anchor),
                        needs_full_push: true,
                    }
                }
            });
        }

        if let Some(orphan) = inner.zoom.take_orphan() {
            tracing::warn!(anchor = %orphan.anchor, "merging edit into zoom range orphaned by watchdog");
            flush_zoomed(&mut store, &orphan, content, &inner.parse_opts)?;
            return Ok(Applied {
                zoom_ended: Some(orphan.anchor),
                needs_full_push: true,
            });
        }

        store.apply_markdown(content, &inner.parse_opts)?;
        Ok(Applied::default())
    }

    /// Pull the active surface and merge any edit. Caller holds a transition.
    async fn flush_active(&self) -> Result<Option<Applied>, SyncError> {
        let bridge = self.active_bridge();
        let Some(content) = bridge.pull().await? else {
            return Ok(None);
        };
        let applied = self.apply_edit(&content)?;
        bridge.commit_pull(&content);
        self.persist().await?;
        Ok(Some(applied))
    }

    // ── zoom ────────────────────────────────────────────────────────────

    /// Show only `section` (and, in full mode, its subtree) on the active
    /// surface.
    pub async fn zoom_in(&self, section: BlockId, mode: ZoomMode) -> Result<ZoomOutcome, SyncError> {
        let transition = self.begin(ContentState::ZoomTransition)?;
        let result = self.zoom_in_inner(section, mode).await;
        self.finish(transition);
        self.publish_sections();
        result
    }

    async fn zoom_in_inner(&self, section: BlockId, mode: ZoomMode) -> Result<ZoomOutcome, SyncError> {
        self.flush_active().await?;

        let extraction = {
            let store = self.inner.store.lock();
            extract(&store, section, mode, &self.inner.matcher)
        };
        let Some(extraction) = extraction else {
            tracing::info!(section = %section, "zoom target missing");
            if let Some(anchor) = self.inner.zoom.clear() {
                let markdown = self.markdown();
                self.active_bridge().push_and_wait(&markdown).await?;
                self.emit(SessionEvent::ZoomOutCompleted {
                    anchor: Some(anchor),
                });
            }
            return Ok(ZoomOutcome::TargetMissing);
        };

        self.inner.zoom.set(extraction.scope);
        let ack = self.active_bridge().push_and_wait(&extraction.buffer).await?;
        if self.inner.zoom.active().is_none() {
            tracing::warn!(section = %section, ?ack, "zoom parked by watchdog reset");
            return Ok(ZoomOutcome::Parked { anchor: section });
        }
        tracing::info!(section = %section, %mode, ?ack, "zoomed in");
        Ok(ZoomOutcome::Zoomed {
            anchor: section,
            ack,
        })
    }

    /// Merge the zoom buffer back and show the whole document.
    pub async fn zoom_out(&self) -> Result<ZoomOutcome, SyncError> {
        if !self.inner.zoom.is_engaged() {
            return Err(SyncError::NotZoomed);
        }
        let transition = self.begin(ContentState::ZoomTransition)?;
        let result = self.zoom_out_inner().await;
        self.finish(transition);
        self.publish_sections();
        result
    }

    async fn zoom_out_inner(&self) -> Result<ZoomOutcome, SyncError> {
        let flushed = self.flush_active().await?;
        let anchor = self
            .inner
            .zoom
            .clear()
            .or_else(|| flushed.and_then(|a| a.zoom_ended));

        let markdown = self.markdown();
        let ack = self.active_bridge().push_and_wait(&markdown).await?;
        tracing::info!(?anchor, ?ack, "zoomed out");
        self.emit(SessionEvent::ZoomOutCompleted { anchor });
        Ok(ZoomOutcome::ZoomedOut { ack })
    }

    // ── surfaces ────────────────────────────────────────────────────────

    /// Make `kind` the active surface, carrying content and cursor over.
    pub async fn switch_surface(&self, kind: SurfaceKind) -> Result<AckOutcome, SyncError> {
        if self.active_surface() == kind {
            return Ok(AckOutcome::Skipped);
        }
        let transition = self.begin(ContentState::EditorTransition)?;
        let result = self.switch_surface_inner(kind).await;
        self.finish(transition);
        self.publish_sections();
        result
    }

    async fn switch_surface_inner(&self, to: SurfaceKind) -> Result<AckOutcome, SyncError> {
        let from = self.active_surface();
        self.flush_active().await?;
        let cursor = self.bridge(from).cursor_position().await?;

        let projection = self.projection();
        let target = self.bridge(to);
        let ack = target.push_and_wait(&projection).await?;
        let snapped = PositionMap::new(&projection).snap_line_col(cursor);
        target.set_cursor_position(snapped).await?;

        *self.inner.active.lock() = to;
        tracing::info!(%from, %to, %cursor, %snapped, "surface switched");
        self.emit(SessionEvent::ModeToggleRequested { from, to });
        Ok(ack)
    }

    /// Toggle between the tree and flat surfaces.
    pub async fn request_mode_toggle(&self) -> Result<AckOutcome, SyncError> {
        self.switch_surface(self.active_surface().other()).await
    }

    /// Forward theme variables to both surfaces.
    pub async fn apply_theme(&self, theme: &ThemeVariables) -> Result<(), SyncError> {
        futures::future::try_join(
            self.inner.tree.set_theme(theme),
            self.inner.flat.set_theme(theme),
        )
        .await?;
        Ok(())
    }

    // ── outline edits ───────────────────────────────────────────────────

    /// Move `section` (with its subtree) after the subtree of `after`, or to
    /// the start of the document.
    pub async fn move_section(
        &self,
        section: BlockId,
        after: Option<BlockId>,
    ) -> Result<AckOutcome, SyncError> {
        if self.inner.zoom.is_engaged() {
            return Err(SyncError::ZoomActive);
        }
        let transition = self.begin(ContentState::DragReorder)?;
        let result = self.move_section_inner(section, after).await;
        self.finish(transition);
        self.publish_sections();
        result
    }

    async fn move_section_inner(
        &self,
        section: BlockId,
        after: Option<BlockId>,
    ) -> Result<AckOutcome, SyncError> {
        self.flush_active().await?;
        {
            let mut store = self.inner.store.lock();
            let blocks = store.blocks_ordered();
            let sections = build_outline(&blocks, &self.inner.matcher);
            let (start, end) = scope_range(&blocks, &sections, section, ZoomMode::Full)
                .ok_or(SyncError::SectionNotFound(section))?;
            let moving: Vec<BlockId> = blocks[start..end].iter().map(|b| b.id).collect();

            let after_key = match after {
                None => None,
                Some(target) => {
                    let (t_start, t_end) = scope_range(&blocks, &sections, target, ZoomMode::Full)
                        .ok_or(SyncError::SectionNotFound(target))?;
                    if (start..end).contains(&t_start) {
                        return Err(SyncError::InvalidMove(
                            "cannot move a section after its own subtree".into(),
                        ));
                    }
                    let key = blocks[t_start..t_end]
                        .iter()
                        .rev()
                        .find(|b| !moving.contains(&b.id))
                        .map(|b| b.key.clone())
                        .ok_or_else(|| SyncError::InvalidMove("no anchor outside the moved range".into()))?;
                    Some(key)
                }
            };
            store.move_range(&moving, after_key.as_ref())?;
            tracing::info!(section = %section, blocks = moving.len(), "section moved");
        }
        self.persist().await?;
        let markdown = self.markdown();
        Ok(self.active_bridge().push_and_wait(&markdown).await?)
    }

    /// Retitle a section. Identity is kept.
    pub async fn rename_section(
        &self,
        section: BlockId,
        title: impl Into<String>,
    ) -> Result<AckOutcome, SyncError> {
        let title = title.into();
        self.edit_hierarchy(move |store, _| {
            require_heading(store, section)?;
            store.update_block(&section, |b| b.set_title(title))?;
            Ok(1)
        })
        .await
        .map(|(ack, _)| ack)
    }

    /// Change a section's heading level.
    pub async fn set_section_level(&self, section: BlockId, level: u8) -> Result<AckOutcome, SyncError> {
        self.edit_hierarchy(move |store, _| {
            require_heading(store, section)?;
            store.update_block(&section, |b| b.set_level(level))?;
            Ok(1)
        })
        .await
        .map(|(ack, _)| ack)
    }

    /// Remove skipped heading levels. Returns how many headings changed.
    pub async fn enforce_hierarchy(&self) -> Result<usize, SyncError> {
        self.edit_hierarchy(|store, matcher| {
            let changes = enforce_levels(&store.blocks_ordered(), matcher);
            for (id, level) in &changes {
                store.update_block(id, |b| b.set_level(*level))?;
            }
            Ok(changes.len())
        })
        .await
        .map(|(_, changed)| changed)
    }

    async fn edit_hierarchy<F>(&self, edit: F) -> Result<(AckOutcome, usize), SyncError>
    where
        F: FnOnce(&mut BlockStore, &PseudoSectionMatcher) -> Result<usize, SyncError>,
    {
        let transition = self.begin(ContentState::HierarchyEnforcement)?;
        let result = self.edit_hierarchy_inner(edit).await;
        self.finish(transition);
        self.publish_sections();
        result
    }

    async fn edit_hierarchy_inner<F>(&self, edit: F) -> Result<(AckOutcome, usize), SyncError>
    where
        F: FnOnce(&mut BlockStore, &PseudoSectionMatcher) -> Result<usize, SyncError>,
    {
        self.flush_active().await?;
        let changed = {
            let mut store = self.inner.store.lock();
            edit(&mut store, &self.inner.matcher)?
        };
        tracing::info!(changed, "hierarchy edited");
        self.persist().await?;
        let projection = self.projection();
        let ack = self.active_bridge().push_and_wait(&projection).await?;
        Ok((ack, changed))
    }

    // ── bibliography ────────────────────────────────────────────────────

    /// Replace the bibliography entries, creating the region if needed.
    pub async fn update_bibliography(&self, entries: Vec<String>) -> Result<AckOutcome, SyncError> {
        let transition = self.begin(ContentState::BibliographyUpdate)?;
        let result = self.update_bibliography_inner(entries).await;
        self.finish(transition);
        self.publish_sections();
        result
    }

    async fn update_bibliography_inner(&self, entries: Vec<String>) -> Result<AckOutcome, SyncError> {
        self.flush_active().await?;
        {
            let mut store = self.inner.store.lock();
            let title = bibliography_title(&self.inner.config);
            write_bibliography(&mut store, &title, entries)?;
        }
        self.persist().await?;
        let projection = self.projection();
        Ok(self.active_bridge().push_and_wait(&projection).await?)
    }

    // ── polling ─────────────────────────────────────────────────────────

    /// Pull the active surface and merge any user edit. Only acts while idle.
    pub async fn poll_once(&self) -> Result<FlushOutcome, SyncError> {
        if !self.inner.machine.is_idle() {
            return Ok(FlushOutcome::Deferred);
        }
        // A transition that runs to completion during the pull leaves the
        // pulled content stale.
        let generation = self.inner.machine.generation();
        let bridge = self.active_bridge();
        let Some(content) = bridge.pull().await? else {
            return Ok(FlushOutcome::Unchanged);
        };
        let applied = match self
            .inner
            .machine
            .with_idle_since(generation, || self.apply_edit(&content))
        {
            Ok(Some(applied)) => applied?,
            Ok(None) => {
                tracing::debug!(generation, "poll content predates a transition, dropped");
                return Ok(FlushOutcome::Deferred);
            }
            Err(busy) => {
                tracing::debug!(state = %busy.0, "poll deferred to in-flight transition");
                return Ok(FlushOutcome::Deferred);
            }
        };
        bridge.commit_pull(&content);
        self.persist().await?;

        if applied.needs_full_push {
            // The zoom ended underneath the edit; put the document back.
            if let Ok(transition) = self.claim(ContentState::ZoomTransition) {
                let markdown = self.markdown();
                let pushed = self.active_bridge().push_and_wait(&markdown).await;
                self.finish(transition);
                pushed?;
                self.emit(SessionEvent::ZoomOutCompleted {
                    anchor: applied.zoom_ended,
                });
            }
        }
        self.publish_sections();
        Ok(FlushOutcome::Applied {
            zoom_ended: applied.zoom_ended.is_some(),
        })
    }

    /// Debounce a re-parse of the active surface. A newer call replaces the
    /// pending one; any transition aborts it.
    pub fn schedule_reparse(&self) {
        let session = self.clone();
        let delay = self.inner.config.reparse_debounce();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = session.poll_once().await {
                tracing::warn!(error = %e, "debounced re-parse failed");
            }
        });
        if let Some(previous) = self.inner.reparse.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Poll the active surface every `poll_interval` until the handle is
    /// aborted.
    pub fn spawn_poller(&self) -> JoinHandle<()> {
        let session = self.clone();
        let period = self.inner.config.poll_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = session.poll_once().await {
                    tracing::warn!(error = %e, "poll failed");
                }
            }
        })
    }
}

fn require_heading(store: &BlockStore, id: BlockId) -> Result<(), SyncError> {
    match store.get(&id) {
        Some(block) if block.is_heading() => Ok(()),
        _ => Err(SyncError::SectionNotFound(id)),
    }
}

/// Heading title for a newly created bibliography region.
fn bibliography_title(config: &SyncConfig) -> String {
    let default = DEFAULT_BIBLIOGRAPHY_HEADING.to_lowercase();
    if config.bibliography_titles.iter().any(|t| t.trim().to_lowercase() == default) {
        return DEFAULT_BIBLIOGRAPHY_HEADING.to_string();
    }
    let Some(first) = config.bibliography_titles.first() else {
        return DEFAULT_BIBLIOGRAPHY_HEADING.to_string();
    };
    let mut chars = first.trim().chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => DEFAULT_BIBLIOGRAPHY_HEADING.to_string(),
    }
}

/// Rewrite the entries under the bibliography heading.
fn write_bibliography(store: &mut BlockStore, title: &str, entries: Vec<String>) -> Result<(), SyncError> {
    let entries: Vec<Block> = entries
        .into_iter()
        .map(|e| Block::paragraph(e).with_managed(ManagedRegion::Bibliography))
        .collect();

    let heading = store
        .iter()
        .find(|b| b.is_heading() && b.managed == Some(ManagedRegion::Bibliography))
        .map(|b| (b.id, b.key.clone()));

    match heading {
        Some((heading_id, heading_key)) => {
            let old: Vec<BlockId> = store
                .iter()
                .skip_while(|b| b.id != heading_id)
                .skip(1)
                .take_while(|b| b.managed == Some(ManagedRegion::Bibliography))
                .map(|b| b.id)
                .collect();
            for id in &old {
                store.remove(id)?;
            }
            store.insert_after(Some(&heading_key), entries)?;
            tracing::info!(replaced = old.len(), "bibliography updated");
        }
        None => {
            let mut blocks = vec![Block::heading(1, title).with_managed(ManagedRegion::Bibliography)];
            blocks.extend(entries);
            store.append(blocks)?;
            tracing::info!(%title, "bibliography created");
        }
    }
    Ok(())
}
