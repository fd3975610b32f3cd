//! End-to-end session tests: zoom, surface switching, watchdog recovery and
//! position mapping, driven through in-memory surfaces on paused time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quire_sync::{
    AckMode, AckOutcome, BlockRepository, ContentState, DocumentSession, FlushOutcome, LineCol,
    MemoryRepository, MemorySurface, PositionMap, Push, RenderSurface, SessionEvent, SurfaceError,
    SurfaceKind, SurfaceStats, SyncConfig, SyncError, ThemeVariables, ZoomMode, ZoomOutcome,
};
use quire_types::{BlockId, DocumentId};

// ============================================================================
// Shared test setup
// ============================================================================

const PAPER: &str = "# Intro\n\nHello.\n\n## Background\n\nOld.\n\n## Background - Part 2\n\nMore.\n\n### Detail\n\nDeep.\n\n## Methods\n\nHow.\n";

struct Harness {
    doc: DocumentId,
    session: DocumentSession,
    tree: Arc<MemorySurface>,
    flat: Arc<MemorySurface>,
    repo: Arc<MemoryRepository>,
}

async fn open_with(markdown: &str, config: SyncConfig) -> Harness {
    let doc = DocumentId::new();
    let repo = Arc::new(MemoryRepository::with_markdown(doc, markdown, &config.parse_options()));
    let tree = Arc::new(MemorySurface::new(SurfaceKind::Tree));
    let flat = Arc::new(MemorySurface::new(SurfaceKind::Flat));
    let session = DocumentSession::open(doc, repo.clone(), tree.clone(), flat.clone(), config)
        .await
        .expect("open session");
    Harness { doc, session, tree, flat, repo }
}

async fn open(markdown: &str) -> Harness {
    open_with(markdown, SyncConfig::default()).await
}

/// Let the post-push grace window pass so surface changes count as edits.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

fn section_id(session: &DocumentSession, title: &str) -> BlockId {
    session
        .sections()
        .into_iter()
        .find(|s| s.title == title)
        .map(|s| s.id)
        .unwrap_or_else(|| panic!("no section titled {title:?}"))
}

fn block_ids(session: &DocumentSession) -> Vec<BlockId> {
    session.blocks().iter().map(|b| b.id).collect()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// A surface whose reads return what was on screen when the read began,
/// after a configurable delay.
struct SlowReads {
    inner: MemorySurface,
    delay_ms: AtomicU64,
}

impl SlowReads {
    fn new(kind: SurfaceKind) -> Self {
        Self {
            inner: MemorySurface::new(kind),
            delay_ms: AtomicU64::new(0),
        }
    }

    fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl RenderSurface for SlowReads {
    fn kind(&self) -> SurfaceKind {
        self.inner.kind()
    }

    async fn set_content(&self, push: Push) -> Result<(), SurfaceError> {
        self.inner.set_content(push).await
    }

    async fn get_content(&self) -> Result<String, SurfaceError> {
        let content = self.inner.get_content().await?;
        let delay = self.delay_ms.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(content)
    }

    async fn cursor_position(&self) -> Result<LineCol, SurfaceError> {
        self.inner.cursor_position().await
    }

    async fn set_cursor_position(&self, position: LineCol) -> Result<(), SurfaceError> {
        self.inner.set_cursor_position(position).await
    }

    async fn set_theme(&self, theme: &ThemeVariables) -> Result<(), SurfaceError> {
        self.inner.set_theme(theme).await
    }

    async fn stats(&self) -> Result<SurfaceStats, SurfaceError> {
        self.inner.stats().await
    }
}

// ============================================================================
// Zoom
// ============================================================================

#[tokio::test(start_paused = true)]
async fn full_zoom_includes_continuations_and_subsections() {
    let h = open(PAPER).await;
    let bg = section_id(&h.session, "Background");

    let outcome = h.session.zoom_in(bg, ZoomMode::Full).await.unwrap();
    assert_eq!(
        outcome,
        ZoomOutcome::Zoomed { anchor: bg, ack: AckOutcome::Acknowledged }
    );
    assert_eq!(
        h.tree.content(),
        "## Background\n\nOld.\n\n## Background - Part 2\n\nMore.\n\n### Detail\n\nDeep.\n"
    );
    assert_eq!(h.session.zoom_scope().map(|s| s.anchor), Some(bg));
}

#[tokio::test(start_paused = true)]
async fn zooming_into_parent_includes_child_and_its_continuation() {
    let doc = "# Intro\n\nHi.\n\n## Background\n\nOld.\n\n## Background-part 2\n\nMore.\n\n# Results\n\nDone.\n";
    let h = open(doc).await;
    let intro = section_id(&h.session, "Intro");
    let bg = section_id(&h.session, "Background");

    h.session.zoom_in(intro, ZoomMode::Full).await.unwrap();
    let buffer = h.tree.content();
    assert!(buffer.contains("## Background\n"));
    assert!(buffer.contains("## Background-part 2\n"));
    assert!(!buffer.contains("# Results"));

    h.session.zoom_in(bg, ZoomMode::Shallow).await.unwrap();
    assert_eq!(
        h.tree.content(),
        "## Background\n\nOld.\n\n## Background-part 2\n\nMore.\n"
    );
}

#[tokio::test(start_paused = true)]
async fn shallow_zoom_stops_at_first_subsection() {
    let h = open(PAPER).await;
    let bg = section_id(&h.session, "Background");

    h.session.zoom_in(bg, ZoomMode::Shallow).await.unwrap();
    assert_eq!(
        h.tree.content(),
        "## Background\n\nOld.\n\n## Background - Part 2\n\nMore.\n"
    );
}

#[tokio::test(start_paused = true)]
async fn zoom_round_trip_without_edits_is_identity() {
    let h = open(PAPER).await;
    let before_ids = block_ids(&h.session);
    let bg = section_id(&h.session, "Background");

    h.session.zoom_in(bg, ZoomMode::Full).await.unwrap();
    // Zooming twice to the same place changes nothing either.
    h.session.zoom_in(bg, ZoomMode::Full).await.unwrap();
    h.session.zoom_out().await.unwrap();

    assert_eq!(h.session.markdown(), PAPER);
    assert_eq!(h.tree.content(), PAPER);
    assert_eq!(block_ids(&h.session), before_ids);
    assert!(h.session.zoom_scope().is_none());
}

#[tokio::test(start_paused = true)]
async fn zoomed_edit_touches_only_the_zoomed_range() {
    let h = open(PAPER).await;
    let mut events = h.session.subscribe();
    let intro = section_id(&h.session, "Intro");
    let detail = section_id(&h.session, "Detail");
    let methods = section_id(&h.session, "Methods");
    let bg = section_id(&h.session, "Background");

    h.session.zoom_in(bg, ZoomMode::Shallow).await.unwrap();
    settle().await;
    h.tree
        .type_text("## Background\n\nNew.\n\n## Background - Part 2\n\nMore.\n");
    assert_eq!(
        h.session.poll_once().await.unwrap(),
        FlushOutcome::Applied { zoom_ended: false }
    );

    assert_eq!(h.session.markdown(), PAPER.replace("Old.", "New."));
    for (title, id) in [("Intro", intro), ("Background", bg), ("Detail", detail), ("Methods", methods)] {
        assert_eq!(section_id(&h.session, title), id, "{title} lost its identity");
    }

    // Persisted.
    let stored = h.repo.fetch_blocks(h.doc).await.unwrap();
    assert_eq!(quire_blocks::assemble(&stored), h.session.markdown());

    h.session.zoom_out().await.unwrap();
    assert_eq!(h.tree.content(), PAPER.replace("Old.", "New."));
    assert!(
        drain(&mut events).contains(&SessionEvent::ZoomOutCompleted { anchor: Some(bg) }),
        "zoom-out should be announced"
    );
}

#[tokio::test(start_paused = true)]
async fn zoomed_edit_keeps_content_after_a_managed_subsection_in_place() {
    let doc = "# Intro\n\nHello.\n\n## References\n\nSmith 2020.\n\n## Later\n\nText.\n";
    let h = open(doc).await;
    let intro = section_id(&h.session, "Intro");
    let later = section_id(&h.session, "Later");

    h.session.zoom_in(intro, ZoomMode::Full).await.unwrap();
    assert_eq!(h.tree.content(), "# Intro\n\nHello.\n\n## Later\n\nText.\n");

    settle().await;
    h.tree.type_text(h.tree.content().replace("Text.", "Text edited."));
    assert_eq!(
        h.session.poll_once().await.unwrap(),
        FlushOutcome::Applied { zoom_ended: false }
    );
    h.session.zoom_out().await.unwrap();

    assert_eq!(
        h.session.markdown(),
        "# Intro\n\nHello.\n\n## References\n\nSmith 2020.\n\n## Later\n\nText edited.\n"
    );
    assert_eq!(section_id(&h.session, "Later"), later);

    // A second flush keeps the order too.
    h.session.zoom_in(intro, ZoomMode::Full).await.unwrap();
    settle().await;
    h.tree.type_text(h.tree.content().replace("Hello.", "Hello again."));
    h.session.poll_once().await.unwrap();
    h.session.zoom_out().await.unwrap();
    assert_eq!(
        h.session.markdown(),
        "# Intro\n\nHello again.\n\n## References\n\nSmith 2020.\n\n## Later\n\nText edited.\n"
    );
}

#[tokio::test(start_paused = true)]
async fn sections_with_equal_titles_stay_distinct() {
    let doc = "# A\n\n## Notes\n\nfirst\n\n# B\n\n## Notes\n\nsecond\n";
    let h = open(doc).await;
    let notes: Vec<_> = h
        .session
        .sections()
        .into_iter()
        .filter(|s| s.title == "Notes")
        .collect();
    assert_eq!(notes.len(), 2);
    assert_ne!(notes[0].id, notes[1].id);
    let b = section_id(&h.session, "B");
    assert_eq!(notes[1].parent, Some(b));

    h.session.zoom_in(notes[1].id, ZoomMode::Full).await.unwrap();
    assert_eq!(h.tree.content(), "## Notes\n\nsecond\n");
    settle().await;
    h.tree.type_text("## Notes\n\nsecond, revised\n");
    h.session.poll_once().await.unwrap();
    h.session.zoom_out().await.unwrap();

    assert_eq!(
        h.session.markdown(),
        "# A\n\n## Notes\n\nfirst\n\n# B\n\n## Notes\n\nsecond, revised\n"
    );
    let after: Vec<_> = h
        .session
        .sections()
        .into_iter()
        .filter(|s| s.title == "Notes")
        .map(|s| s.id)
        .collect();
    assert_eq!(after, vec![notes[0].id, notes[1].id]);
}

#[tokio::test(start_paused = true)]
async fn footnote_definitions_travel_with_the_zoom() {
    let doc = "# A\n\nSee this[^1].\n\n# B\n\nOther.\n\n[^1]: The note.\n";
    let h = open(doc).await;
    let a = section_id(&h.session, "A");

    h.session.zoom_in(a, ZoomMode::Full).await.unwrap();
    let buffer = h.tree.content();
    assert!(buffer.contains("See this[^1]."));
    assert!(buffer.contains("[^1]: The note."));
    assert!(!buffer.contains("Other."));

    settle().await;
    h.tree.type_text(buffer.replace("The note.", "The revised note."));
    h.session.poll_once().await.unwrap();
    h.session.zoom_out().await.unwrap();

    let md = h.session.markdown();
    assert_eq!(md.matches("[^1]:").count(), 1);
    assert!(md.ends_with("[^1]: The revised note.\n"));
    assert!(md.starts_with("# A\n\nSee this[^1].\n\n# B\n\nOther.\n"));
}

#[tokio::test(start_paused = true)]
async fn zoom_to_missing_section_clears_zoom() {
    let h = open(PAPER).await;
    let bg = section_id(&h.session, "Background");
    h.session.zoom_in(bg, ZoomMode::Full).await.unwrap();

    let outcome = h.session.zoom_in(BlockId::new(), ZoomMode::Full).await.unwrap();
    assert_eq!(outcome, ZoomOutcome::TargetMissing);
    assert!(h.session.zoom_scope().is_none());
    assert_eq!(h.tree.content(), PAPER);

    assert!(matches!(h.session.zoom_out().await, Err(SyncError::NotZoomed)));
}

// ============================================================================
// Mutual exclusion and the watchdog
// ============================================================================

#[tokio::test(start_paused = true)]
async fn operations_are_rejected_while_a_transition_is_in_flight() {
    let h = open(PAPER).await;
    h.tree.set_ack_mode(AckMode::Deferred);
    let bg = section_id(&h.session, "Background");
    let methods = section_id(&h.session, "Methods");

    let task = {
        let session = h.session.clone();
        tokio::spawn(async move { session.zoom_in(bg, ZoomMode::Full).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.session.state(), ContentState::ZoomTransition);

    assert!(matches!(
        h.session.zoom_in(methods, ZoomMode::Full).await,
        Err(SyncError::Busy(ContentState::ZoomTransition))
    ));
    assert!(matches!(
        h.session.rename_section(methods, "Approach").await,
        Err(SyncError::Busy(ContentState::ZoomTransition))
    ));
    assert!(matches!(
        h.session.switch_surface(SurfaceKind::Flat).await,
        Err(SyncError::Busy(_))
    ));
    assert_eq!(h.session.poll_once().await.unwrap(), FlushOutcome::Deferred);

    // Nothing the rejected calls asked for happened.
    assert_eq!(section_id(&h.session, "Methods"), methods);
    assert_eq!(h.session.active_surface(), SurfaceKind::Tree);

    h.tree.release_acks();
    let outcome = task.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        ZoomOutcome::Zoomed { anchor: bg, ack: AckOutcome::Acknowledged }
    );
    assert_eq!(h.session.state(), ContentState::Idle);
}

#[tokio::test(start_paused = true)]
async fn poll_read_that_spans_a_transition_is_dropped() {
    let config = SyncConfig::default();
    let doc = DocumentId::new();
    let repo = Arc::new(MemoryRepository::with_markdown(doc, PAPER, &config.parse_options()));
    let tree = Arc::new(SlowReads::new(SurfaceKind::Tree));
    let flat = Arc::new(MemorySurface::new(SurfaceKind::Flat));
    let session = DocumentSession::open(doc, repo, tree.clone(), flat, config)
        .await
        .expect("open session");
    let bg = section_id(&session, "Background");

    settle().await;
    let edited = PAPER.replace("Hello.", "Hello, edited.");
    tree.inner.type_text(edited.clone());

    // The poll snapshots the full document, then stalls.
    tree.set_delay(Duration::from_secs(2));
    let poll = {
        let session = session.clone();
        tokio::spawn(async move { session.poll_once().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    tree.set_delay(Duration::ZERO);

    // The zoom picks up the edit itself and completes while the poll waits.
    session.zoom_in(bg, ZoomMode::Shallow).await.unwrap();
    let buffer = tree.inner.content();
    assert_eq!(buffer, "## Background\n\nOld.\n\n## Background - Part 2\n\nMore.\n");

    assert_eq!(poll.await.unwrap().unwrap(), FlushOutcome::Deferred);
    assert_eq!(session.markdown(), edited);
    assert_eq!(session.markdown().matches("# Intro").count(), 1);
    assert_eq!(session.zoom_scope().map(|s| s.anchor), Some(bg));
    assert_eq!(tree.inner.content(), buffer);

    // Nothing left over for the next poll.
    assert_eq!(session.poll_once().await.unwrap(), FlushOutcome::Unchanged);
    assert_eq!(session.markdown(), edited);
}

#[tokio::test(start_paused = true)]
async fn watchdog_recovers_a_stuck_zoom_without_losing_text() {
    let config = SyncConfig {
        watchdog_ms: 1_000,
        ack_timeout_ms: 10_000,
        ..SyncConfig::default()
    };
    let h = open_with(PAPER, config).await;
    let mut events = h.session.subscribe();
    h.tree.set_ack_mode(AckMode::Never);
    let bg = section_id(&h.session, "Background");

    let outcome = h.session.zoom_in(bg, ZoomMode::Full).await.unwrap();
    assert_eq!(outcome, ZoomOutcome::Parked { anchor: bg });
    assert_eq!(h.session.state(), ContentState::Idle);
    assert_eq!(h.session.state_machine().reset_count(), 1);
    assert!(h.session.zoom_scope().is_none());
    assert!(
        drain(&mut events).contains(&SessionEvent::WatchdogReset {
            state: ContentState::ZoomTransition
        })
    );

    // The surface still shows the section; an edit there lands in place.
    h.tree.set_ack_mode(AckMode::Immediate);
    settle().await;
    h.tree.type_text(h.tree.content().replace("Old.", "Rescued."));
    assert_eq!(
        h.session.poll_once().await.unwrap(),
        FlushOutcome::Applied { zoom_ended: true }
    );
    assert_eq!(h.session.markdown(), PAPER.replace("Old.", "Rescued."));
    assert_eq!(h.tree.content(), h.session.markdown());

    // And the machine is usable again.
    h.session.zoom_in(bg, ZoomMode::Shallow).await.unwrap();
    assert!(h.session.zoom_scope().is_some());
}

// ============================================================================
// Surfaces and positions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn mode_switch_while_zoomed_keeps_the_zoom() {
    let h = open(PAPER).await;
    let bg = section_id(&h.session, "Background");
    h.session.zoom_in(bg, ZoomMode::Full).await.unwrap();
    let buffer = h.tree.content();
    h.tree.move_cursor(LineCol::new(2, 1));

    let ack = h.session.request_mode_toggle().await.unwrap();
    assert_eq!(ack, AckOutcome::Acknowledged);
    assert_eq!(h.session.active_surface(), SurfaceKind::Flat);
    assert_eq!(h.flat.content(), buffer);
    assert_eq!(h.flat.cursor(), LineCol::new(2, 1));

    settle().await;
    h.flat.type_text(buffer.replace("Old.", "Older."));
    h.session.poll_once().await.unwrap();
    assert_eq!(h.session.markdown(), PAPER.replace("Old.", "Older."));
    assert_eq!(h.session.zoom_scope().map(|s| s.anchor), Some(bg));
}

#[tokio::test(start_paused = true)]
async fn edits_on_the_inactive_surface_are_ignored() {
    let h = open(PAPER).await;
    settle().await;
    h.flat.type_text("# Something else\n");
    assert_eq!(h.session.poll_once().await.unwrap(), FlushOutcome::Unchanged);
    assert_eq!(h.session.markdown(), PAPER);
}

#[test]
fn positions_round_trip_across_inline_markup() {
    let md = "# Title\n\nSome **bold** and *italic* and ~~gone~~ ![pic](a.png) end\n";
    let map = PositionMap::new(md);

    let positions = map.cursor_positions();
    assert!(!positions.is_empty());
    for pos in positions {
        let lc = map.tree_to_line_col(pos);
        assert_eq!(map.line_col_to_tree(lc), pos, "tree {pos} via {lc}");
    }

    // Snapping is stable everywhere on the paragraph line.
    let line = md.lines().nth(2).unwrap();
    for col in 0..=line.chars().count() {
        let snapped = map.snap_line_col(LineCol::new(2, col));
        assert_eq!(map.snap_line_col(snapped), snapped, "col {col}");
    }

    // Inside the image snaps to just before it.
    let image_at = line.find("![").unwrap();
    assert_eq!(
        map.snap_line_col(LineCol::new(2, image_at + 3)),
        LineCol::new(2, image_at)
    );
}

#[test]
fn positions_round_trip_through_nested_and_escaped_emphasis() {
    let md = "# Title\n\n**bold *italic* text**\n\n*a \\* b*\n";
    let map = PositionMap::new(md);

    for pos in map.cursor_positions() {
        let lc = map.tree_to_line_col(pos);
        assert_eq!(map.line_col_to_tree(lc), pos, "tree {pos} via {lc}");
    }
    for line in [2, 4] {
        let width = md.lines().nth(line).unwrap().chars().count();
        for col in 0..=width {
            let snapped = map.snap_line_col(LineCol::new(line, col));
            assert_eq!(map.snap_line_col(snapped), snapped, "{line}:{col}");
        }
    }

    // Nested marks take no positions: "bold italic text" is 16 characters.
    let tree = |line, col| map.line_col_to_tree(LineCol::new(line, col));
    assert_eq!(tree(2, 20) - tree(2, 2), 16);
    // The inner opening `*` and the `i` after it are one cursor spot.
    assert_eq!(map.snap_line_col(LineCol::new(2, 8)), LineCol::new(2, 7));
    assert_eq!(tree(2, 9), tree(2, 7) + 1);
    assert_eq!(map.tree_to_line_col(tree(2, 9)), LineCol::new(2, 9));

    // The escaped star renders as one character inside the emphasis.
    assert_eq!(tree(4, 5) - tree(4, 1), 3);
    assert_eq!(map.tree_to_line_col(tree(4, 5)), LineCol::new(4, 5));
    assert_eq!(tree(4, 7) - tree(4, 5), 2);
}

#[tokio::test(start_paused = true)]
async fn outline_updates_are_published_when_idle() {
    let h = open("# A\n\n#### Deep\n").await;
    let mut events = h.session.subscribe();
    assert_eq!(h.session.enforce_hierarchy().await.unwrap(), 1);

    let updates: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::SectionsUpdated { sections, .. } => Some(sections),
            _ => None,
        })
        .collect();
    let last = updates.last().expect("sections published");
    assert_eq!(last[1].title, "Deep");
    assert_eq!(last[1].level, 2);
}
