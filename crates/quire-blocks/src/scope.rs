//! Zoom scopes: extracting one section as an edit buffer and merging the
//! edited buffer back into the store.
//!
//! A scope is a contiguous key range `[start, end)` of the canonical block
//! sequence. `end` is the key of the first heading past the scope (or `None`
//! at end of document), so flushing rewrites exactly the range the user saw
//! even after the keys inside it have changed.
//!
//! Managed blocks inside the range are never put in the buffer. Footnote
//! definitions referenced from the buffer are appended after
//! [`NOTES_MARKER`] so the user can edit them in place; on flush they are
//! merged back by label and never written into the range.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use quire_types::{Block, BlockId, BlockKind, ManagedRegion, OrderKey};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::markdown::{self, ParseOptions, footnote_definition_label, reconcile_identity};
use crate::outline::{PseudoSectionMatcher, Section, build_outline, full_scope_end, shallow_scope_end};
use crate::{BlockStore, Result, StoreError};

/// Separates section content from the footnote definitions it references.
pub const NOTES_MARKER: &str = "<!-- quire:notes -->";

static FOOTNOTE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\^([^\]\s]+)\]").expect("footnote reference pattern"));

/// How much of a section a zoom shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ZoomMode {
    /// The section and its whole subtree.
    #[default]
    Full,
    /// The section's own text plus its direct continuations.
    Shallow,
}

/// An active zoom over a key range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomScope {
    /// Heading the zoom is anchored on.
    pub anchor: BlockId,
    pub mode: ZoomMode,
    /// Key of the first block in the range.
    pub start: OrderKey,
    /// Key of the first block after the range; `None` = end of document.
    pub end: Option<OrderKey>,
    /// Unmanaged blocks that were shown in the buffer.
    pub captured: BTreeSet<BlockId>,
    /// Footnote labels whose definitions were appended.
    pub note_labels: Vec<String>,
}

/// Result of extracting a scope.
#[derive(Clone, Debug)]
pub struct Extraction {
    pub scope: ZoomScope,
    pub buffer: String,
}

/// Result of flushing an edited buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoomFlush {
    /// Updated scope; `None` when the zoom can no longer continue (no heading
    /// left in the range, or the range was invalidated and recovered).
    pub scope: Option<ZoomScope>,
    /// The range was gone and the buffer was written by recovery.
    pub recovered: bool,
    /// Footnote definitions created or rewritten.
    pub notes_changed: usize,
}

/// Footnote labels referenced in `text`, in first-use order.
pub fn footnote_refs(text: &str) -> Vec<String> {
    let mut labels = Vec::new();
    for caps in FOOTNOTE_REF.captures_iter(text) {
        let Some(m) = caps.get(1) else { continue };
        // `[^x]:` at line start is a definition, not a reference.
        let whole = caps.get(0).map(|w| w.end()).unwrap_or(0);
        let line_start = text[..m.start()].rfind('\n').map(|p| p + 1).unwrap_or(0);
        if text[whole..].starts_with(':') && text[line_start..m.start()].trim() == "[^" {
            continue;
        }
        let label = m.as_str().to_string();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

/// Block index range `[start, end)` for zooming into `anchor`.
///
/// `blocks` must be in document order. Returns `None` when `anchor` is not an
/// unmanaged heading.
pub fn scope_range(
    blocks: &[Block],
    sections: &[Section],
    anchor: BlockId,
    mode: ZoomMode,
) -> Option<(usize, usize)> {
    let si = sections.iter().position(|s| s.id == anchor)?;
    if sections[si].managed.is_some() {
        return None;
    }
    let start = blocks.iter().position(|b| b.id == anchor)?;
    let end_section = match mode {
        ZoomMode::Full => full_scope_end(sections, si),
        ZoomMode::Shallow => shallow_scope_end(sections, si),
    };
    let end = sections
        .get(end_section)
        .and_then(|s| blocks.iter().position(|b| b.id == s.id))
        .unwrap_or(blocks.len());
    Some((start, end))
}

/// Extract the zoom buffer for `anchor`.
pub fn extract(
    store: &BlockStore,
    anchor: BlockId,
    mode: ZoomMode,
    matcher: &PseudoSectionMatcher,
) -> Option<Extraction> {
    let blocks = store.blocks_ordered();
    let sections = build_outline(&blocks, matcher);
    let (start, end) = scope_range(&blocks, &sections, anchor, mode)?;

    let provisional = ZoomScope {
        anchor,
        mode,
        start: blocks[start].key.clone(),
        end: blocks.get(end).map(|b| b.key.clone()),
        captured: BTreeSet::new(),
        note_labels: Vec::new(),
    };
    let extraction = render_scope(store, &provisional)?;
    tracing::debug!(
        %anchor,
        %mode,
        blocks = extraction.scope.captured.len(),
        notes = extraction.scope.note_labels.len(),
        "extracted zoom scope"
    );
    Some(extraction)
}

/// Re-render the buffer for an existing scope from its stored key range.
///
/// Used after mutations made while zoomed (retitles, level changes) so the
/// surface shows the current content of the same range. Returns `None` when
/// the range start is gone.
pub fn render_scope(store: &BlockStore, scope: &ZoomScope) -> Option<Extraction> {
    if !store.contains_key(&scope.start) {
        return None;
    }
    let content: Vec<&Block> = store
        .range(&scope.start, scope.end.as_ref())
        .filter(|b| !b.is_managed())
        .collect();
    let mut labels: Vec<String> = Vec::new();
    for block in &content {
        for label in footnote_refs(&block.text) {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
    }
    let notes: Vec<&Block> = labels
        .iter()
        .filter_map(|label| store.footnote_definition(label))
        .collect();

    let mut fragments: Vec<&str> = content.iter().map(|b| b.markdown.as_str()).collect();
    if !notes.is_empty() {
        fragments.push(NOTES_MARKER);
        fragments.extend(notes.iter().map(|b| b.markdown.as_str()));
    }
    Some(Extraction {
        buffer: markdown::join_fragments(fragments),
        scope: ZoomScope {
            anchor: scope.anchor,
            mode: scope.mode,
            start: scope.start.clone(),
            end: scope.end.clone(),
            captured: content.iter().map(|b| b.id).collect(),
            note_labels: notes
                .iter()
                .filter_map(|b| footnote_definition_label(&b.text))
                .collect(),
        },
    })
}

/// Split a parsed buffer into section content and footnote definitions.
///
/// Everything after the notes marker that is not a definition stays content,
/// and definitions typed into the content area move to the notes.
pub fn split_notes(blocks: Vec<Block>) -> (Vec<Block>, Vec<Block>) {
    let mut content = Vec::new();
    let mut notes = Vec::new();
    for block in blocks {
        if block.kind == BlockKind::Structural && block.text.trim() == NOTES_MARKER {
            continue;
        }
        if block.managed == Some(ManagedRegion::FootnoteNotes) {
            notes.push(block);
        } else {
            content.push(block);
        }
    }
    (content, notes)
}

/// Merge an edited zoom buffer back into the store.
///
/// Rewrites the unmanaged blocks of `scope`'s range and merges footnote
/// definitions by label. Identity survives for blocks whose text survives.
///
/// If a range boundary vanished, the captured blocks that are still present
/// are removed and the buffer is written where the first of them was (or at
/// the end of the document), and the zoom is ended. The user's text is never
/// dropped.
pub fn flush_zoomed(
    store: &mut BlockStore,
    scope: &ZoomScope,
    buffer: &str,
    opts: &ParseOptions,
) -> Result<ZoomFlush> {
    let (mut content, notes) = split_notes(markdown::parse_with(buffer, opts));

    let previous: Vec<Block> = if store.contains_key(&scope.start) {
        store
            .range(&scope.start, scope.end.as_ref())
            .filter(|b| !b.is_managed())
            .cloned()
            .collect()
    } else {
        Vec::new()
    };
    reconcile_identity(&mut content, &previous);

    let mut recovered = false;
    let keys = match store.replace_range(content.clone(), &scope.start, scope.end.as_ref()) {
        Ok(keys) => keys,
        Err(StoreError::ScopeMissing(missing)) => {
            tracing::warn!(%missing, anchor = %scope.anchor, "zoom range invalidated, recovering");
            recovered = true;
            recover(store, scope, content.clone())?
        }
        Err(e) => return Err(e),
    };
    let notes_changed = store.merge_footnotes(notes)?;

    if recovered {
        return Ok(ZoomFlush {
            scope: None,
            recovered,
            notes_changed,
        });
    }

    let anchor = if content.iter().any(|b| b.id == scope.anchor) {
        Some(scope.anchor)
    } else {
        content.iter().find(|b| b.is_heading() && !b.is_managed()).map(|b| b.id)
    };
    let next = match (anchor, keys.first()) {
        (Some(anchor), Some(start)) => {
            let mut note_labels = Vec::new();
            for block in &content {
                for label in footnote_refs(&block.text) {
                    if store.footnote_definition(&label).is_some() && !note_labels.contains(&label) {
                        note_labels.push(label);
                    }
                }
            }
            Some(ZoomScope {
                anchor,
                mode: scope.mode,
                start: start.clone(),
                end: scope.end.clone(),
                captured: content.iter().map(|b| b.id).collect(),
                note_labels,
            })
        }
        _ => None,
    };
    if next.as_ref().is_some_and(|s| s.anchor != scope.anchor) {
        tracing::debug!(old = %scope.anchor, "zoom anchor heading removed, re-anchoring");
    }

    Ok(ZoomFlush {
        scope: next,
        recovered,
        notes_changed,
    })
}

/// Write `content` over whatever is left of a vanished range.
fn recover(store: &mut BlockStore, scope: &ZoomScope, content: Vec<Block>) -> Result<Vec<OrderKey>> {
    let survivors: Vec<(BlockId, OrderKey)> = store
        .iter()
        .filter(|b| scope.captured.contains(&b.id))
        .map(|b| (b.id, b.key.clone()))
        .collect();

    let insert_after = match survivors.first() {
        Some((_, key)) => store.predecessor_key(key).cloned().map(Some),
        None => Some(store.last_key().cloned()),
    };
    for (id, _) in &survivors {
        store.remove(id)?;
    }

    // Ids still held by blocks outside the range must not be reused.
    let content: Vec<Block> = content
        .into_iter()
        .map(|mut b| {
            if store.get(&b.id).is_some() {
                b.id = BlockId::new();
            }
            b
        })
        .collect();

    match insert_after {
        Some(Some(after)) => store.insert_after(Some(&after), content),
        Some(None) if survivors.is_empty() => store.append(content),
        _ => store.insert_after(None, content),
    }
}
