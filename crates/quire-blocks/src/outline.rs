//! Section tree derived from heading blocks.
//!
//! The outline is a flat, document-ordered list of [`Section`]s with parent
//! links. Hierarchy comes from heading levels: a section's parent is the
//! nearest preceding heading with a lower level.
//!
//! Pseudo-sections are headings whose title matches the continuation pattern
//! (`"Background-part 2"`). They extend an earlier section instead of starting
//! a new branch: they take that section's parent, record it in
//! [`Section::continues`], and count as part of its subtree regardless of
//! level.

use quire_types::{Block, BlockId, ManagedRegion, OrderKey};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default continuation pattern: `<title>-part <n>` (case-insensitive).
pub const DEFAULT_PSEUDO_SECTION_PATTERN: &str = r"(?i)^(.+?)\s*-\s*part\s*\d+$";

/// Recognises pseudo-section titles.
#[derive(Clone, Debug)]
pub struct PseudoSectionMatcher {
    pattern: Regex,
}

impl PseudoSectionMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn is_continuation(&self, title: &str) -> bool {
        self.pattern.is_match(title.trim())
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Default for PseudoSectionMatcher {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_PSEUDO_SECTION_PATTERN).expect("default pseudo-section pattern"),
        }
    }
}

/// One heading in the outline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Heading block id.
    pub id: BlockId,
    pub title: String,
    pub level: u8,
    /// Heading block key.
    pub key: OrderKey,
    /// Enclosing section.
    pub parent: Option<BlockId>,
    /// For pseudo-sections: the section this one extends.
    pub continues: Option<BlockId>,
    pub managed: Option<ManagedRegion>,
    /// Words in the heading and the blocks up to the next heading.
    pub own_words: usize,
    /// Words in the whole subtree (full zoom scope).
    pub word_count: usize,
}

impl Section {
    pub fn is_pseudo(&self) -> bool {
        self.continues.is_some()
    }
}

/// Build the outline. `blocks` must be in document order.
pub fn build_outline(blocks: &[Block], matcher: &PseudoSectionMatcher) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    // Indices into `sections` of open non-pseudo headings, shallowest first.
    let mut stack: Vec<usize> = Vec::new();

    for block in blocks {
        let Some(level) = block.heading_level() else {
            if let Some(current) = sections.last_mut() {
                current.own_words += block.word_count();
            }
            continue;
        };

        let continues = if matcher.is_continuation(&block.text) {
            continuation_anchor(&sections, level)
        } else {
            None
        };

        let parent = match continues {
            Some(anchor) => sections[anchor].parent,
            None => {
                while stack.last().is_some_and(|&i| sections[i].level >= level) {
                    stack.pop();
                }
                stack.last().map(|&i| sections[i].id)
            }
        };

        sections.push(Section {
            id: block.id,
            title: block.text.clone(),
            level,
            key: block.key.clone(),
            parent,
            continues: continues.map(|i| sections[i].id),
            managed: block.managed,
            own_words: block.word_count(),
            word_count: 0,
        });
        if continues.is_none() {
            stack.push(sections.len() - 1);
        }
    }

    // Aggregate: a section's subtree runs until its full-scope end.
    for i in 0..sections.len() {
        let end = full_scope_end(&sections, i);
        sections[i].word_count = sections[i..end].iter().map(|s| s.own_words).sum();
    }
    sections
}

/// Section a pseudo-section at `level` extends: the nearest earlier
/// non-pseudo section no deeper than it, else the nearest non-pseudo one.
fn continuation_anchor(sections: &[Section], level: u8) -> Option<usize> {
    let candidates = || sections.iter().enumerate().rev().filter(|(_, s)| !s.is_pseudo());
    candidates()
        .find(|(_, s)| s.level <= level)
        .or_else(|| candidates().next())
        .map(|(i, _)| i)
}

/// Whether `section` belongs to the subtree of `root` through a continuation.
fn continues_root(section: &Section, root: &Section) -> bool {
    section.continues == Some(root.id)
        || (root.continues.is_some() && section.continues == root.continues && section.level > root.level)
}

/// Index one past the last section in the full subtree of `sections[i]`.
pub(crate) fn full_scope_end(sections: &[Section], i: usize) -> usize {
    let root = &sections[i];
    sections[i + 1..]
        .iter()
        .position(|s| s.level <= root.level && !continues_root(s, root))
        .map(|p| i + 1 + p)
        .unwrap_or(sections.len())
}

/// Index one past the last section in the shallow scope of `sections[i]`:
/// the section itself plus directly following continuations.
pub(crate) fn shallow_scope_end(sections: &[Section], i: usize) -> usize {
    let root = &sections[i];
    sections[i + 1..]
        .iter()
        .position(|s| s.continues != Some(root.id))
        .map(|p| i + 1 + p)
        .unwrap_or(sections.len())
}

/// Ids of the sections in the subtree of `id` (excluding `id` itself).
pub fn descendants(sections: &[Section], id: BlockId) -> Vec<BlockId> {
    let Some(i) = sections.iter().position(|s| s.id == id) else {
        return Vec::new();
    };
    sections[i + 1..full_scope_end(sections, i)]
        .iter()
        .map(|s| s.id)
        .collect()
}

pub fn find_by_id(sections: &[Section], id: BlockId) -> Option<&Section> {
    sections.iter().find(|s| s.id == id)
}

/// Level corrections that remove skipped levels.
///
/// A heading deeper than its parent + 1 is pulled up to parent + 1; a
/// pseudo-section takes the level of the section it continues. Headings with
/// no parent keep their level. Returns only the headings that change, as
/// `(id, new_level)`.
pub fn enforce_levels(blocks: &[Block], matcher: &PseudoSectionMatcher) -> Vec<(BlockId, u8)> {
    let mut changes = Vec::new();
    // (id, effective level) of open non-pseudo headings.
    let mut stack: Vec<(BlockId, u8)> = Vec::new();
    // Effective levels so far, for continuation lookups.
    let mut effective: Vec<(BlockId, u8, bool)> = Vec::new();

    for block in blocks {
        if block.is_managed() {
            continue;
        }
        let Some(level) = block.heading_level() else {
            continue;
        };

        let pseudo = matcher.is_continuation(&block.text);
        let anchor_level = if pseudo {
            let non_pseudo = || effective.iter().rev().filter(|(_, _, p)| !p);
            non_pseudo()
                .find(|(_, l, _)| *l <= level)
                .or_else(|| non_pseudo().next())
                .map(|(_, l, _)| *l)
        } else {
            None
        };

        let new_level = match anchor_level {
            Some(l) => l,
            None => {
                while stack.last().is_some_and(|&(_, l)| l >= level) {
                    stack.pop();
                }
                match stack.last() {
                    Some(&(_, parent)) if level > parent + 1 => parent + 1,
                    _ => level,
                }
            }
        };

        if anchor_level.is_none() {
            stack.push((block.id, new_level));
        }
        effective.push((block.id, new_level, anchor_level.is_some()));
        if new_level != level {
            changes.push((block.id, new_level));
        }
    }
    changes
}
