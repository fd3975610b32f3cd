//! Block types: the atomic unit of canonical document content.
//!
//! ## Design: BlockKind + ManagedRegion
//!
//! `BlockKind` has 3 variants covering what a block *is*.
//! Merge-rule metadata lives in the companion `ManagedRegion` flag:
//!
//! - `Bibliography`: blocks under the references heading, rewritten only by
//!   bibliography updates and never zoomed into
//! - `FootnoteNotes`: footnote definitions (`[^label]: ...`), merged by label
//!
//! A block's `markdown` fragment always ends with a newline; joining fragments
//! with one more newline yields a blank line between blocks.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::BlockId;
use crate::order::OrderKey;

/// Deepest ATX heading level.
pub const MAX_HEADING_LEVEL: u8 = 6;

/// What a block *is* (content type).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum BlockKind {
    /// ATX heading (`#` .. `######`).
    Heading,
    /// Run of non-blank lines.
    #[default]
    #[strum(serialize = "paragraph", serialize = "para")]
    Paragraph,
    /// Fenced code, thematic breaks, HTML comments: anything that is not
    /// prose and must never be scanned for headings.
    #[strum(serialize = "structural", serialize = "other")]
    Structural,
}

impl BlockKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Heading => "heading",
            BlockKind::Paragraph => "paragraph",
            BlockKind::Structural => "structural",
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Regions with special merge rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum ManagedRegion {
    /// Bibliography heading and its entries.
    #[strum(serialize = "bibliography", serialize = "references")]
    Bibliography,
    /// Footnote definitions.
    #[serde(rename = "footnote_notes")]
    #[strum(serialize = "footnote_notes", serialize = "notes")]
    FootnoteNotes,
}

impl ManagedRegion {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagedRegion::Bibliography => "bibliography",
            ManagedRegion::FootnoteNotes => "footnote_notes",
        }
    }
}

impl std::fmt::Display for ManagedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One block of canonical content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Stable identity.
    pub id: BlockId,
    /// Content type.
    pub kind: BlockKind,
    /// Heading level (1..=6); `None` for non-headings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// Heading title, or the block body for paragraphs and structural blocks.
    pub text: String,
    /// Raw markdown fragment, newline-terminated.
    pub markdown: String,
    /// Fractional sort key.
    pub key: OrderKey,
    /// Managed region flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed: Option<ManagedRegion>,
}

impl Block {
    /// A new heading block. Level is clamped to 1..=6.
    ///
    /// The key is a placeholder; stores assign real keys on insertion.
    pub fn heading(level: u8, title: impl Into<String>) -> Self {
        let level = level.clamp(1, MAX_HEADING_LEVEL);
        let title = title.into();
        Self {
            id: BlockId::new(),
            kind: BlockKind::Heading,
            level: Some(level),
            markdown: heading_markdown(level, &title),
            text: title,
            key: OrderKey::middle(),
            managed: None,
        }
    }

    /// A new paragraph block.
    pub fn paragraph(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: BlockId::new(),
            kind: BlockKind::Paragraph,
            level: None,
            markdown: terminated(&text),
            text,
            key: OrderKey::middle(),
            managed: None,
        }
    }

    /// Builder-style managed flag.
    pub fn with_managed(mut self, region: ManagedRegion) -> Self {
        self.managed = Some(region);
        self
    }

    /// Builder-style key.
    pub fn with_key(mut self, key: OrderKey) -> Self {
        self.key = key;
        self
    }

    pub fn is_heading(&self) -> bool {
        self.kind == BlockKind::Heading
    }

    pub fn is_managed(&self) -> bool {
        self.managed.is_some()
    }

    /// Heading level, or `None` for non-headings.
    pub fn heading_level(&self) -> Option<u8> {
        if self.is_heading() { self.level } else { None }
    }

    /// Whitespace-separated word count of the text content.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Retitle a heading, rewriting its fragment. No-op for other kinds.
    pub fn set_title(&mut self, title: impl Into<String>) {
        if let Some(level) = self.heading_level() {
            self.text = title.into();
            self.markdown = heading_markdown(level, &self.text);
        }
    }

    /// Change a heading's level, rewriting its fragment. No-op for other kinds.
    pub fn set_level(&mut self, level: u8) {
        if self.is_heading() {
            let level = level.clamp(1, MAX_HEADING_LEVEL);
            self.level = Some(level);
            self.markdown = heading_markdown(level, &self.text);
        }
    }
}

/// Render an ATX heading line.
pub fn heading_markdown(level: u8, title: &str) -> String {
    let hashes = "#".repeat(usize::from(level.clamp(1, MAX_HEADING_LEVEL)));
    if title.is_empty() {
        format!("{hashes}\n")
    } else {
        format!("{hashes} {title}\n")
    }
}

fn terminated(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_kind_from_str_aliases() {
        assert_eq!(BlockKind::from_str("HEADING"), Some(BlockKind::Heading));
        assert_eq!(BlockKind::from_str("para"), Some(BlockKind::Paragraph));
        assert_eq!(BlockKind::from_str("other"), Some(BlockKind::Structural));
        assert_eq!(BlockKind::from_str("table"), None);
    }

    #[test]
    fn test_heading_constructor_renders_fragment() {
        let h = Block::heading(2, "Background");
        assert_eq!(h.markdown, "## Background\n");
        assert_eq!(h.heading_level(), Some(2));

        let clamped = Block::heading(9, "Deep");
        assert_eq!(clamped.level, Some(6));
    }

    #[test]
    fn test_set_title_and_level_keep_identity() {
        let mut h = Block::heading(1, "Intro");
        let id = h.id;
        h.set_title("Introduction");
        h.set_level(2);
        assert_eq!(h.id, id);
        assert_eq!(h.markdown, "## Introduction\n");
    }

    #[test]
    fn test_paragraph_ignores_heading_setters() {
        let mut p = Block::paragraph("some words here");
        p.set_title("nope");
        p.set_level(3);
        assert_eq!(p.text, "some words here");
        assert_eq!(p.level, None);
        assert_eq!(p.word_count(), 3);
    }

    #[test]
    fn test_managed_region_serde_names() {
        let json = serde_json::to_string(&ManagedRegion::FootnoteNotes).unwrap();
        assert_eq!(json, "\"footnote_notes\"");
        let b = Block::paragraph("[^1]: note").with_managed(ManagedRegion::FootnoteNotes);
        assert!(b.is_managed());
    }
}
