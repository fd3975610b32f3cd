//! Cursor mapping between the tree view and flat markdown.
//!
//! The tree view counts positions the way a rich-text document model does:
//!
//! - entering and leaving a block container (paragraph, heading, list, item,
//!   quote, code block, ...) each take one position
//! - every rendered character, soft break and hard break takes one
//! - inline marks (emphasis, strong, strikethrough, links) take none
//! - an image is atomic and takes one
//!
//! [`PositionMap`] records a *slot* for every cursor position that sits
//! between rendered characters, pairing the tree position with the source
//! byte it corresponds to. Going tree → source uses the first slot for a
//! position; going source → tree uses the last slot at or before the source
//! offset, which snaps positions inside markup or an image to the nearest
//! valid cursor spot.
//!
//! ```text
//! source:  a * * b * *
//! bytes:   0 1 2 3 4 5 6
//! slots:  (1,0) (2,1) (2,3) (3,4)
//!                ^ first slot for tree 2 (before the `**`)
//! ```

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use ropey::Rope;
use serde::{Deserialize, Serialize};

/// Zero-based line and character column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

impl LineCol {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl std::fmt::Display for LineCol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.col + 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Slot {
    tree: usize,
    byte: usize,
}

/// Position map for one markdown document.
#[derive(Clone, Debug)]
pub struct PositionMap {
    rope: Rope,
    slots: Vec<Slot>,
    tree_len: usize,
}

fn is_inline_mark(tag: &Tag<'_>) -> bool {
    matches!(
        tag,
        Tag::Emphasis | Tag::Strong | Tag::Strikethrough | Tag::Link { .. }
    )
}

fn is_inline_mark_end(tag: &TagEnd) -> bool {
    matches!(
        tag,
        TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough | TagEnd::Link
    )
}

struct Builder<'a> {
    source: &'a str,
    slots: Vec<Slot>,
    tree: usize,
}

impl Builder<'_> {
    fn slot(&mut self, byte: usize) {
        self.slots.push(Slot {
            tree: self.tree,
            byte,
        });
    }

    /// One atomic unit spanning `start..end` in the source.
    fn atom(&mut self, start: usize, end: usize) {
        self.slot(start);
        self.tree += 1;
        self.slot(end);
    }

    /// Rendered text whose source lies somewhere in `start..end`.
    ///
    /// Characters are located by a greedy forward search, which skips escape
    /// backslashes and delimiters. A character that never appears literally
    /// (a decoded entity) is pinned to the current offset and the entity is
    /// skipped.
    fn text(&mut self, text: &str, start: usize, end: usize) {
        let end = end.min(self.source.len());
        let mut at = start.min(end);
        for c in text.chars() {
            let window = &self.source[at..end];
            let (found, len) = match window.find(c) {
                Some(p) => (at + p, c.len_utf8()),
                None if window.starts_with('&') => {
                    let len = window.find(';').map(|p| p + 1).unwrap_or(1);
                    (at, len)
                }
                None => (at, window.chars().next().map(char::len_utf8).unwrap_or(0)),
            };
            self.slot(found);
            self.tree += 1;
            at = found + len;
        }
        self.slot(at);
    }
}

impl PositionMap {
    pub fn new(markdown: &str) -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_TASKLISTS);

        let mut b = Builder {
            source: markdown,
            slots: Vec::new(),
            tree: 0,
        };
        let mut image_depth = 0usize;

        for (event, range) in Parser::new_ext(markdown, options).into_offset_iter() {
            if image_depth > 0 {
                // Alt text is inside the atom.
                match event {
                    Event::Start(Tag::Image { .. }) => image_depth += 1,
                    Event::End(TagEnd::Image) => image_depth -= 1,
                    _ => {}
                }
                continue;
            }
            match event {
                Event::Start(Tag::Image { .. }) => {
                    image_depth = 1;
                    b.atom(range.start, range.end);
                }
                Event::Start(tag) if is_inline_mark(&tag) => {}
                Event::End(tag) if is_inline_mark_end(&tag) => {}
                Event::Start(_) | Event::End(_) => b.tree += 1,
                Event::Text(text) | Event::Code(text) => b.text(&text, range.start, range.end),
                Event::SoftBreak | Event::HardBreak => b.atom(range.start, range.end),
                Event::Rule | Event::FootnoteReference(_) => b.atom(range.start, range.end),
                _ => {}
            }
        }

        Self {
            rope: Rope::from_str(markdown),
            tree_len: b.tree,
            slots: b.slots,
        }
    }

    /// Total tree positions in the document.
    pub fn tree_len(&self) -> usize {
        self.tree_len
    }

    /// Tree positions that are valid cursor slots, ascending.
    pub fn cursor_positions(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.slots.iter().map(|s| s.tree).collect();
        out.dedup();
        out
    }

    // ── flat offsets ────────────────────────────────────────────────────

    /// Character offset → line/column. Clamped to the document.
    pub fn offset_to_line_col(&self, offset: usize) -> LineCol {
        let offset = offset.min(self.rope.len_chars());
        let line = self.rope.char_to_line(offset);
        LineCol {
            line,
            col: offset - self.rope.line_to_char(line),
        }
    }

    /// Line/column → character offset. Lines past the end clamp to the last
    /// line; columns past the end of a line clamp to its end.
    pub fn line_col_to_offset(&self, pos: LineCol) -> usize {
        let last_line = self.rope.len_lines().saturating_sub(1);
        let line = pos.line.min(last_line);
        let start = self.rope.line_to_char(line);
        let slice = self.rope.line(line);
        let mut len = slice.len_chars();
        // Exclude the line terminator.
        while len > 0 && matches!(slice.char(len - 1), '\n' | '\r') {
            len -= 1;
        }
        start + pos.col.min(len)
    }

    // ── tree positions ──────────────────────────────────────────────────

    fn byte_to_line_col(&self, byte: usize) -> LineCol {
        let byte = byte.min(self.rope.len_bytes());
        self.offset_to_line_col(self.rope.byte_to_char(byte))
    }

    /// Tree position → line/column. Positions between slots (block
    /// boundaries) resolve to the next slot.
    pub fn tree_to_line_col(&self, tree: usize) -> LineCol {
        let idx = self.slots.partition_point(|s| s.tree < tree);
        match self.slots.get(idx).or(self.slots.last()) {
            Some(slot) => self.byte_to_line_col(slot.byte),
            None => LineCol::default(),
        }
    }

    /// Line/column → tree position, snapped to a valid cursor slot.
    pub fn line_col_to_tree(&self, pos: LineCol) -> usize {
        let byte = self.rope.char_to_byte(self.line_col_to_offset(pos));
        let idx = self.slots.partition_point(|s| s.byte <= byte);
        match idx {
            0 => self.slots.first().map(|s| s.tree).unwrap_or(0),
            i => self.slots[i - 1].tree,
        }
    }

    /// Nearest line/column that is a valid tree cursor slot.
    pub fn snap_line_col(&self, pos: LineCol) -> LineCol {
        if self.slots.is_empty() {
            return self.offset_to_line_col(self.line_col_to_offset(pos));
        }
        self.tree_to_line_col(self.line_col_to_tree(pos))
    }
}
