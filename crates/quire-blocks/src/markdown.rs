//! Markdown ⇄ block conversion.
//!
//! The tokenizer is line-oriented and only knows enough markdown to delimit
//! blocks:
//!
//! ````text
//! # Intro            → Heading(1, "Intro")
//!                    (blank lines separate blocks)
//! Some prose         → Paragraph("Some prose\nacross lines")
//! across lines
//!
//! ```rust            → Structural (fenced code, never scanned for headings)
//! # not a heading
//! ```
//!
//! [^1]: A note.      → Paragraph, managed = FootnoteNotes
//! ````
//!
//! Parsing never fails: anything unrecognised degrades to a paragraph, and an
//! unclosed fence runs to the end of the input.
//!
//! Fragments are newline-terminated and [`assemble`] joins them with one more
//! newline, so `parse(assemble(blocks))` reproduces the same kinds and texts.

use std::sync::LazyLock;

use quire_types::{Block, BlockId, BlockKind, MAX_HEADING_LEVEL, ManagedRegion, OrderKey};
use regex::Regex;

use crate::order::keys_between;

/// Heading titles (case-insensitive) that open a bibliography region.
pub const DEFAULT_BIBLIOGRAPHY_TITLES: &[&str] = &["references", "bibliography", "works cited"];

static FOOTNOTE_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {0,3}\[\^([^\]\s]+)\]:").expect("footnote definition pattern")
});

/// Parser knobs.
#[derive(Clone, Debug)]
pub struct ParseOptions {
    /// Lowercase heading titles that open a bibliography region.
    pub bibliography_titles: Vec<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            bibliography_titles: DEFAULT_BIBLIOGRAPHY_TITLES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl ParseOptions {
    fn is_bibliography_title(&self, title: &str) -> bool {
        let title = title.trim().to_lowercase();
        self.bibliography_titles.iter().any(|t| *t == title)
    }
}

/// Footnote label of a definition line (`[^label]: ...`), if any.
pub fn footnote_definition_label(text: &str) -> Option<String> {
    FOOTNOTE_DEF
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

// ============================================================================
// Tokenizer
// ============================================================================

/// A raw block before ids and keys are assigned.
struct RawBlock {
    kind: BlockKind,
    level: Option<u8>,
    text: String,
    markdown: String,
}

struct Fence {
    marker: u8,
    len: usize,
}

fn strip_indent(line: &str) -> Option<&str> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    (indent <= 3).then(|| &line[indent..])
}

fn fence_open(line: &str) -> Option<Fence> {
    let rest = strip_indent(line)?;
    let marker = *rest.as_bytes().first()?;
    if marker != b'`' && marker != b'~' {
        return None;
    }
    let len = rest.bytes().take_while(|&c| c == marker).count();
    if len < 3 {
        return None;
    }
    // Backtick fences may not have backticks in the info string.
    if marker == b'`' && rest[len..].contains('`') {
        return None;
    }
    Some(Fence { marker, len })
}

fn fence_closes(fence: &Fence, line: &str) -> bool {
    let Some(rest) = strip_indent(line) else {
        return false;
    };
    let rest = rest.trim_end();
    let len = rest.bytes().take_while(|&c| c == fence.marker).count();
    len >= fence.len && len == rest.len()
}

fn atx_heading(line: &str) -> Option<(u8, String)> {
    let rest = strip_indent(line)?;
    let hashes = rest.bytes().take_while(|&c| c == b'#').count();
    if hashes == 0 || hashes > usize::from(MAX_HEADING_LEVEL) {
        return None;
    }
    let after = &rest[hashes..];
    if !(after.is_empty() || after.starts_with(' ') || after.starts_with('\t')) {
        return None;
    }
    let mut title = after.trim();
    // Optional closing sequence: "## Title ##"
    let without_close = title.trim_end_matches('#');
    if without_close.len() < title.len()
        && (without_close.is_empty() || without_close.ends_with(' ') || without_close.ends_with('\t'))
    {
        title = without_close.trim_end();
    }
    Some((hashes as u8, title.to_string()))
}

fn is_thematic_break(line: &str) -> bool {
    let Some(rest) = strip_indent(line) else {
        return false;
    };
    let compact: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && ["-", "*", "_"]
            .iter()
            .any(|m| compact.chars().all(|c| c.to_string() == *m))
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("<!--") && trimmed.ends_with("-->")
}

fn terminated(line: &str) -> String {
    if line.ends_with('\n') {
        line.to_string()
    } else {
        format!("{line}\n")
    }
}

fn tokenize(markdown: &str) -> Vec<RawBlock> {
    let mut out = Vec::new();
    let mut para: Vec<&str> = Vec::new();
    let mut fence: Option<(Fence, String)> = None;

    fn flush_para(para: &mut Vec<&str>, out: &mut Vec<RawBlock>) {
        if para.is_empty() {
            return;
        }
        let markdown: String = para.iter().map(|l| terminated(l)).collect();
        let text = markdown.trim_end_matches('\n').to_string();
        out.push(RawBlock {
            kind: BlockKind::Paragraph,
            level: None,
            text,
            markdown,
        });
        para.clear();
    }

    for line in markdown.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);

        if let Some((open, mut body)) = fence.take() {
            body.push_str(&terminated(line));
            if fence_closes(&open, bare) {
                out.push(RawBlock {
                    kind: BlockKind::Structural,
                    level: None,
                    text: body.trim_end_matches('\n').to_string(),
                    markdown: body,
                });
            } else {
                fence = Some((open, body));
            }
            continue;
        }

        if bare.trim().is_empty() {
            flush_para(&mut para, &mut out);
            continue;
        }

        if let Some(open) = fence_open(bare) {
            flush_para(&mut para, &mut out);
            fence = Some((open, terminated(line)));
            continue;
        }

        if let Some((level, title)) = atx_heading(bare) {
            flush_para(&mut para, &mut out);
            out.push(RawBlock {
                kind: BlockKind::Heading,
                level: Some(level),
                text: title,
                markdown: terminated(bare),
            });
            continue;
        }

        if para.is_empty() && (is_thematic_break(bare) || is_comment_line(bare)) {
            out.push(RawBlock {
                kind: BlockKind::Structural,
                level: None,
                text: bare.trim().to_string(),
                markdown: terminated(bare),
            });
            continue;
        }

        // Each footnote definition is its own block.
        if FOOTNOTE_DEF.is_match(bare) {
            flush_para(&mut para, &mut out);
        }
        para.push(bare);
    }

    flush_para(&mut para, &mut out);
    if let Some((_, body)) = fence {
        // Unclosed fence: runs to end of input.
        out.push(RawBlock {
            kind: BlockKind::Structural,
            level: None,
            text: body.trim_end_matches('\n').to_string(),
            markdown: body,
        });
    }
    out
}

/// Flag bibliography regions and footnote definitions.
fn flag_managed(blocks: &mut [Block], opts: &ParseOptions) {
    let mut bibliography_level: Option<u8> = None;
    for block in blocks.iter_mut() {
        if let Some(level) = block.heading_level() {
            if bibliography_level.is_some_and(|b| level <= b) {
                bibliography_level = None;
            }
            if bibliography_level.is_none() && opts.is_bibliography_title(&block.text) {
                bibliography_level = Some(level);
            }
        }

        block.managed = if block.kind == BlockKind::Paragraph
            && footnote_definition_label(&block.text).is_some()
        {
            Some(ManagedRegion::FootnoteNotes)
        } else if bibliography_level.is_some() {
            Some(ManagedRegion::Bibliography)
        } else {
            None
        };
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Parse markdown into blocks with fresh ids and densely assigned keys.
pub fn parse(markdown: &str) -> Vec<Block> {
    parse_with(markdown, &ParseOptions::default())
}

/// Parse with explicit options.
pub fn parse_with(markdown: &str, opts: &ParseOptions) -> Vec<Block> {
    let raw = tokenize(markdown);
    let keys = keys_between(None, None, raw.len());
    let mut blocks: Vec<Block> = raw
        .into_iter()
        .zip(keys)
        .map(|(r, key)| Block {
            id: BlockId::new(),
            kind: r.kind,
            level: r.level,
            text: r.text,
            markdown: r.markdown,
            key,
            managed: None,
        })
        .collect();
    flag_managed(&mut blocks, opts);
    blocks
}

/// Re-parse after an edit, keeping identity and keys wherever possible.
///
/// `previous` must be in document order. Blocks whose (kind, text) survive
/// keep their id and key; an edited block sitting where a block of the same
/// kind used to be keeps that block's id (a retitled heading stays the same
/// section). Everything else gets a fresh id and a key interpolated between
/// its kept neighbours.
pub fn parse_with_previous(markdown: &str, previous: &[Block], opts: &ParseOptions) -> Vec<Block> {
    let mut blocks = parse_with(markdown, opts);
    reconcile_identity(&mut blocks, previous);
    blocks
}

/// Carry ids (and keys) from `previous` onto `blocks`. Both in document order.
pub fn reconcile_identity(blocks: &mut [Block], previous: &[Block]) {
    let pairs = align(blocks, previous);

    let mut kept: Vec<Option<OrderKey>> = vec![None; blocks.len()];
    for &(new_idx, old_idx) in &pairs {
        blocks[new_idx].id = previous[old_idx].id;
        kept[new_idx] = Some(previous[old_idx].key.clone());
    }

    // Fill key gaps between kept neighbours.
    let mut i = 0;
    let mut lower: Option<OrderKey> = None;
    while i < blocks.len() {
        if let Some(key) = kept[i].take() {
            blocks[i].key = key.clone();
            lower = Some(key);
            i += 1;
            continue;
        }
        let gap_start = i;
        while i < blocks.len() && kept[i].is_none() {
            i += 1;
        }
        let upper = kept.get(i).cloned().flatten();
        let fresh = keys_between(lower.as_ref(), upper.as_ref(), i - gap_start);
        for (block, key) in blocks[gap_start..i].iter_mut().zip(fresh) {
            block.key = key;
        }
    }
}

/// Order-preserving pairing of new blocks with previous ones.
///
/// Exact (kind, text) matches via longest common subsequence, then positional
/// same-kind pairing inside each unmatched gap.
fn align(blocks: &[Block], previous: &[Block]) -> Vec<(usize, usize)> {
    let same = |a: &Block, b: &Block| a.kind == b.kind && a.text == b.text;

    // Trim common prefix/suffix before the quadratic part.
    let mut prefix = 0;
    while prefix < blocks.len()
        && prefix < previous.len()
        && same(&blocks[prefix], &previous[prefix])
    {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < blocks.len() - prefix
        && suffix < previous.len() - prefix
        && same(
            &blocks[blocks.len() - 1 - suffix],
            &previous[previous.len() - 1 - suffix],
        )
    {
        suffix += 1;
    }

    let new_mid = &blocks[prefix..blocks.len() - suffix];
    let old_mid = &previous[prefix..previous.len() - suffix];

    // LCS table over the middle.
    let (n, m) = (new_mid.len(), old_mid.len());
    let mut table = vec![0u32; (n + 1) * (m + 1)];
    let at = |i: usize, j: usize| i * (m + 1) + j;
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[at(i, j)] = if same(&new_mid[i], &old_mid[j]) {
                table[at(i + 1, j + 1)] + 1
            } else {
                table[at(i + 1, j)].max(table[at(i, j + 1)])
            };
        }
    }

    let mut exact = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if same(&new_mid[i], &old_mid[j]) {
            exact.push((i, j));
            i += 1;
            j += 1;
        } else if table[at(i + 1, j)] >= table[at(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }

    // Positional pairing inside each gap between exact matches.
    let mut pairs: Vec<(usize, usize)> = (0..prefix).map(|k| (k, k)).collect();
    let mut gap_new = 0;
    let mut gap_old = 0;
    let anchors = exact.iter().copied().chain(std::iter::once((n, m)));
    for (an, ao) in anchors {
        let mut next_old = gap_old;
        for ni in gap_new..an {
            if let Some(oj) = (next_old..ao).find(|&oj| new_mid[ni].kind == old_mid[oj].kind) {
                pairs.push((prefix + ni, prefix + oj));
                next_old = oj + 1;
            }
        }
        if an < n {
            pairs.push((prefix + an, prefix + ao));
        }
        gap_new = an + 1;
        gap_old = ao + 1;
    }
    for k in 0..suffix {
        pairs.push((blocks.len() - suffix + k, previous.len() - suffix + k));
    }
    pairs
}

/// Join fragments with one line break between blocks.
pub fn join_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for (i, fragment) in fragments.into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(fragment);
        if !fragment.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Reassemble blocks into markdown, in key order.
pub fn assemble(blocks: &[Block]) -> String {
    let mut ordered: Vec<&Block> = blocks.iter().collect();
    ordered.sort_by(|a, b| a.key.cmp(&b.key));
    join_fragments(ordered.into_iter().map(|b| b.markdown.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_and_texts(blocks: &[Block]) -> Vec<(BlockKind, Option<u8>, String)> {
        blocks.iter().map(|b| (b.kind, b.level, b.text.clone())).collect()
    }

    #[test]
    fn test_parse_headings_and_paragraphs() {
        let blocks = parse("# Intro\n\nFirst line\nsecond line\n\n## Background\nText\n");
        assert_eq!(
            kinds_and_texts(&blocks),
            vec![
                (BlockKind::Heading, Some(1), "Intro".to_string()),
                (BlockKind::Paragraph, None, "First line\nsecond line".to_string()),
                (BlockKind::Heading, Some(2), "Background".to_string()),
                (BlockKind::Paragraph, None, "Text".to_string()),
            ]
        );
        for pair in blocks.windows(2) {
            assert!(pair[0].key < pair[1].key);
        }
    }

    #[test]
    fn test_fenced_code_hides_headings() {
        let md = "# Real\n\n```md\n# not a heading\n\nstill code\n```\n\nafter\n";
        let blocks = parse(md);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].kind, BlockKind::Structural);
        assert!(blocks[1].text.contains("# not a heading"));
        assert_eq!(blocks.iter().filter(|b| b.is_heading()).count(), 1);
    }

    #[test]
    fn test_unclosed_fence_runs_to_end() {
        let blocks = parse("intro\n\n~~~\n# hidden\n");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].kind, BlockKind::Structural);
        assert_eq!(blocks[1].markdown, "~~~\n# hidden\n");
    }

    #[test]
    fn test_malformed_degrades_to_paragraphs() {
        let blocks = parse("#nospace\n####### seven\n   \n    # indented code\n");
        assert!(blocks.iter().all(|b| b.kind == BlockKind::Paragraph));
    }

    #[test]
    fn test_heading_closing_sequence_stripped() {
        let blocks = parse("## Title ##\n");
        assert_eq!(blocks[0].text, "Title");
        assert_eq!(blocks[0].markdown, "## Title ##\n");
    }

    #[test]
    fn test_round_trip_preserves_kinds_and_text() {
        let md = "# A\nbody right under\n---\n\n***\n\n<!-- note -->\n\n```\ncode\n\n# x\n```\n## B\n\n[^1]: one\n[^2]: two\n";
        let first = parse(md);
        let second = parse(&assemble(&first));
        assert_eq!(kinds_and_texts(&first), kinds_and_texts(&second));
        assert_eq!(assemble(&first), assemble(&second));
    }

    #[test]
    fn test_assemble_single_separator() {
        let blocks = parse("# A\n\n\n\ntext\n");
        assert_eq!(assemble(&blocks), "# A\n\ntext\n");
        assert_eq!(assemble(&[]), "");
    }

    #[test]
    fn test_footnotes_and_bibliography_flagged() {
        let md = "# Body\n\nSee[^a].\n\n[^a]: The note.\n\n# References\n\nSmith 2020.\n\n## Extra\n\nMore refs.\n\n# Appendix\n\nFree text.\n";
        let blocks = parse(md);
        let flags: Vec<_> = blocks.iter().map(|b| (b.text.as_str(), b.managed)).collect();
        assert_eq!(flags[0], ("Body", None));
        assert_eq!(flags[1], ("See[^a].", None));
        assert_eq!(flags[2], ("[^a]: The note.", Some(ManagedRegion::FootnoteNotes)));
        assert_eq!(flags[3], ("References", Some(ManagedRegion::Bibliography)));
        assert_eq!(flags[4].1, Some(ManagedRegion::Bibliography));
        assert_eq!(flags[5], ("Extra", Some(ManagedRegion::Bibliography)));
        assert_eq!(flags[7], ("Appendix", None));
        assert_eq!(flags[8].1, None);
    }

    #[test]
    fn test_reparse_keeps_unchanged_identity() {
        let before = parse("# A\n\none\n\n# B\n\ntwo\n");
        let after = parse_with_previous(
            "# A\n\none\n\ninserted\n\n# B\n\ntwo\n",
            &before,
            &ParseOptions::default(),
        );
        assert_eq!(after.len(), 5);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[1].id, before[1].id);
        assert_eq!(after[3].id, before[2].id);
        assert_eq!(after[4].id, before[3].id);
        assert_eq!(after[3].key, before[2].key);
        assert!(after[1].key < after[2].key && after[2].key < after[3].key);
    }

    #[test]
    fn test_reparse_keeps_identity_of_renamed_heading() {
        let before = parse("# Intro\n\nbody\n\n# Next\n");
        let after = parse_with_previous(
            "# Introduction\n\nbody\n\n# Next\n",
            &before,
            &ParseOptions::default(),
        );
        assert_eq!(after[0].text, "Introduction");
        assert_eq!(after[0].id, before[0].id);
    }

    #[test]
    fn test_reparse_distinguishes_duplicate_titles() {
        let before = parse("# Notes\n\nfirst\n\n# Notes\n\nsecond\n");
        let after = parse_with_previous(
            "# Notes\n\nfirst\n\n# Notes\n\nsecond edited\n",
            &before,
            &ParseOptions::default(),
        );
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[2].id, before[2].id);
        assert_ne!(after[0].id, after[2].id);
        // edited paragraph keeps its slot identity
        assert_eq!(after[3].id, before[3].id);
    }

    #[test]
    fn test_footnote_definition_label() {
        assert_eq!(footnote_definition_label("[^abc]: text"), Some("abc".to_string()));
        assert_eq!(footnote_definition_label("see [^abc]"), None);
    }
}
