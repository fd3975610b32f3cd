//! Block store: the canonical, ordered collection of blocks for a document.
//!
//! Blocks live in a `BTreeMap` keyed by [`OrderKey`], so iteration order *is*
//! document order and two blocks can never share a key. A side index maps
//! [`BlockId`] to key for identity lookups.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use quire_types::{Block, BlockId, DocumentId, ManagedRegion, OrderKey};

use crate::markdown::{self, ParseOptions, footnote_definition_label};
use crate::order::keys_between;
use crate::{Result, StoreError};

/// Ordered block collection with a mutation version counter.
#[derive(Clone, Debug)]
pub struct BlockStore {
    /// Document this store belongs to.
    document_id: DocumentId,

    /// Blocks in document order.
    blocks: BTreeMap<OrderKey, Block>,

    /// Identity index.
    index: HashMap<BlockId, OrderKey>,

    /// Store version (bumped on any mutation).
    version: u64,
}

impl BlockStore {
    /// Create a new empty store.
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            blocks: BTreeMap::new(),
            index: HashMap::new(),
            version: 0,
        }
    }

    /// Build a store from blocks that already carry distinct ids and keys.
    pub fn from_blocks(document_id: DocumentId, blocks: Vec<Block>) -> Result<Self> {
        let mut store = Self::new(document_id);
        for block in blocks {
            store.insert_unique(block)?;
        }
        Ok(store)
    }

    /// Parse markdown into a fresh store.
    pub fn from_markdown(document_id: DocumentId, markdown: &str, opts: &ParseOptions) -> Self {
        let mut store = Self::new(document_id);
        for block in markdown::parse_with(markdown, opts) {
            store.index.insert(block.id, block.key.clone());
            store.blocks.insert(block.key.clone(), block);
        }
        store
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Get the current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Get a block by ID.
    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.index.get(id).and_then(|key| self.blocks.get(key))
    }

    /// Get a block by key.
    pub fn get_by_key(&self, key: &OrderKey) -> Option<&Block> {
        self.blocks.get(key)
    }

    pub fn contains_key(&self, key: &OrderKey) -> bool {
        self.blocks.contains_key(key)
    }

    /// Blocks in document order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Blocks in document order, cloned.
    pub fn blocks_ordered(&self) -> Vec<Block> {
        self.blocks.values().cloned().collect()
    }

    /// Blocks with keys in `[start, end)`; `end = None` runs to the end.
    pub fn range(&self, start: &OrderKey, end: Option<&OrderKey>) -> impl Iterator<Item = &Block> {
        let upper = match end {
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        self.blocks
            .range((Bound::Included(start.clone()), upper))
            .map(|(_, b)| b)
    }

    /// Key of the block immediately before `key`.
    pub fn predecessor_key(&self, key: &OrderKey) -> Option<&OrderKey> {
        self.blocks.range(..key.clone()).next_back().map(|(k, _)| k)
    }

    /// Key of the block immediately after `key`.
    pub fn successor_key(&self, key: &OrderKey) -> Option<&OrderKey> {
        self.blocks
            .range((Bound::Excluded(key.clone()), Bound::Unbounded))
            .next()
            .map(|(k, _)| k)
    }

    pub fn last_key(&self) -> Option<&OrderKey> {
        self.blocks.keys().next_back()
    }

    /// Assemble the whole document as markdown.
    pub fn assemble(&self) -> String {
        markdown::join_fragments(self.blocks.values().map(|b| b.markdown.as_str()))
    }

    /// Footnote definition block for `label`.
    pub fn footnote_definition(&self, label: &str) -> Option<&Block> {
        self.blocks.values().find(|b| {
            b.managed == Some(ManagedRegion::FootnoteNotes)
                && footnote_definition_label(&b.text).as_deref() == Some(label)
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn insert_unique(&mut self, block: Block) -> Result<()> {
        if self.index.contains_key(&block.id) {
            return Err(StoreError::DuplicateBlock(block.id));
        }
        if self.blocks.contains_key(&block.key) {
            return Err(StoreError::KeyOrder(format!("duplicate key {}", block.key)));
        }
        self.index.insert(block.id, block.key.clone());
        self.blocks.insert(block.key.clone(), block);
        Ok(())
    }

    fn remove_key(&mut self, key: &OrderKey) -> Option<Block> {
        let block = self.blocks.remove(key)?;
        self.index.remove(&block.id);
        Some(block)
    }

    /// Reject incoming ids that already live outside `replaced`.
    fn check_ids(&self, incoming: &[Block], replaced: &HashSet<BlockId>) -> Result<()> {
        let mut seen = HashSet::new();
        for block in incoming {
            if !seen.insert(block.id) {
                return Err(StoreError::DuplicateBlock(block.id));
            }
            if self.index.contains_key(&block.id) && !replaced.contains(&block.id) {
                return Err(StoreError::DuplicateBlock(block.id));
            }
        }
        Ok(())
    }

    fn insert_between(
        &mut self,
        lo: Option<&OrderKey>,
        hi: Option<&OrderKey>,
        blocks: Vec<Block>,
    ) -> Vec<OrderKey> {
        let keys = keys_between(lo, hi, blocks.len());
        for (mut block, key) in blocks.into_iter().zip(keys.iter().cloned()) {
            block.key = key.clone();
            self.index.insert(block.id, key.clone());
            self.blocks.insert(key, block);
        }
        keys
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Replace the unmanaged blocks in `[start, end)` with `blocks`.
    ///
    /// Managed blocks inside the range are left in place. A new block whose id
    /// was in the range lands on the same side of each managed block as
    /// before; a fresh block follows its predecessor. Blocks outside the range
    /// are untouched. Returns the keys assigned to the new blocks, in order.
    ///
    /// Fails with [`StoreError::ScopeMissing`] when either boundary key is no
    /// longer present. The store is unchanged on error.
    pub fn replace_range(
        &mut self,
        blocks: Vec<Block>,
        start: &OrderKey,
        end: Option<&OrderKey>,
    ) -> Result<Vec<OrderKey>> {
        if !self.blocks.contains_key(start) {
            return Err(StoreError::ScopeMissing(start.clone()));
        }
        if let Some(end) = end {
            if !self.blocks.contains_key(end) {
                return Err(StoreError::ScopeMissing(end.clone()));
            }
            if end <= start {
                return Err(StoreError::KeyOrder(format!("range end {end} <= start {start}")));
            }
        }

        let in_range: Vec<(OrderKey, BlockId, bool)> = self
            .range(start, end)
            .map(|b| (b.key.clone(), b.id, b.is_managed()))
            .collect();
        let replaced: HashSet<BlockId> = in_range
            .iter()
            .filter(|(_, _, managed)| !managed)
            .map(|(_, id, _)| *id)
            .collect();
        self.check_ids(&blocks, &replaced)?;

        // Segment i is the gap in front of kept managed block i; the last
        // segment runs to `end`.
        let mut kept: Vec<OrderKey> = Vec::new();
        let mut old_segment: HashMap<BlockId, usize> = HashMap::new();
        for (key, id, managed) in &in_range {
            if *managed {
                kept.push(key.clone());
            } else {
                old_segment.insert(*id, kept.len());
            }
        }
        let leading = in_range.iter().take_while(|(_, _, managed)| *managed).count();

        let mut segments: Vec<Vec<Block>> = vec![Vec::new(); kept.len() + 1];
        let mut segment = leading;
        for block in blocks {
            if let Some(&seen) = old_segment.get(&block.id) {
                segment = segment.max(seen);
            }
            segments[segment].push(block);
        }

        let lo = self.predecessor_key(start).cloned();
        for (key, _, managed) in &in_range {
            if !managed {
                self.remove_key(key);
            }
        }

        let mut keys = Vec::new();
        for (i, group) in segments.into_iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            let left = if i == 0 { lo.clone() } else { Some(kept[i - 1].clone()) };
            let right = kept.get(i).cloned().or_else(|| end.cloned());
            keys.extend(self.insert_between(left.as_ref(), right.as_ref(), group));
        }
        self.version += 1;
        tracing::debug!(
            removed = replaced.len(),
            inserted = keys.len(),
            version = self.version,
            "replaced range"
        );
        Ok(keys)
    }

    /// Replace every block. Keys must be strictly increasing in input order.
    pub fn full_replace(&mut self, blocks: Vec<Block>) -> Result<()> {
        for pair in blocks.windows(2) {
            if pair[0].key >= pair[1].key {
                return Err(StoreError::KeyOrder(format!(
                    "{} is not before {}",
                    pair[0].key, pair[1].key
                )));
            }
        }
        let mut seen = HashSet::new();
        for block in &blocks {
            if !seen.insert(block.id) {
                return Err(StoreError::DuplicateBlock(block.id));
            }
        }

        self.blocks.clear();
        self.index.clear();
        for block in blocks {
            self.index.insert(block.id, block.key.clone());
            self.blocks.insert(block.key.clone(), block);
        }
        self.version += 1;
        Ok(())
    }

    /// Re-parse the whole document, keeping identity where text survives.
    pub fn apply_markdown(&mut self, markdown: &str, opts: &ParseOptions) -> Result<()> {
        let previous = self.blocks_ordered();
        let blocks = markdown::parse_with_previous(markdown, &previous, opts);
        self.full_replace(blocks)
    }

    /// Insert blocks after `after` (`None` = at the start). Returns new keys.
    pub fn insert_after(&mut self, after: Option<&OrderKey>, blocks: Vec<Block>) -> Result<Vec<OrderKey>> {
        if let Some(after) = after {
            if !self.blocks.contains_key(after) {
                return Err(StoreError::ScopeMissing(after.clone()));
            }
        }
        self.check_ids(&blocks, &HashSet::new())?;
        let hi = match after {
            Some(after) => self.successor_key(after).cloned(),
            None => self.blocks.keys().next().cloned(),
        };
        let keys = self.insert_between(after, hi.as_ref(), blocks);
        self.version += 1;
        Ok(keys)
    }

    /// Append blocks at the end of the document. Returns new keys.
    pub fn append(&mut self, blocks: Vec<Block>) -> Result<Vec<OrderKey>> {
        let last = self.last_key().cloned();
        self.check_ids(&blocks, &HashSet::new())?;
        let keys = self.insert_between(last.as_ref(), None, blocks);
        self.version += 1;
        Ok(keys)
    }

    /// Remove a block by ID.
    pub fn remove(&mut self, id: &BlockId) -> Result<Block> {
        let key = self.index.get(id).cloned().ok_or(StoreError::BlockNotFound(*id))?;
        let block = self.remove_key(&key).ok_or(StoreError::BlockNotFound(*id))?;
        self.version += 1;
        Ok(block)
    }

    /// Edit a block in place. Identity and key are restored after `f` runs.
    pub fn update_block(&mut self, id: &BlockId, f: impl FnOnce(&mut Block)) -> Result<()> {
        let key = self.index.get(id).cloned().ok_or(StoreError::BlockNotFound(*id))?;
        let block = self.blocks.get_mut(&key).ok_or(StoreError::BlockNotFound(*id))?;
        f(block);
        block.id = *id;
        block.key = key;
        self.version += 1;
        Ok(())
    }

    /// Move `ids` (any order; moved in document order) to sit between `after`
    /// and its successor. `after = None` moves them to the start.
    ///
    /// `after` must not be one of the moved blocks. Returns the new keys.
    pub fn move_range(&mut self, ids: &[BlockId], after: Option<&OrderKey>) -> Result<Vec<OrderKey>> {
        let mut keys = Vec::with_capacity(ids.len());
        for id in ids {
            keys.push(self.index.get(id).cloned().ok_or(StoreError::BlockNotFound(*id))?);
        }
        if let Some(after) = after {
            if !self.blocks.contains_key(after) {
                return Err(StoreError::ScopeMissing(after.clone()));
            }
            if keys.contains(after) {
                return Err(StoreError::KeyOrder(format!("cannot move blocks after themselves ({after})")));
            }
        }
        keys.sort();
        keys.dedup();

        let moving: Vec<Block> = keys.iter().filter_map(|k| self.remove_key(k)).collect();
        let hi = match after {
            Some(after) => self.successor_key(after).cloned(),
            None => self.blocks.keys().next().cloned(),
        };
        let new_keys = self.insert_between(after, hi.as_ref(), moving);
        self.version += 1;
        Ok(new_keys)
    }

    /// Merge footnote definitions by label.
    ///
    /// A definition whose label already exists rewrites that block in place
    /// (id and key kept). New labels are appended after the last existing
    /// definition, or at the end of the document when there is none.
    pub fn merge_footnotes(&mut self, definitions: Vec<Block>) -> Result<usize> {
        let mut changed = 0;
        for mut def in definitions {
            let Some(label) = footnote_definition_label(&def.text) else {
                continue;
            };
            def.managed = Some(ManagedRegion::FootnoteNotes);

            if let Some(existing) = self.footnote_definition(&label) {
                if existing.text == def.text {
                    continue;
                }
                let id = existing.id;
                self.update_block(&id, |b| {
                    b.text = def.text;
                    b.markdown = def.markdown;
                })?;
                changed += 1;
                continue;
            }

            let anchor = self
                .blocks
                .values()
                .filter(|b| b.managed == Some(ManagedRegion::FootnoteNotes))
                .map(|b| b.key.clone())
                .next_back()
                .or_else(|| self.last_key().cloned());
            if self.index.contains_key(&def.id) {
                def.id = BlockId::new();
            }
            match anchor {
                Some(anchor) => self.insert_after(Some(&anchor), vec![def])?,
                None => self.append(vec![def])?,
            };
            changed += 1;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::parse;

    fn test_store(md: &str) -> BlockStore {
        BlockStore::from_markdown(DocumentId::new(), md, &ParseOptions::default())
    }

    fn texts(store: &BlockStore) -> Vec<String> {
        store.iter().map(|b| b.text.clone()).collect()
    }

    #[test]
    fn test_new_store() {
        let store = BlockStore::new(DocumentId::new());
        assert!(store.is_empty());
        assert_eq!(store.block_count(), 0);
        assert_eq!(store.version(), 0);
        assert_eq!(store.assemble(), "");
    }

    #[test]
    fn test_from_markdown_assembles_back() {
        let md = "# Intro\n\nHello.\n\n## Background\n\nMore.\n";
        let store = test_store(md);
        assert_eq!(store.block_count(), 4);
        assert_eq!(store.assemble(), md);
    }

    #[test]
    fn test_replace_range_only_touches_range() {
        let mut store = test_store("# A\n\na\n\n# B\n\nb\n\n# C\n\nc\n");
        let ordered = store.blocks_ordered();
        let outside: Vec<_> = [0, 1, 4, 5].iter().map(|&i| ordered[i].clone()).collect();

        let new_blocks = parse("# B\n\nb one\n\nb two\n");
        let keys = store
            .replace_range(new_blocks, &ordered[2].key, Some(&ordered[4].key))
            .unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| ordered[1].key < *k && *k < ordered[4].key));
        for block in &outside {
            assert_eq!(store.get(&block.id), Some(block));
        }
        assert_eq!(texts(&store), vec!["A", "a", "B", "b one", "b two", "C", "c"]);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_replace_range_keeps_managed_blocks() {
        let mut store = test_store("# A\n\nSee[^1].\n\n[^1]: note\n\n# B\n");
        let ordered = store.blocks_ordered();
        let note = ordered[2].clone();
        assert!(note.is_managed());

        store
            .replace_range(parse("# A\n\nRewritten[^1].\n"), &ordered[0].key, Some(&ordered[3].key))
            .unwrap();
        assert_eq!(store.get(&note.id), Some(&note));
        assert_eq!(texts(&store), vec!["A", "Rewritten[^1].", "[^1]: note", "B"]);
    }

    #[test]
    fn test_replace_range_keeps_content_after_managed_block() {
        let mut store = test_store("# A\n\nSee[^1].\n\n[^1]: note\n\nAfter.\n\n# B\n");
        let ordered = store.blocks_ordered();
        assert!(ordered[2].is_managed());

        let mut after = ordered[3].clone();
        after.text = "After, edited.".into();
        after.markdown = "After, edited.".into();
        let mut blocks = vec![ordered[0].clone(), ordered[1].clone(), after];
        blocks.extend(parse("Tail.\n"));

        let keys = store
            .replace_range(blocks, &ordered[0].key, Some(&ordered[4].key))
            .unwrap();
        assert_eq!(keys.len(), 4);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            texts(&store),
            vec!["A", "See[^1].", "[^1]: note", "After, edited.", "Tail.", "B"]
        );
        assert_eq!(store.get(&ordered[2].id), Some(&ordered[2]));
    }

    #[test]
    fn test_replace_range_missing_boundary() {
        let mut store = test_store("# A\n\n# B\n");
        let ordered = store.blocks_ordered();
        store.remove(&ordered[1].id).unwrap();
        let before = store.blocks_ordered();

        let err = store
            .replace_range(parse("x\n"), &ordered[0].key, Some(&ordered[1].key))
            .unwrap_err();
        assert_eq!(err, StoreError::ScopeMissing(ordered[1].key.clone()));
        assert_eq!(store.blocks_ordered(), before);
    }

    #[test]
    fn test_replace_range_rejects_foreign_ids() {
        let mut store = test_store("# A\n\n# B\n\n# C\n");
        let ordered = store.blocks_ordered();
        let stolen = ordered[2].clone();
        let err = store
            .replace_range(vec![stolen.clone()], &ordered[0].key, Some(&ordered[1].key))
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateBlock(stolen.id));
    }

    #[test]
    fn test_full_replace_requires_increasing_keys() {
        let mut store = test_store("# A\n");
        let mut blocks = parse("one\n\ntwo\n");
        blocks.swap(0, 1);
        assert!(matches!(store.full_replace(blocks), Err(StoreError::KeyOrder(_))));
        assert_eq!(texts(&store), vec!["A"]);
    }

    #[test]
    fn test_apply_markdown_keeps_ids() {
        let mut store = test_store("# A\n\none\n\n# B\n");
        let ids: Vec<_> = store.iter().map(|b| b.id).collect();
        store
            .apply_markdown("# A\n\none\n\nnew\n\n# B\n", &ParseOptions::default())
            .unwrap();
        let after: Vec<_> = store.iter().map(|b| b.id).collect();
        assert_eq!(after[0], ids[0]);
        assert_eq!(after[1], ids[1]);
        assert_eq!(after[3], ids[2]);
    }

    #[test]
    fn test_insert_after_and_move_blocks() {
        let mut store = test_store("# A\n\n# B\n\n# C\n");
        let ordered = store.blocks_ordered();
        store
            .insert_after(Some(&ordered[0].key), vec![Block::paragraph("under A")])
            .unwrap();
        assert_eq!(texts(&store), vec!["A", "under A", "B", "C"]);

        // Move C to the front.
        store.move_range(&[ordered[2].id], None).unwrap();
        assert_eq!(texts(&store), vec!["C", "A", "under A", "B"]);
        assert_eq!(store.get(&ordered[2].id).map(|b| b.text.as_str()), Some("C"));

        let a_key = store.get(&ordered[0].id).unwrap().key.clone();
        let err = store.move_range(&[ordered[0].id], Some(&a_key)).unwrap_err();
        assert!(matches!(err, StoreError::KeyOrder(_)));
    }

    #[test]
    fn test_update_preserves_identity() {
        let mut store = test_store("# A\n");
        let id = store.iter().next().unwrap().id;
        store
            .update_block(&id, |b| {
                b.set_title("Renamed");
                b.id = BlockId::new();
            })
            .unwrap();
        let block = store.get(&id).unwrap();
        assert_eq!(block.markdown, "# Renamed\n");
        assert!(matches!(store.update_block(&BlockId::new(), |_| {}), Err(StoreError::BlockNotFound(_))));
    }

    #[test]
    fn test_merge_footnotes_by_label() {
        let mut store = test_store("# A\n\nx[^1] y[^2]\n\n[^1]: old\n\n# B\n");
        let note_id = store.footnote_definition("1").unwrap().id;
        let defs: Vec<Block> = parse("[^1]: new\n\n[^2]: second\n")
            .into_iter()
            .filter(|b| b.is_managed())
            .collect();
        assert_eq!(store.merge_footnotes(defs).unwrap(), 2);

        assert_eq!(store.footnote_definition("1").unwrap().id, note_id);
        assert_eq!(store.footnote_definition("1").unwrap().text, "[^1]: new");
        assert_eq!(texts(&store), vec!["A", "x[^1] y[^2]", "[^1]: new", "[^2]: second", "B"]);
    }

    #[test]
    fn test_footnote_without_existing_notes_appends() {
        let mut store = test_store("# A\n\nx[^n]\n");
        let defs = parse("[^n]: fresh\n");
        store.merge_footnotes(defs).unwrap();
        assert_eq!(texts(&store).last().map(String::as_str), Some("[^n]: fresh"));
    }
}
