//! Persistent block storage interface.
//!
//! The session loads a document's blocks on open and writes them back after
//! every committed mutation. Storage engines live behind [`BlockRepository`];
//! [`MemoryRepository`] is the in-process implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use quire_blocks::{BlockStore, ParseOptions};
use quire_types::{Block, DocumentId, OrderKey};
use tokio::sync::watch;

use crate::RepositoryError;

#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// All blocks of a document, in key order. Unknown documents are empty.
    async fn fetch_blocks(&self, document_id: DocumentId) -> Result<Vec<Block>, RepositoryError>;

    /// Replace every block of a document.
    async fn replace_blocks(
        &self,
        document_id: DocumentId,
        blocks: Vec<Block>,
    ) -> Result<(), RepositoryError>;

    /// Replace the unmanaged blocks in `[start, end)`; returns the new keys.
    async fn replace_blocks_in_range(
        &self,
        document_id: DocumentId,
        blocks: Vec<Block>,
        start: OrderKey,
        end: Option<OrderKey>,
    ) -> Result<Vec<OrderKey>, RepositoryError>;

    /// Observe a document's blocks. The receiver sees every committed write.
    fn observe_blocks(&self, document_id: DocumentId) -> watch::Receiver<Vec<Block>>;
}

/// In-memory repository.
#[derive(Default)]
pub struct MemoryRepository {
    docs: Mutex<HashMap<DocumentId, watch::Sender<Vec<Block>>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository holding one document parsed from markdown.
    pub fn with_markdown(document_id: DocumentId, markdown: &str, opts: &ParseOptions) -> Self {
        let repo = Self::new();
        let store = BlockStore::from_markdown(document_id, markdown, opts);
        repo.sender(document_id).send_replace(store.blocks_ordered());
        repo
    }

    fn sender(&self, document_id: DocumentId) -> watch::Sender<Vec<Block>> {
        self.docs
            .lock()
            .entry(document_id)
            .or_insert_with(|| watch::channel(Vec::new()).0)
            .clone()
    }
}

#[async_trait]
impl BlockRepository for MemoryRepository {
    async fn fetch_blocks(&self, document_id: DocumentId) -> Result<Vec<Block>, RepositoryError> {
        Ok(self.sender(document_id).borrow().clone())
    }

    async fn replace_blocks(
        &self,
        document_id: DocumentId,
        blocks: Vec<Block>,
    ) -> Result<(), RepositoryError> {
        // Validates ordering and identity.
        let store = BlockStore::from_blocks(document_id, blocks)?;
        self.sender(document_id).send_replace(store.blocks_ordered());
        Ok(())
    }

    async fn replace_blocks_in_range(
        &self,
        document_id: DocumentId,
        blocks: Vec<Block>,
        start: OrderKey,
        end: Option<OrderKey>,
    ) -> Result<Vec<OrderKey>, RepositoryError> {
        let tx = self.sender(document_id);
        let current = tx.borrow().clone();
        let mut store = BlockStore::from_blocks(document_id, current)?;
        let keys = store.replace_range(blocks, &start, end.as_ref())?;
        tx.send_replace(store.blocks_ordered());
        Ok(keys)
    }

    fn observe_blocks(&self, document_id: DocumentId) -> watch::Receiver<Vec<Block>> {
        self.sender(document_id).subscribe()
    }
}
