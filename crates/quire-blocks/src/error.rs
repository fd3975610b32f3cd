//! Error types for block store operations.

use quire_types::{BlockId, OrderKey};
use thiserror::Error;

/// Errors that can occur while mutating a [`BlockStore`](crate::BlockStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A scope boundary key no longer exists in the store.
    ///
    /// Returned by range replacement when the zoomed range was invalidated
    /// underneath it; the caller must recover rather than drop the write.
    #[error("scope boundary {0} no longer exists")]
    ScopeMissing(OrderKey),

    /// Block not found in the store.
    #[error("block not found: {0:?}")]
    BlockNotFound(BlockId),

    /// Keys supplied to a bulk replace are not strictly increasing.
    #[error("order keys out of order: {0}")]
    KeyOrder(String),

    /// Duplicate block ID.
    #[error("block already exists: {0:?}")]
    DuplicateBlock(BlockId),
}
