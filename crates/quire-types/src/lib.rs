//! Shared identity and block types for Quire.
//!
//! This crate is the vocabulary every other crate speaks: typed IDs, blocks,
//! managed-region flags and fractional sort keys. It has **no internal quire
//! dependencies**; other crates build on it.
//!
//! # Key Types
//!
//! |-----------------|----------------------------------------------|
//! | Type            | Purpose                                      |
//! |-----------------|----------------------------------------------|
//! | [`DocumentId`]  | Which document (project)                     |
//! | [`BlockId`]     | Stable block identity                        |
//! | [`Block`]       | One heading / paragraph / structural block   |
//! | [`OrderKey`]    | Fractional sort key (base-62)                |
//! |-----------------|----------------------------------------------|

pub mod block;
pub mod ids;
pub mod order;

pub use block::{Block, BlockKind, MAX_HEADING_LEVEL, ManagedRegion, heading_markdown};
pub use ids::{BlockId, DocumentId};
pub use order::{BASE62, OrderKey, OrderKeyError, base62_digit};
