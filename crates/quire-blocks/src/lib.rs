//! Canonical block storage for Quire documents.
//!
//! A document is an ordered sequence of [`Block`]s, each with a stable
//! [`BlockId`] and a fractional [`OrderKey`]. This crate owns everything that
//! can be done to that sequence synchronously:
//!
//! - [`markdown`]: parse markdown into blocks (keeping identity across
//!   re-parses) and assemble blocks back into markdown
//! - [`BlockStore`]: the ordered collection, with range replacement
//! - [`outline`]: the section tree, pseudo-sections and level enforcement
//! - [`scope`]: zoom extraction and the merge of an edited zoom buffer
//!
//! Nothing here is async or knows about editing surfaces; that lives in
//! `quire-sync`.
//!
//! [`Block`]: quire_types::Block
//! [`BlockId`]: quire_types::BlockId
//! [`OrderKey`]: quire_types::OrderKey

pub mod error;
pub mod markdown;
pub mod order;
pub mod outline;
pub mod scope;
pub mod store;

pub use error::StoreError;
pub use markdown::{
    DEFAULT_BIBLIOGRAPHY_TITLES, ParseOptions, assemble, footnote_definition_label, parse,
    parse_with, parse_with_previous,
};
pub use order::{keys_between, order_midpoint};
pub use outline::{
    DEFAULT_PSEUDO_SECTION_PATTERN, PseudoSectionMatcher, Section, build_outline, descendants,
    enforce_levels, find_by_id,
};
pub use scope::{
    Extraction, NOTES_MARKER, ZoomFlush, ZoomMode, ZoomScope, extract, flush_zoomed, footnote_refs,
    render_scope, scope_range, split_notes,
};
pub use store::BlockStore;

/// Result type for block store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
