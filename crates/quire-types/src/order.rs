//! Fractional sort keys.
//!
//! An [`OrderKey`] is a fraction in the open interval (0, 1) written as
//! base-62 digits after an implied radix point: `"V"` is 31/62, `"V8"` is
//! 31/62 + 8/62². Keys compare lexicographically, which is the same as
//! comparing the fractions, so a key can always be minted between any two
//! existing keys without renumbering anything.
//!
//! Valid keys are non-empty, use only the [`BASE62`] charset, and never end in
//! `'0'`, which keeps room below every key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Base-62 charset for fractional indexing (0-9, A-Z, a-z).
/// Lexicographically ordered: '0' < '9' < 'A' < 'Z' < 'a' < 'z'.
pub const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Get the digit value of a base-62 character.
pub fn base62_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'Z' => Some(c - b'A' + 10),
        b'a'..=b'z' => Some(c - b'a' + 36),
        _ => None,
    }
}

/// Errors from parsing an [`OrderKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderKeyError {
    #[error("order key is empty")]
    Empty,
    #[error("order key {0:?} contains a non base-62 character")]
    InvalidChar(String),
    #[error("order key {0:?} ends in '0'")]
    TrailingZero(String),
}

/// Fractional sort key (base-62, lexicographically ordered).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderKey(String);

impl OrderKey {
    /// The key in the middle of the keyspace (`"V"`, i.e. 0.5).
    pub fn middle() -> Self {
        Self("V".to_string())
    }

    /// Parse and validate a key.
    pub fn parse(s: &str) -> Result<Self, OrderKeyError> {
        if s.is_empty() {
            return Err(OrderKeyError::Empty);
        }
        if s.bytes().any(|c| base62_digit(c).is_none()) {
            return Err(OrderKeyError::InvalidChar(s.to_string()));
        }
        if s.ends_with('0') {
            return Err(OrderKeyError::TrailingZero(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Wrap a string already known to be valid (produced by the key minting code).
    pub fn from_digits_unchecked(s: String) -> Self {
        debug_assert!(Self::parse(&s).is_ok(), "invalid order key {s:?}");
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Approximate floating-point value, for display and float-keyed stores.
    ///
    /// Lossy past ~9 digits; never use it for ordering decisions.
    pub fn as_f64(&self) -> f64 {
        let mut value = 0.0;
        let mut scale = 1.0 / 62.0;
        for c in self.0.bytes() {
            value += f64::from(base62_digit(c).unwrap_or(0)) * scale;
            scale /= 62.0;
        }
        value
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderKey({})", self.0)
    }
}
