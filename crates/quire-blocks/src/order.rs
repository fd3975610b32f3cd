//! Minting fractional order keys.
//!
//! Keys are base-62 fractions (see [`OrderKey`]). `None` bounds stand for the
//! ends of the keyspace: a `None` lower bound is 0, a `None` upper bound is 1.
//! Every minted key lies strictly between its bounds and never ends in `'0'`,
//! so repeated bisection at the same spot keeps producing distinct keys;
//! the key just grows by a digit every few splits.

use quire_types::{BASE62, OrderKey, base62_digit};

fn digits(key: &OrderKey) -> Vec<u8> {
    key.as_str().bytes().filter_map(base62_digit).collect()
}

fn to_key(digits: &[u8]) -> OrderKey {
    let s: String = digits.iter().map(|&d| BASE62[usize::from(d)] as char).collect();
    OrderKey::from_digits_unchecked(s)
}

/// Digit-level midpoint. Requires `a < b` (with `a` padded by zeros).
fn midpoint_digits(a: &[u8], b: Option<&[u8]>) -> Vec<u8> {
    if let Some(b) = b {
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(0) == b[n] {
            n += 1;
        }
        if n > 0 {
            let mut out = b[..n].to_vec();
            out.extend(midpoint_digits(a.get(n..).unwrap_or(&[]), Some(&b[n..])));
            return out;
        }
    }

    let da = a.first().copied().unwrap_or(0);
    let db = b.and_then(|b| b.first().copied()).unwrap_or(62);
    if db > da + 1 {
        return vec![(da + db) / 2];
    }
    // Consecutive leading digits.
    match b {
        Some(b) if b.len() > 1 => vec![b[0]],
        _ => {
            let mut out = vec![da];
            out.extend(midpoint_digits(a.get(1..).unwrap_or(&[]), None));
            out
        }
    }
}

/// Mint a key strictly between `lo` and `hi`.
pub fn order_midpoint(lo: Option<&OrderKey>, hi: Option<&OrderKey>) -> OrderKey {
    if let (Some(lo), Some(hi)) = (lo, hi) {
        debug_assert!(lo < hi, "order_midpoint bounds out of order: {lo} >= {hi}");
    }
    let a = lo.map(digits).unwrap_or_default();
    let b = hi.map(digits);
    to_key(&midpoint_digits(&a, b.as_deref()))
}

/// Mint `n` strictly increasing keys between `lo` and `hi`.
///
/// Splits the interval recursively, so key length grows with `log n` rather
/// than `n`.
pub fn keys_between(lo: Option<&OrderKey>, hi: Option<&OrderKey>, n: usize) -> Vec<OrderKey> {
    let mut out = Vec::with_capacity(n);
    fill(lo, hi, n, &mut out);
    out
}

fn fill(lo: Option<&OrderKey>, hi: Option<&OrderKey>, n: usize, out: &mut Vec<OrderKey>) {
    if n == 0 {
        return;
    }
    let mid = order_midpoint(lo, hi);
    let left = (n - 1) / 2;
    fill(lo, Some(&mid), left, out);
    out.push(mid.clone());
    fill(Some(&mid), hi, n - 1 - left, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> OrderKey {
        OrderKey::parse(s).unwrap()
    }

    #[test]
    fn test_unbounded_midpoint_is_middle() {
        assert_eq!(order_midpoint(None, None), OrderKey::middle());
    }

    #[test]
    fn test_midpoint_between_adjacent_digits() {
        let a = key("V");
        let b = key("W");
        let m = order_midpoint(Some(&a), Some(&b));
        assert!(a < m && m < b, "{a} < {m} < {b}");
    }

    #[test]
    fn test_midpoint_after_z_run() {
        let a = key("zz");
        let m = order_midpoint(Some(&a), None);
        assert!(m > a);
        let b = key("z");
        let below = order_midpoint(None, Some(&key("1")));
        assert!(below < key("1"));
        assert!(order_midpoint(Some(&b), Some(&a)) > b);
    }

    #[test]
    fn test_midpoint_with_shared_prefix() {
        let a = key("V");
        let b = key("V5");
        let m = order_midpoint(Some(&a), Some(&b));
        assert!(a < m && m < b, "{a} < {m} < {b}");
    }

    #[test]
    fn test_repeated_bisection_never_collides() {
        let lo = key("V");
        let mut hi = key("W");
        for _ in 0..500 {
            let m = order_midpoint(Some(&lo), Some(&hi));
            assert!(lo < m && m < hi, "{lo} < {m} < {hi}");
            assert!(!m.as_str().ends_with('0'));
            hi = m;
        }

        let mut lo = key("V");
        let hi = key("W");
        for _ in 0..500 {
            let m = order_midpoint(Some(&lo), Some(&hi));
            assert!(lo < m && m < hi, "{lo} < {m} < {hi}");
            lo = m;
        }
    }

    #[test]
    fn test_keys_between_strictly_increasing() {
        let lo = key("A");
        let hi = key("B");
        let keys = keys_between(Some(&lo), Some(&hi), 200);
        assert_eq!(keys.len(), 200);
        assert!(lo < keys[0]);
        assert!(keys[199] < hi);
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
        // log-depth splitting keeps keys short
        assert!(keys.iter().all(|k| k.as_str().len() <= 4));
    }

    #[test]
    fn test_keys_between_unbounded() {
        let keys = keys_between(None, None, 3);
        assert_eq!(keys.len(), 3);
        assert!(keys[0] < keys[1] && keys[1] < keys[2]);
        assert!(keys_between(None, None, 0).is_empty());
    }
}
