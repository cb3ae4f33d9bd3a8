//! Dotted version comparison.
//!
//! A leading `v` is ignored, each `.`-separated part contributes its
//! leading digits (`"2rc1"` → 2, `"beta"` → 0) and the shorter version is
//! padded with zeros, so `1.2` == `1.2.0`.

use std::cmp::Ordering;

pub fn parse(version: &str) -> Vec<u64> {
    let trimmed = version.trim();
    let body = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    body.split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

pub fn compare(a: &str, b: &str) -> Ordering {
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}
