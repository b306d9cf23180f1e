//! Utility functions and helpers.

pub mod http;

use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

/// Separator fed to the hasher between parts so `["a", "b"]` and `["ab"]` differ.
const PART_SEPARATOR: &[u8] = &[0x1f];

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 digest over a sequence of text parts.
pub fn content_hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update(PART_SEPARATOR);
        }
        hasher.update(part.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// First `max` characters of `s`.
pub fn char_prefix(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncate to `max` grapheme clusters, appending `...` when anything was cut.
pub fn truncate_graphemes(s: &str, max: usize) -> String {
    let mut graphemes = s.grapheme_indices(true);
    match graphemes.nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b  c "), "a b c");
        assert_eq!(normalize_whitespace("   "), "");
    }

    #[test]
    fn test_content_hash_is_stable_and_separated() {
        let a = content_hash(["+4912345", "hello"]);
        assert_eq!(a, content_hash(["+4912345", "hello"]));
        assert_eq!(a.len(), 64);
        assert_ne!(content_hash(["ab", "c"]), content_hash(["a", "bc"]));
    }

    #[test]
    fn test_char_prefix() {
        assert_eq!(char_prefix("hello", 3), "hel");
        assert_eq!(char_prefix("hi", 10), "hi");
        assert_eq!(char_prefix("héllo", 2), "hé");
    }

    #[test]
    fn test_truncate_graphemes() {
        assert_eq!(truncate_graphemes("abcdef", 3), "abc...");
        assert_eq!(truncate_graphemes("abc", 3), "abc");
        assert_eq!(truncate_graphemes("e\u{301}e\u{301}e\u{301}", 2), "e\u{301}e\u{301}...");
    }

    #[test]
    fn test_same_origin() {
        let a = Url::parse("https://example.com/login").unwrap();
        let b = Url::parse("https://example.com/portal").unwrap();
        let c = Url::parse("https://evil.example.net/portal").unwrap();
        assert!(same_origin(&a, &b));
        assert!(!same_origin(&a, &c));
    }
}
