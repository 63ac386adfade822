//! Revision identifiers.

use crate::error::CoreError;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// 1-based generation number of a revision (the integer prefix of a
/// revision ID).
pub type Generation = u64;

/// Number of digest bytes kept in a revision ID (hex-encoded, so the
/// textual digest is twice this long).
const DIGEST_LEN: usize = 16;

/// A revision identifier of the form `<generation>-<digest>`.
///
/// Revision IDs are:
/// - Opaque once assigned; the store never rewrites them
/// - Ordered byte-lexicographically on the full string, which is the
///   tie-break used when a document has multiple current leaves
/// - Unique per document together with the doc ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevId {
    /// Full textual form, `"<generation>-<digest>"`.
    raw: String,
    /// Parsed generation prefix.
    generation: Generation,
}

impl RevId {
    /// Returns the generation number (≥ 1).
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns the digest portion (everything after the first `-`).
    #[must_use]
    pub fn digest(&self) -> &str {
        match self.raw.split_once('-') {
            Some((_, digest)) => digest,
            None => "",
        }
    }

    /// Returns the full textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Derives the ID of a successor revision.
    ///
    /// The generation is the parent's plus one (1 for a root revision).
    /// The digest is a truncated SHA-256 over the parent ID, the deletion
    /// flag, and the canonical body bytes, so identical inputs always
    /// derive the same ID and distinct bodies practically never collide.
    #[must_use]
    pub fn next(prev: Option<&RevId>, deleted: bool, body: &[u8]) -> RevId {
        let generation = prev.map_or(0, RevId::generation) + 1;

        let mut hasher = Sha256::new();
        if let Some(prev) = prev {
            hasher.update(prev.as_str().as_bytes());
        }
        hasher.update([u8::from(deleted)]);
        hasher.update(body);
        let digest = hex::encode(&hasher.finalize()[..DIGEST_LEN]);

        RevId {
            raw: format!("{generation}-{digest}"),
            generation,
        }
    }
}

impl FromStr for RevId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CoreError::MalformedRevId { input: s.into() };

        let (generation, digest) = s.split_once('-').ok_or_else(malformed)?;
        if digest.is_empty() {
            return Err(malformed());
        }
        // Reject a sign, leading whitespace, or anything else u64::parse
        // would otherwise tolerate inside the generation prefix.
        if generation.is_empty() || !generation.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let generation: Generation = generation.parse().map_err(|_| malformed())?;
        if generation == 0 {
            return Err(malformed());
        }

        Ok(RevId {
            raw: s.to_owned(),
            generation,
        })
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for RevId {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl PartialOrd for RevId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RevId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl ToSql for RevId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.raw.as_str()))
    }
}

impl FromSql for RevId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: CoreError| FromSqlError::Other(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid() {
        let rev: RevId = "3-deadbeef".parse().unwrap();
        assert_eq!(rev.generation(), 3);
        assert_eq!(rev.digest(), "deadbeef");
        assert_eq!(rev.as_str(), "3-deadbeef");
    }

    #[test]
    fn parse_rejects_malformed() {
        for input in ["", "nodash", "-abc", "0-abc", "3-", "-3-abc", "+1-abc", "1x-abc"] {
            assert!(
                input.parse::<RevId>().is_err(),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn digest_may_contain_dashes() {
        let rev: RevId = "2-ab-cd".parse().unwrap();
        assert_eq!(rev.generation(), 2);
        assert_eq!(rev.digest(), "ab-cd");
    }

    #[test]
    fn next_increments_generation() {
        let root = RevId::next(None, false, b"{}");
        assert_eq!(root.generation(), 1);

        let child = RevId::next(Some(&root), false, b"{\"x\":1}");
        assert_eq!(child.generation(), 2);

        let grandchild = RevId::next(Some(&child), true, b"");
        assert_eq!(grandchild.generation(), 3);
    }

    #[test]
    fn next_is_deterministic() {
        let a = RevId::next(None, false, b"{\"x\":1}");
        let b = RevId::next(None, false, b"{\"x\":1}");
        assert_eq!(a, b);
    }

    #[test]
    fn next_distinguishes_inputs() {
        let root = RevId::next(None, false, b"{}");
        let a = RevId::next(Some(&root), false, b"{\"x\":1}");
        let b = RevId::next(Some(&root), false, b"{\"x\":2}");
        let c = RevId::next(Some(&root), true, b"{\"x\":1}");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ordering_is_lexicographic_on_full_string() {
        let a: RevId = "2-aaa".parse().unwrap();
        let b: RevId = "2-bbb".parse().unwrap();
        assert!(a < b);

        // Byte-lexicographic, not numeric: "10-..." sorts below "9-...".
        let ten: RevId = "10-aaa".parse().unwrap();
        let nine: RevId = "9-aaa".parse().unwrap();
        assert!(ten < nine);
    }
}
