//! Relative path sanitisation.
//!
//! Every path that ends up under the cache root or in an upstream URL goes
//! through [`SafeRelativePath`]; anything that could climb out of its subtree
//! is rejected instead of being normalised away.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A `/`-separated relative path made only of plain segments.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SafeRelativePath(String);

impl SafeRelativePath {
    /// Parse and validate a relative path.
    ///
    /// Rejects absolute paths, backslashes, NUL bytes, empty segments and
    /// `.`/`..` segments.
    pub fn parse(path: &str) -> crate::Result<Self> {
        if path.is_empty() {
            return Err(crate::Error::PathSafety("empty path".to_string()));
        }
        if path.starts_with('/') {
            return Err(crate::Error::PathSafety(format!(
                "absolute path not allowed: {path}"
            )));
        }
        for segment in path.split('/') {
            validate_segment(segment).map_err(|_| {
                crate::Error::PathSafety(format!("unsafe segment {segment:?} in {path}"))
            })?;
        }
        Ok(Self(path.to_string()))
    }

    /// Wrap a path assembled from segments that were already validated.
    pub(crate) fn from_validated(path: String) -> Self {
        debug_assert!(Self::parse(&path).is_ok(), "unvalidated path: {path}");
        Self(path)
    }

    /// Get the path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Final segment (the file name).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Append another safe path.
    pub fn join(&self, other: &SafeRelativePath) -> SafeRelativePath {
        Self(format!("{}/{}", self.0, other.0))
    }

    /// Check whether `self` lies under `prefix` (segment-wise).
    pub fn starts_with(&self, prefix: &SafeRelativePath) -> bool {
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0.as_bytes().get(prefix.0.len()) == Some(&b'/'))
    }
}

/// Validate a single path segment (a file or directory name).
pub fn validate_segment(segment: &str) -> crate::Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(crate::Error::PathSafety(format!(
            "invalid path segment: {segment:?}"
        )));
    }
    if segment.contains(['/', '\\', '\0']) {
        return Err(crate::Error::PathSafety(format!(
            "path segment contains a separator or NUL: {segment:?}"
        )));
    }
    Ok(())
}

impl fmt::Debug for SafeRelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SafeRelativePath({})", self.0)
    }
}

impl fmt::Display for SafeRelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SafeRelativePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SafeRelativePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_paths() {
        let path = SafeRelativePath::parse("media/core/release/foo-1.0-1.mga9.x86_64.rpm").unwrap();
        assert_eq!(path.file_name(), "foo-1.0-1.mga9.x86_64.rpm");
        assert_eq!(path.segments().count(), 4);
    }

    #[test]
    fn test_rejects_traversal() {
        for bad in [
            "../escape",
            "a/../../etc/passwd",
            "a/./b",
            "/etc/passwd",
            "a//b",
            "a/b/",
            "a\\..\\b",
            "",
            "nul\0byte",
        ] {
            assert!(
                matches!(
                    SafeRelativePath::parse(bad),
                    Err(crate::Error::PathSafety(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_starts_with_is_segment_wise() {
        let base = SafeRelativePath::parse("custom/extras").unwrap();
        let inside = SafeRelativePath::parse("custom/extras/pkg.rpm").unwrap();
        let sibling = SafeRelativePath::parse("custom/extras2/pkg.rpm").unwrap();
        assert!(inside.starts_with(&base));
        assert!(!sibling.starts_with(&base));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: SafeRelativePath = serde_json::from_str("\"a/b.rpm\"").unwrap();
        assert_eq!(ok.as_str(), "a/b.rpm");
        assert!(serde_json::from_str::<SafeRelativePath>("\"../b.rpm\"").is_err());
    }
}
