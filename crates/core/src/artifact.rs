//! Artifact identities and detached signatures.

use crate::hash::ContentHash;
use crate::media::MediaIdentity;
use crate::path::SafeRelativePath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A detached signature over an artifact fingerprint (`keyname:base64sig`).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub key_name: String,
    pub sig: String,
}

impl Signature {
    /// Create a new signature.
    pub fn new(key_name: impl Into<String>, sig: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            sig: sig.into(),
        }
    }

    /// Parse from `keyname:base64sig` format.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (key_name, sig) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::InvalidSignature(format!("expected keyname:sig, got {s}")))?;
        Ok(Self::new(key_name, sig))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}:...)", self.key_name)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_name, self.sig)
    }
}

/// Everything needed to locate, fetch and verify one artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactId {
    /// Media the artifact belongs to.
    pub media: MediaIdentity,
    /// Path of the file relative to the media root (e.g. `foo-1.0-1.mga9.noarch.rpm`
    /// or `media_info/synthesis.hdlist.cz`).
    pub path: SafeRelativePath,
    /// Expected size in bytes, when known.
    pub size: Option<u64>,
    /// Expected SHA-256, when known.
    pub sha256: Option<ContentHash>,
    /// Detached signature, when the publisher provides one.
    pub signature: Option<Signature>,
}

impl ArtifactId {
    /// An artifact with no integrity expectations yet.
    pub fn new(media: MediaIdentity, path: SafeRelativePath) -> Self {
        Self {
            media,
            path,
            size: None,
            sha256: None,
            signature: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_sha256(mut self, sha256: ContentHash) -> Self {
        self.sha256 = Some(sha256);
        self
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Canonical cache key relative to `<root>/medias`.
    ///
    /// Depends only on the media identity and the file path, never on the
    /// source that supplied the bytes.
    pub fn cache_key(&self) -> SafeRelativePath {
        self.media.subtree().join(&self.path)
    }

    /// The string signed by publishers:
    /// `pkgmesh-artifact:1;<cache key>;sha256:<hex>;<size>`.
    ///
    /// `None` unless both checksum and size are known.
    pub fn fingerprint(&self) -> Option<String> {
        let sha256 = self.sha256?;
        let size = self.size?;
        Some(format!(
            "pkgmesh-artifact:1;{};sha256:{};{}",
            self.cache_key(),
            sha256.to_hex(),
            size
        ))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaKey, MediaScope};

    fn artifact(scope: MediaScope) -> ArtifactId {
        let media = MediaIdentity::new(MediaKey::new("9", "x86_64", "tainted").unwrap(), scope)
            .unwrap();
        ArtifactId::new(media, SafeRelativePath::parse("foo-1.0-1.mga9.x86_64.rpm").unwrap())
    }

    #[test]
    fn test_cache_key_by_scope() {
        let official = artifact(MediaScope::Official {
            class: "tainted".to_string(),
        });
        assert_eq!(
            official.cache_key().as_str(),
            "official/9/x86_64/media/tainted/tainted/foo-1.0-1.mga9.x86_64.rpm"
        );
        let custom = artifact(MediaScope::Custom);
        assert_eq!(
            custom.cache_key().as_str(),
            "custom/tainted/foo-1.0-1.mga9.x86_64.rpm"
        );
    }

    #[test]
    fn test_fingerprint_needs_checksum_and_size() {
        let base = artifact(MediaScope::Custom);
        assert!(base.fingerprint().is_none());
        let hash = ContentHash::compute(b"rpm");
        let full = base.clone().with_size(3).with_sha256(hash);
        let fp = full.fingerprint().unwrap();
        assert!(fp.starts_with("pkgmesh-artifact:1;custom/tainted/"));
        assert!(fp.ends_with(&format!("sha256:{};3", hash.to_hex())));
    }

    #[test]
    fn test_signature_parse() {
        let sig = Signature::parse("mageia-1:c2lnbmF0dXJl").unwrap();
        assert_eq!(sig.key_name, "mageia-1");
        assert_eq!(sig.to_string(), "mageia-1:c2lnbmF0dXJl");
        assert!(Signature::parse("nocolon").is_err());
    }
}
