//! Integrity gate applied to staged bytes before they are committed.

use crate::error::{FetchError, FetchResult};
use pkgmesh_core::{ArtifactId, ContentHash};
use pkgmesh_signer::{SignatureStatus, TrustedKeys};

/// Check received bytes against what is known about the artifact.
///
/// Size and SHA-256 are compared when the artifact carries them; the
/// signature policy of `keys` is applied to the bytes actually received.
pub fn verify_artifact(
    artifact: &ArtifactId,
    actual_size: u64,
    actual_sha256: ContentHash,
    keys: &TrustedKeys,
) -> FetchResult<SignatureStatus> {
    if let Some(expected) = artifact.size
        && expected != actual_size
    {
        return Err(FetchError::IntegrityFailure(format!(
            "size mismatch: expected {expected}, got {actual_size}"
        )));
    }
    if let Some(expected) = artifact.sha256
        && expected != actual_sha256
    {
        return Err(FetchError::IntegrityFailure(format!(
            "sha256 mismatch: expected {expected}, got {actual_sha256}"
        )));
    }
    keys.verify(artifact, actual_sha256, actual_size)
        .map_err(|e| FetchError::IntegrityFailure(format!("signature: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmesh_core::config::SigningConfig;
    use pkgmesh_core::{MediaIdentity, MediaKey, MediaScope, SafeRelativePath};
    use pkgmesh_signer::ArtifactSigner;

    fn artifact() -> ArtifactId {
        let media = MediaIdentity::new(
            MediaKey::new("9", "x86_64", "extras").unwrap(),
            MediaScope::Custom,
        )
        .unwrap();
        ArtifactId::new(media, SafeRelativePath::parse("a.rpm").unwrap())
    }

    #[test]
    fn test_checksum_and_size() {
        let keys = TrustedKeys::default();
        let good = ContentHash::compute(b"payload");
        let expected = artifact().with_size(7).with_sha256(good);

        assert_eq!(
            verify_artifact(&expected, 7, good, &keys).unwrap(),
            SignatureStatus::Unsigned
        );
        assert!(matches!(
            verify_artifact(&expected, 7, ContentHash::compute(b"PAYLOAD"), &keys),
            Err(FetchError::IntegrityFailure(_))
        ));
        assert!(matches!(
            verify_artifact(&expected, 8, good, &keys),
            Err(FetchError::IntegrityFailure(_))
        ));
        // Nothing known: only the signature policy applies.
        assert!(verify_artifact(&artifact(), 3, good, &keys).is_ok());
    }

    #[test]
    fn test_signature_policy() {
        let signer = ArtifactSigner::generate("extras-1");
        let keys = TrustedKeys::from_config(&SigningConfig {
            trusted_keys: vec![signer.public_key_string()],
            require_signatures: true,
        })
        .unwrap();
        let hash = ContentHash::compute(b"payload");
        let signed = signer
            .sign(artifact().with_size(7).with_sha256(hash))
            .unwrap();

        assert!(matches!(
            verify_artifact(&signed, 7, hash, &keys).unwrap(),
            SignatureStatus::Verified { .. }
        ));
        assert!(matches!(
            verify_artifact(&artifact().with_sha256(hash), 7, hash, &keys),
            Err(FetchError::IntegrityFailure(_))
        ));
        assert_eq!(
            verify_artifact(&artifact(), 7, hash, &keys).unwrap(),
            SignatureStatus::Unsigned
        );
    }
}
