//! Signing and verification of artifact fingerprints.

use crate::error::{SignerError, SignerResult};
use crate::key::{KeyPair, PublicKey};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signer as _, Verifier};
use pkgmesh_core::config::SigningConfig;
use pkgmesh_core::{ArtifactId, ContentHash, Signature};
use std::collections::HashMap;

/// Signs artifact fingerprints with one key. This is the publisher side:
/// an index that ships signatures produces them this way.
pub struct ArtifactSigner {
    keypair: KeyPair,
}

impl ArtifactSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Generate a signer with a random key.
    pub fn generate(key_name: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(key_name))
    }

    /// Encoded public key, suitable for `signing.trusted_keys`.
    pub fn public_key_string(&self) -> String {
        self.keypair.public_key_string()
    }

    /// Attach a signature to an artifact whose checksum and size are known.
    pub fn sign(&self, artifact: ArtifactId) -> SignerResult<ArtifactId> {
        let fingerprint = artifact.fingerprint().ok_or_else(|| {
            SignerError::InvalidSignature(format!(
                "cannot sign {artifact} without checksum and size"
            ))
        })?;
        let sig = self
            .keypair
            .secret
            .signing_key()
            .sign(fingerprint.as_bytes());
        let signature = Signature::new(&self.keypair.name, STANDARD.encode(sig.to_bytes()));
        Ok(artifact.with_signature(signature))
    }
}

/// Verify one signature over a fingerprint.
fn verify_signature(
    fingerprint: &str,
    signature: &Signature,
    public_key: &PublicKey,
) -> SignerResult<()> {
    let sig_bytes = STANDARD
        .decode(&signature.sig)
        .map_err(|e| SignerError::InvalidSignature(format!("invalid base64: {e}")))?;
    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|b: Vec<u8>| {
        SignerError::InvalidSignature(format!("expected 64 bytes, got {}", b.len()))
    })?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);

    public_key
        .verifying_key()
        .verify(fingerprint.as_bytes(), &signature)
        .map_err(|_| SignerError::VerificationFailed)
}

/// Result of a successful signature check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Signed by the named trusted key.
    Verified { key_name: String },
    /// No signature, and none is required.
    Unsigned,
}

/// The set of publisher keys the integrity gate trusts.
#[derive(Clone, Debug, Default)]
pub struct TrustedKeys {
    keys: HashMap<String, PublicKey>,
    require_signatures: bool,
}

impl TrustedKeys {
    pub fn new(require_signatures: bool) -> Self {
        Self {
            keys: HashMap::new(),
            require_signatures,
        }
    }

    /// Build from configuration.
    pub fn from_config(config: &SigningConfig) -> SignerResult<Self> {
        let mut trusted = Self::new(config.require_signatures);
        for encoded in &config.trusted_keys {
            let (name, key) = PublicKey::parse(encoded)?;
            trusted.insert(name, key);
        }
        Ok(trusted)
    }

    pub fn insert(&mut self, name: impl Into<String>, key: PublicKey) {
        self.keys.insert(name.into(), key);
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Check the signature of `artifact` against the bytes actually received.
    ///
    /// The fingerprint is rebuilt from `actual_sha256` and `actual_size`, so a
    /// valid signature always vouches for the staged bytes themselves.
    pub fn verify(
        &self,
        artifact: &ArtifactId,
        actual_sha256: ContentHash,
        actual_size: u64,
    ) -> SignerResult<SignatureStatus> {
        let Some(signature) = &artifact.signature else {
            // Only artifacts with a published checksum have a fingerprint a
            // publisher could sign; repository metadata never does.
            if self.require_signatures && artifact.sha256.is_some() {
                return Err(SignerError::MissingSignature);
            }
            return Ok(SignatureStatus::Unsigned);
        };

        let key = self
            .keys
            .get(&signature.key_name)
            .ok_or_else(|| SignerError::UntrustedKey(signature.key_name.clone()))?;

        let fingerprint = artifact
            .clone()
            .with_sha256(actual_sha256)
            .with_size(actual_size)
            .fingerprint()
            .ok_or(SignerError::VerificationFailed)?;
        verify_signature(&fingerprint, signature, key)?;

        tracing::debug!(artifact = %artifact, key = %signature.key_name, "Signature verified");
        Ok(SignatureStatus::Verified {
            key_name: signature.key_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmesh_core::{MediaIdentity, MediaKey, MediaScope, SafeRelativePath};

    fn artifact(data: &[u8]) -> ArtifactId {
        let media = MediaIdentity::new(
            MediaKey::new("9", "x86_64", "extras").unwrap(),
            MediaScope::Custom,
        )
        .unwrap();
        ArtifactId::new(media, SafeRelativePath::parse("foo-1.0-1.noarch.rpm").unwrap())
            .with_size(data.len() as u64)
            .with_sha256(ContentHash::compute(data))
    }

    fn trusted(signer: &ArtifactSigner, require: bool) -> TrustedKeys {
        TrustedKeys::from_config(&SigningConfig {
            trusted_keys: vec![signer.public_key_string()],
            require_signatures: require,
        })
        .unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = ArtifactSigner::generate("extras-1");
        let data = b"rpm payload";
        let signed = signer.sign(artifact(data)).unwrap();

        let status = trusted(&signer, true)
            .verify(&signed, ContentHash::compute(data), data.len() as u64)
            .unwrap();
        assert_eq!(
            status,
            SignatureStatus::Verified {
                key_name: "extras-1".to_string()
            }
        );
    }

    #[test]
    fn test_signature_does_not_cover_other_bytes() {
        let signer = ArtifactSigner::generate("extras-1");
        let signed = signer.sign(artifact(b"good")).unwrap();

        let err = trusted(&signer, false)
            .verify(&signed, ContentHash::compute(b"evil"), 4)
            .unwrap_err();
        assert!(matches!(err, SignerError::VerificationFailed));
    }

    #[test]
    fn test_untrusted_key_rejected() {
        let signer = ArtifactSigner::generate("extras-1");
        let impostor = ArtifactSigner::generate("extras-1");
        let signed = impostor.sign(artifact(b"good")).unwrap();

        let err = trusted(&signer, false)
            .verify(&signed, ContentHash::compute(b"good"), 4)
            .unwrap_err();
        assert!(matches!(err, SignerError::VerificationFailed));

        let stranger = ArtifactSigner::generate("stranger");
        let signed = stranger.sign(artifact(b"good")).unwrap();
        let err = trusted(&signer, false)
            .verify(&signed, ContentHash::compute(b"good"), 4)
            .unwrap_err();
        assert!(matches!(err, SignerError::UntrustedKey(_)));
    }

    #[test]
    fn test_unsigned_policy() {
        let signer = ArtifactSigner::generate("extras-1");
        let unsigned = artifact(b"good");
        let hash = ContentHash::compute(b"good");

        assert_eq!(
            trusted(&signer, false).verify(&unsigned, hash, 4).unwrap(),
            SignatureStatus::Unsigned
        );
        assert!(matches!(
            trusted(&signer, true).verify(&unsigned, hash, 4),
            Err(SignerError::MissingSignature)
        ));
    }

    #[test]
    fn test_metadata_needs_no_signature() {
        let signer = ArtifactSigner::generate("extras-1");
        let media = MediaIdentity::new(
            MediaKey::new("9", "x86_64", "extras").unwrap(),
            MediaScope::Custom,
        )
        .unwrap();
        let synthesis = ArtifactId::new(
            media,
            SafeRelativePath::parse("media_info/synthesis.hdlist.cz").unwrap(),
        );

        assert_eq!(
            trusted(&signer, true)
                .verify(&synthesis, ContentHash::compute(b"index"), 5)
                .unwrap(),
            SignatureStatus::Unsigned
        );
    }
}
