//! Ed25519 keys in `keyname:base64` form.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::fmt;

/// Split `keyname:base64` and decode the payload, expecting `len` bytes.
fn decode_named(s: &str, len: usize) -> SignerResult<(String, Vec<u8>)> {
    let (name, b64) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| SignerError::KeyParsing("expected 'keyname:base64' format".to_string()))?;
    if name.is_empty() {
        return Err(SignerError::KeyParsing("empty key name".to_string()));
    }
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| SignerError::KeyParsing(format!("invalid base64: {e}")))?;
    if bytes.len() != len {
        return Err(SignerError::KeyParsing(format!(
            "expected {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok((name.to_string(), bytes))
}

/// A secret key for signing.
pub struct SecretKey {
    inner: SigningKey,
}

impl SecretKey {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            inner: SigningKey::generate(&mut rng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.inner
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// A public key for verification.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Parse `keyname:base64(public)`.
    pub fn parse(s: &str) -> SignerResult<(String, Self)> {
        let (name, bytes) = decode_named(s, 32)?;
        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::KeyParsing("invalid public key bytes".to_string()))?;
        let inner = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| SignerError::KeyParsing(format!("invalid public key: {e}")))?;
        Ok((name, Self { inner }))
    }

    /// Encode as `keyname:base64(public)`.
    pub fn encode(&self, key_name: &str) -> String {
        format!("{key_name}:{}", STANDARD.encode(self.inner.as_bytes()))
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.inner
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = STANDARD.encode(self.inner.as_bytes());
        write!(f, "PublicKey({}...)", &b64[..8])
    }
}

/// A named key pair.
pub struct KeyPair {
    /// Key name, e.g. `mirror.example.org-1`.
    pub name: String,
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair with the given name.
    pub fn generate(name: impl Into<String>) -> Self {
        let secret = SecretKey::generate();
        let public = secret.public_key();
        Self {
            name: name.into(),
            secret,
            public,
        }
    }

    pub fn public_key_string(&self) -> String {
        self.public.encode(&self.name)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.name)
            .field("public", &self.public)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_roundtrip() {
        let keypair = KeyPair::generate("mirror-1");
        let (name, public) = PublicKey::parse(&keypair.public_key_string()).unwrap();
        assert_eq!(name, "mirror-1");
        assert_eq!(public, keypair.public);
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!(PublicKey::parse("no-colon").is_err());
        assert!(PublicKey::parse(":AAAA").is_err());
        assert!(PublicKey::parse("name:not base64!").is_err());
        assert!(PublicKey::parse("name:AAAA").is_err());
    }
}
