//! Artifact signatures for pkgmesh.
//!
//! This crate provides:
//! - Ed25519 key generation and `keyname:base64` key encoding
//! - Signing of artifact fingerprints
//! - Verification against a set of trusted keys

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{KeyPair, PublicKey, SecretKey};
pub use signer::{ArtifactSigner, SignatureStatus, TrustedKeys};
