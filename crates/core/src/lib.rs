//! Core domain types shared by every pkgmesh crate.
//!
//! This crate defines:
//! - Media and server identities, and the official/custom scope split
//! - Sanitised relative paths
//! - Artifact identities, fingerprints and detached signatures
//! - Package records and EVR ordering
//! - Configuration types

pub mod artifact;
pub mod config;
pub mod error;
pub mod hash;
pub mod media;
pub mod package;
pub mod path;

pub use artifact::{ArtifactId, Signature};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use media::{
    IpMode, MediaIdentity, MediaKey, MediaScope, Protocol, ReplicationPolicy, ServerKey,
};
pub use package::{Evr, PackageRecord, compare_version, latest_only};
pub use path::SafeRelativePath;
