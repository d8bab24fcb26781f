//! Package records and epoch:version-release ordering.

use crate::artifact::Signature;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Epoch, version and release of a package.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evr {
    #[serde(default)]
    pub epoch: u32,
    pub version: String,
    pub release: String,
}

impl Evr {
    pub fn new(epoch: u32, version: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release: release.into(),
        }
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_version(&self.version, &other.version))
            .then_with(|| compare_version(&self.release, &other.release))
    }
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
enum Run<'a> {
    Num(&'a str),
    Alpha(&'a str),
}

impl PartialEq for Run<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Run<'_> {}

impl Ord for Run<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Run::Num(a), Run::Num(b)) => {
                // Compare digit strings without parsing so long runs cannot overflow.
                let a = a.trim_start_matches('0');
                let b = b.trim_start_matches('0');
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Run::Alpha(a), Run::Alpha(b)) => a.cmp(b),
            (Run::Num(_), Run::Alpha(_)) => Ordering::Less,
            (Run::Alpha(_), Run::Num(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Run<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split into maximal runs of ASCII digits or ASCII letters; everything else
/// is a separator. An empty string compares as `"0"`.
fn runs(s: &str) -> Vec<Run<'_>> {
    let s = if s.is_empty() { "0" } else { s };
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        if bytes[i].is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            out.push(Run::Num(&s[start..i]));
        } else if bytes[i].is_ascii_alphabetic() {
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            out.push(Run::Alpha(&s[start..i]));
        } else {
            i += 1;
        }
    }
    out
}

/// Compare two version (or release) strings run by run.
///
/// Numbers sort before letters, and a strict prefix sorts first
/// (`1.0 < 1.0.1`).
pub fn compare_version(a: &str, b: &str) -> Ordering {
    runs(a).cmp(&runs(b))
}

/// One package as advertised by a media's metadata.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    #[serde(flatten)]
    pub evr: Evr,
    pub arch: String,
    /// File name relative to the media root.
    pub filename: String,
    pub size: u64,
    pub sha256: Option<ContentHash>,
    /// Publisher signature over the package fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// Keep only the highest EVR of each package name.
///
/// Output is sorted by name for stable planning.
pub fn latest_only(packages: impl IntoIterator<Item = PackageRecord>) -> Vec<PackageRecord> {
    let mut latest: HashMap<String, PackageRecord> = HashMap::new();
    for pkg in packages {
        match latest.get(&pkg.name) {
            Some(current) if current.evr >= pkg.evr => {}
            _ => {
                latest.insert(pkg.name.clone(), pkg);
            }
        }
    }
    let mut out: Vec<_> = latest.into_values().collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}
