//! Fetch error taxonomy and terminal job failures.

use pkgmesh_cache::CacheError;
use pkgmesh_catalog::CatalogError;
use pkgmesh_peers::PeerError;
use std::fmt;
use thiserror::Error;

/// Why a fetch, or one attempt of it, failed.
///
/// Messages are kept as strings so one outcome can be handed to every
/// coalesced caller.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("path safety violation: {0}")]
    PathSafetyViolation(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("peer untrusted: {0}")]
    PeerUntrusted(String),

    /// Disk full, permission denied and the like. Never retried.
    #[error("local resource fault: {0}")]
    LocalResource(String),

    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("{0}")]
    Failed(JobFailure),
}

impl FetchError {
    /// Faults that another source cannot fix.
    pub fn is_local_fault(&self) -> bool {
        matches!(self, Self::LocalResource(_) | Self::Cancelled)
    }
}

impl From<CacheError> for FetchError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound(key) => Self::NotFound(key),
            CacheError::InvalidKey(msg) => Self::PathSafetyViolation(msg),
            // The source sent more than the expected size.
            CacheError::TooLarge { .. } => Self::IntegrityFailure(err.to_string()),
            CacheError::Io(e) => Self::LocalResource(e.to_string()),
        }
    }
}

impl From<CatalogError> for FetchError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(msg) => Self::NotFound(msg),
            CatalogError::PathSafetyViolation(msg) => Self::PathSafetyViolation(msg),
            other => Self::LocalResource(format!("catalog: {other}")),
        }
    }
}

impl From<PeerError> for FetchError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::Blacklisted(addr) => Self::PeerUntrusted(addr.to_string()),
            PeerError::Status { status: 404, peer } => {
                Self::NotFound(format!("peer {peer} does not have it"))
            }
            other => Self::SourceUnavailable(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            return Self::NotFound(err.to_string());
        }
        Self::SourceUnavailable(err.to_string())
    }
}

/// Result type for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// How a job ended when no source delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Nobody had the artifact, or every source was unreachable.
    Exhausted,
    /// At least one source served bytes that failed verification and none
    /// served good ones.
    Untrustworthy,
    /// A local fault stopped the job.
    Fatal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::Untrustworthy => "untrustworthy",
            Self::Fatal => "fatal",
        }
    }
}

/// One failed attempt against one source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attempt {
    /// Position in the candidate list, starting at 1.
    pub order: usize,
    /// Human readable source, e.g. `peer 192.168.1.20:9876`.
    pub source: String,
    pub error: FetchError,
}

/// Terminal failure of a download job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobFailure {
    pub artifact: String,
    pub kind: FailureKind,
    pub attempts: Vec<Attempt>,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fetch of {} failed ({})", self.artifact, self.kind.as_str())?;
        if self.attempts.is_empty() {
            return write!(f, ": no source has it");
        }
        for attempt in &self.attempts {
            write!(f, "; {}. {}: {}", attempt.order, attempt.source, attempt.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_mapping() {
        let err: FetchError = CacheError::Io(std::io::Error::other("disk full")).into();
        assert!(err.is_local_fault());
        let err: FetchError = CacheError::TooLarge {
            key: "custom/x/a.rpm".to_string(),
            limit: 3,
        }
        .into();
        assert!(matches!(err, FetchError::IntegrityFailure(_)));
    }

    #[test]
    fn test_failure_lists_attempts_in_order() {
        let failure = JobFailure {
            artifact: "custom/extras/a.rpm".to_string(),
            kind: FailureKind::Untrustworthy,
            attempts: vec![
                Attempt {
                    order: 1,
                    source: "peer 192.168.1.20:9876".to_string(),
                    error: FetchError::IntegrityFailure("sha256 mismatch".to_string()),
                },
                Attempt {
                    order: 2,
                    source: "server mirror-a".to_string(),
                    error: FetchError::SourceUnavailable("timed out".to_string()),
                },
            ],
        };
        let text = failure.to_string();
        assert!(text.starts_with("fetch of custom/extras/a.rpm failed (untrustworthy)"));
        let peer = text.find("1. peer").unwrap();
        let server = text.find("2. server").unwrap();
        assert!(peer < server);
    }
}
