//! Download jobs and their state machine.

use crate::error::{Attempt, FailureKind, FetchError, JobFailure};
use pkgmesh_catalog::{Location, ServerRow};
use pkgmesh_core::ArtifactId;
use pkgmesh_peers::PeerCandidate;
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// Source tiers in the order they are consulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceTier {
    Cache,
    Peer,
    Server,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Peer => "peer",
            Self::Server => "server",
        }
    }
}

/// Identity of a source for per-source leasing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Peer(SocketAddr),
    Server(i64),
}

/// A source a job may fetch from.
#[derive(Clone, Debug)]
pub enum Candidate {
    Peer(PeerCandidate),
    /// A catalog server, with the artifact's location on it.
    Server { server: ServerRow, location: Location },
}

impl Candidate {
    pub fn tier(&self) -> SourceTier {
        match self {
            Self::Peer(_) => SourceTier::Peer,
            Self::Server { .. } => SourceTier::Server,
        }
    }

    pub fn key(&self) -> SourceKey {
        match self {
            Self::Peer(peer) => SourceKey::Peer(peer.address),
            Self::Server { server, .. } => SourceKey::Server(server.id),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(peer) => write!(f, "peer {}", peer.address),
            Self::Server { server, location } => write!(f, "server {} ({location})", server.name),
        }
    }
}

/// Lifecycle of a job.
///
/// `Pending → Assigned → Fetching → Verifying → Committed`; a failed fetch or
/// verification goes back to `Assigned` against the next candidate, and to
/// `Failed` once none is left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Assigned,
    Fetching,
    Verifying,
    Committed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    pub fn can_transition(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Failed)
                | (Assigned, Fetching)
                | (Assigned, Failed)
                | (Fetching, Verifying)
                | (Fetching, Assigned)
                | (Fetching, Failed)
                | (Verifying, Committed)
                | (Verifying, Assigned)
                | (Verifying, Failed)
        )
    }
}

/// One artifact being fetched. Owned by the worker running it.
#[derive(Debug)]
pub struct DownloadJob {
    pub id: Uuid,
    pub artifact: ArtifactId,
    candidates: Vec<Candidate>,
    next: usize,
    state: JobState,
    attempts: Vec<Attempt>,
}

impl DownloadJob {
    pub fn new(artifact: ArtifactId, candidates: Vec<Candidate>) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact,
            candidates,
            next: 0,
            state: JobState::Pending,
            attempts: Vec::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// Move to `next`.
    pub fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition(next),
            "invalid job transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(job = %self.id, from = ?self.state, to = ?next, "Job transition");
        self.state = next;
    }

    /// Assign the next untried candidate. `None` once the list is exhausted.
    pub fn assign_next(&mut self) -> Option<Candidate> {
        let candidate = self.candidates.get(self.next)?.clone();
        self.next += 1;
        self.transition(JobState::Assigned);
        Some(candidate)
    }

    /// Record a failed attempt against the candidate assigned last.
    pub fn record_failure(&mut self, candidate: &Candidate, error: FetchError) {
        self.attempts.push(Attempt {
            order: self.next,
            source: candidate.to_string(),
            error,
        });
    }

    /// Close the job as failed.
    pub fn fail(mut self, fatal: bool) -> JobFailure {
        self.transition(JobState::Failed);
        let kind = if fatal {
            FailureKind::Fatal
        } else if self
            .attempts
            .iter()
            .any(|a| matches!(a.error, FetchError::IntegrityFailure(_)))
        {
            FailureKind::Untrustworthy
        } else {
            FailureKind::Exhausted
        };
        JobFailure {
            artifact: self.artifact.to_string(),
            kind,
            attempts: self.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmesh_core::{MediaIdentity, MediaKey, MediaScope, SafeRelativePath};

    fn artifact() -> ArtifactId {
        let media = MediaIdentity::new(
            MediaKey::new("9", "x86_64", "extras").unwrap(),
            MediaScope::Custom,
        )
        .unwrap();
        ArtifactId::new(media, SafeRelativePath::parse("a.rpm").unwrap())
    }

    fn peer(last: u8) -> Candidate {
        Candidate::Peer(PeerCandidate {
            address: SocketAddr::from(([192, 168, 1, last], 9876)),
            node_id: format!("node-{last}"),
            trusted: false,
        })
    }

    #[test]
    fn test_transition_table() {
        use JobState::*;
        assert!(Pending.can_transition(Assigned));
        assert!(Fetching.can_transition(Assigned));
        assert!(Verifying.can_transition(Committed));
        assert!(!Pending.can_transition(Committed));
        assert!(!Fetching.can_transition(Committed));
        assert!(!Committed.can_transition(Assigned));
        assert!(!Failed.can_transition(Assigned));
        assert!(Committed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_candidates_tried_once_in_order() {
        let mut job = DownloadJob::new(artifact(), vec![peer(2), peer(3)]);
        let first = job.assign_next().unwrap();
        job.transition(JobState::Fetching);
        job.record_failure(&first, FetchError::SourceUnavailable("refused".to_string()));

        let second = job.assign_next().unwrap();
        job.transition(JobState::Fetching);
        job.transition(JobState::Verifying);
        job.record_failure(&second, FetchError::IntegrityFailure("sha256".to_string()));
        assert!(job.assign_next().is_none());

        let failure = job.fail(false);
        assert_eq!(failure.kind, FailureKind::Untrustworthy);
        assert_eq!(failure.attempts.len(), 2);
        assert_eq!(failure.attempts[0].order, 1);
        assert_eq!(failure.attempts[0].source, "peer 192.168.1.2:9876");
        assert_eq!(failure.attempts[1].order, 2);
    }

    #[test]
    fn test_no_candidates_is_exhausted() {
        let job = DownloadJob::new(artifact(), Vec::new());
        let failure = job.fail(false);
        assert_eq!(failure.kind, FailureKind::Exhausted);
        assert!(failure.attempts.is_empty());
    }
}
