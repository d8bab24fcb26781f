//! Multi-source downloads and replication for pkgmesh.
//!
//! This crate provides:
//! - The [`Coordinator`]: cache, then peers, then ranked servers, with
//!   single-flight jobs and an integrity gate before commit
//! - The [`ReplicationEngine`]: seed/full planning, metadata sync and
//!   quota eviction
//! - The idle-gated background [`Scheduler`]

pub mod coordinator;
pub mod error;
pub mod eviction;
pub mod idle;
pub mod job;
pub mod metrics;
pub mod replication;
pub mod scheduler;
mod transfer;
pub mod verify;

#[cfg(test)]
mod testutil;

pub use coordinator::{ArtifactRequest, Coordinator, Fetched, FetchedFrom, Freshness};
pub use error::{Attempt, FailureKind, FetchError, FetchResult, JobFailure};
pub use eviction::{EvictionReport, evict};
pub use idle::IdleMonitor;
pub use job::{Candidate, DownloadJob, JobState, SourceTier};
pub use replication::{
    ConfigMembership, DependencyResolver, MediaIndex, MembershipSource, NoDependencies, NoIndex,
    ReplicationEngine, ReplicationPlan, ReplicationReport, SyncReport,
};
pub use scheduler::{Scheduler, TaskKind};
pub use verify::verify_artifact;
