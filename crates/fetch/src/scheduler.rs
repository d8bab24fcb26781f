//! Idle-gated background scheduler.
//!
//! Time is quantised into ticks. Each task runs every `interval` with random
//! jitter so machines on one LAN drift apart, and only on ticks where the
//! machine is idle; a busy tick leaves due tasks due.

use crate::error::{FetchError, FetchResult};
use crate::idle::IdleMonitor;
use crate::replication::ReplicationEngine;
use pkgmesh_core::config::CacheConfig;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A periodic background task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    /// Refresh metadata of every enabled media.
    Metadata,
    /// Replicate, enforce quotas, then clean the cache.
    Predownload,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Predownload => "predownload",
        }
    }
}

#[derive(Debug)]
struct ScheduledTask {
    kind: TaskKind,
    interval: Duration,
    next_tick: u64,
}

/// Ticks until the first run: random in `1..=interval*0.5/tick`.
pub fn first_run_ticks(interval: Duration, tick: Duration) -> u64 {
    let max = ((interval.as_secs_f64() * 0.5 / tick.as_secs_f64()) as u64).max(1);
    rand::rng().random_range(1..=max)
}

/// Ticks between runs: `interval` scaled by a random factor in
/// `[1 - jitter, 1 + jitter]`, at least one tick.
pub fn next_run_ticks(interval: Duration, tick: Duration, jitter: f64) -> u64 {
    let scale = if jitter > 0.0 {
        rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter))
    } else {
        1.0
    };
    ((interval.as_secs_f64() * scale / tick.as_secs_f64()).round() as u64).max(1)
}

pub struct Scheduler {
    engine: Arc<ReplicationEngine>,
    idle: IdleMonitor,
    cleanup_max_age: Duration,
    tick: Duration,
    jitter: f64,
    tasks: Vec<ScheduledTask>,
    ticks: u64,
}

impl Scheduler {
    pub fn new(engine: Arc<ReplicationEngine>, cache: &CacheConfig) -> Self {
        let config = engine.config().clone();
        let tick = config.tick();
        let tasks = [
            (TaskKind::Metadata, config.metadata_interval_secs),
            (TaskKind::Predownload, config.predownload_interval_secs),
        ]
        .into_iter()
        .map(|(kind, secs)| {
            let interval = Duration::from_secs(secs);
            ScheduledTask {
                kind,
                interval,
                next_tick: first_run_ticks(interval, tick),
            }
        })
        .collect();
        Self {
            idle: IdleMonitor::new(&config),
            engine,
            cleanup_max_age: cache.cleanup_max_age(),
            tick,
            jitter: config.jitter_factor,
            tasks,
            ticks: 0,
        }
    }

    pub fn with_idle_monitor(mut self, idle: IdleMonitor) -> Self {
        self.idle = idle;
        self
    }

    /// Tasks due at the current tick.
    fn due(&self) -> Vec<TaskKind> {
        self.tasks
            .iter()
            .filter(|t| t.next_tick <= self.ticks)
            .map(|t| t.kind)
            .collect()
    }

    fn reschedule(&mut self, kind: TaskKind) {
        let (tick, jitter, now) = (self.tick, self.jitter, self.ticks);
        if let Some(task) = self.tasks.iter_mut().find(|t| t.kind == kind) {
            task.next_tick = now + next_run_ticks(task.interval, tick, jitter);
            tracing::debug!(task = kind.as_str(), next_tick = task.next_tick, "Task rescheduled");
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(tick_secs = self.tick.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.ticks += 1;

            let due = self.due();
            if due.is_empty() {
                continue;
            }
            if !self.idle.is_idle().await {
                tracing::debug!(tasks = due.len(), "System busy, deferring background work");
                continue;
            }
            for kind in due {
                if cancel.is_cancelled() {
                    break;
                }
                match self.run_task(kind).await {
                    Ok(()) => {}
                    Err(FetchError::Cancelled) => break,
                    Err(e) => tracing::warn!(task = kind.as_str(), error = %e, "Background task failed"),
                }
                self.reschedule(kind);
            }
        }
        tracing::info!("Scheduler stopped");
    }

    async fn run_task(&self, kind: TaskKind) -> FetchResult<()> {
        tracing::info!(task = kind.as_str(), "Running background task");
        match kind {
            TaskKind::Metadata => {
                let reports = self.engine.sync_all_metadata().await?;
                let changed = reports.iter().filter(|r| r.changed).count();
                tracing::info!(media = reports.len(), changed, "Metadata check finished");
            }
            TaskKind::Predownload => {
                let reports = self.engine.run_all().await?;
                let fetched: usize = reports.iter().map(|r| r.fetched).sum();
                tracing::info!(media = reports.len(), fetched, "Predownload finished");
                self.engine.evict_all().await?;
                let keep = self.engine.keep_set().await?;
                self.engine
                    .coordinator()
                    .cache()
                    .cleanup_older_than(self.cleanup_max_age, &keep)
                    .await?;
            }
        }
        Ok(())
    }
}
