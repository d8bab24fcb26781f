//! Quota-driven eviction of cached artifacts.
//!
//! Files no longer referenced by the media's metadata go first. Among the
//! rest, the most obsolete go first, where obsolescence is the time since last
//! access divided by `1 + priority` of the media.
//!
//! Quotas are per media, so one pass sees a single priority and the score
//! orders entries exactly as their raw age does. Priority only changes the
//! outcome when scores of different media are compared.

use crate::error::{FetchError, FetchResult};
use crate::metrics::EVICTIONS;
use pkgmesh_cache::{CacheEntry, CacheStore};
use pkgmesh_core::{MediaIdentity, SafeRelativePath};
use std::cmp::Ordering;
use std::collections::HashSet;
use time::OffsetDateTime;

/// Outcome of an eviction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub removed: usize,
    pub bytes: u64,
    /// Usage of the media once the pass finished.
    pub usage: u64,
}

/// Obsolescence of an entry; higher is evicted earlier.
pub fn obsolescence(entry: &CacheEntry, priority: i64, now: OffsetDateTime) -> f64 {
    let age = (now - entry.last_used()).whole_seconds().max(0) as f64;
    age / (1.0 + priority.max(0) as f64)
}

/// Order `entries` from first to last evicted.
pub fn eviction_order(
    entries: &mut [CacheEntry],
    referenced: &HashSet<SafeRelativePath>,
    priority: i64,
    now: OffsetDateTime,
) {
    entries.sort_by(|a, b| {
        let a_ref = referenced.contains(&a.key);
        let b_ref = referenced.contains(&b.key);
        a_ref.cmp(&b_ref).then_with(|| {
            obsolescence(b, priority, now)
                .partial_cmp(&obsolescence(a, priority, now))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        })
    });
}

/// Remove artifacts of `media` until its usage is at most `quota` bytes.
///
/// Keys in `pinned` are never removed. Fails with `QuotaExceeded` when the
/// quota cannot be met.
pub async fn evict(
    cache: &CacheStore,
    media: &MediaIdentity,
    priority: i64,
    quota: u64,
    referenced: &HashSet<SafeRelativePath>,
    pinned: &HashSet<SafeRelativePath>,
) -> FetchResult<EvictionReport> {
    let mut entries = cache.holdings(&media.subtree()).await?;
    let mut usage: u64 = entries.iter().map(|e| e.size).sum();
    let mut report = EvictionReport::default();
    if usage <= quota {
        report.usage = usage;
        return Ok(report);
    }

    entries.retain(|e| !pinned.contains(&e.key));
    eviction_order(&mut entries, referenced, priority, OffsetDateTime::now_utc());

    for entry in entries {
        if usage <= quota {
            break;
        }
        match cache.delete(&entry.key).await {
            Ok(()) | Err(pkgmesh_cache::CacheError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        usage = usage.saturating_sub(entry.size);
        report.removed += 1;
        report.bytes += entry.size;
        EVICTIONS.inc();
        tracing::debug!(key = %entry.key, size = entry.size, "Evicted artifact");
    }
    report.usage = usage;

    if report.removed > 0 {
        tracing::info!(
            media = %media,
            removed = report.removed,
            bytes = report.bytes,
            usage,
            quota,
            "Eviction finished"
        );
    }
    if usage > quota {
        return Err(FetchError::QuotaExceeded(format!(
            "media {media} uses {usage} bytes, quota is {quota}"
        )));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmesh_core::{MediaKey, MediaScope};
    use time::Duration;

    fn entry(key: &str, size: u64, age_secs: i64, now: OffsetDateTime) -> CacheEntry {
        CacheEntry {
            key: SafeRelativePath::parse(key).unwrap(),
            size,
            modified: now - Duration::seconds(age_secs),
            accessed: now - Duration::seconds(age_secs),
        }
    }

    fn media() -> MediaIdentity {
        MediaIdentity::new(
            MediaKey::new("9", "x86_64", "extras").unwrap(),
            MediaScope::Custom,
        )
        .unwrap()
    }

    #[test]
    fn test_unreferenced_first_then_oldest() {
        let now = OffsetDateTime::now_utc();
        let mut entries = vec![
            entry("custom/extras/new.rpm", 1, 10, now),
            entry("custom/extras/old.rpm", 1, 1000, now),
            entry("custom/extras/gone.rpm", 1, 5, now),
        ];
        let referenced: HashSet<_> = ["custom/extras/new.rpm", "custom/extras/old.rpm"]
            .into_iter()
            .map(|k| SafeRelativePath::parse(k).unwrap())
            .collect();

        eviction_order(&mut entries, &referenced, 10, now);
        let order: Vec<_> = entries.iter().map(|e| e.key.file_name()).collect();
        assert_eq!(order, ["gone.rpm", "old.rpm", "new.rpm"]);
    }

    #[test]
    fn test_priority_slows_obsolescence() {
        let now = OffsetDateTime::now_utc();
        let e = entry("custom/extras/a.rpm", 1, 1100, now);
        assert!(obsolescence(&e, 10, now) < obsolescence(&e, 0, now));
        assert!((obsolescence(&e, 10, now) - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_priority_does_not_reorder_one_media() {
        let now = OffsetDateTime::now_utc();
        let fresh = || {
            vec![
                entry("custom/extras/b.rpm", 1, 30, now),
                entry("custom/extras/a.rpm", 1, 300, now),
                entry("custom/extras/c.rpm", 1, 3, now),
            ]
        };
        let none = HashSet::new();
        let mut low = fresh();
        let mut high = fresh();
        eviction_order(&mut low, &none, 0, now);
        eviction_order(&mut high, &none, 90, now);

        let order = |v: &[CacheEntry]| {
            v.iter()
                .map(|e| e.key.file_name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&low), ["a.rpm", "b.rpm", "c.rpm"]);
        assert_eq!(order(&low), order(&high));
    }

    #[tokio::test]
    async fn test_evict_until_under_quota() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path()).await.unwrap();
        let media = media();
        for name in ["a.rpm", "b.rpm", "c.rpm"] {
            let key = media.subtree().join(&SafeRelativePath::parse(name).unwrap());
            cache.put(&key, vec![0u8; 100].into()).await.unwrap();
        }
        let keep: HashSet<_> = [media
            .subtree()
            .join(&SafeRelativePath::parse("a.rpm").unwrap())]
        .into_iter()
        .collect();

        let report = evict(&cache, &media, 50, 150, &keep, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.usage, 100);
        let left = cache.holdings(&media.subtree()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key.file_name(), "a.rpm");
    }

    #[tokio::test]
    async fn test_quota_exceeded_when_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path()).await.unwrap();
        let media = media();
        let key = media
            .subtree()
            .join(&SafeRelativePath::parse("media_info/synthesis.hdlist.cz").unwrap());
        cache.put(&key, vec![0u8; 100].into()).await.unwrap();
        let pinned: HashSet<_> = [key].into_iter().collect();

        let err = evict(&cache, &media, 50, 10, &HashSet::new(), &pinned)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::QuotaExceeded(_)));
    }
}
