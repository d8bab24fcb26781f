//! On-disk artifact cache.
//!
//! Files live at `<root>/medias/<cache key>`, where the cache key is derived
//! from the media identity alone (see [`pkgmesh_core::ArtifactId::cache_key`]).

use crate::error::{CacheError, CacheResult};
use crate::staging::{StagedWrite, TEMP_MARKER};
use bytes::Bytes;
use pkgmesh_core::SafeRelativePath;
use std::collections::HashSet;
use std::fs::FileTimes;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use tokio::fs;
use tracing::instrument;

/// Directory under the cache root that holds every media subtree.
pub const MEDIAS_DIR: &str = "medias";

/// A cached file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: SafeRelativePath,
    pub size: u64,
    pub modified: OffsetDateTime,
    pub accessed: OffsetDateTime,
}

impl CacheEntry {
    /// Most recent of modification and access time.
    pub fn last_used(&self) -> OffsetDateTime {
        self.modified.max(self.accessed)
    }
}

/// A cached file opened for streaming.
#[derive(Debug)]
pub struct OpenArtifact {
    pub file: fs::File,
    pub size: u64,
}

/// Outcome of [`CacheStore::cleanup_older_than`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub bytes: u64,
}

/// Local filesystem artifact cache.
#[derive(Clone, Debug)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Open the cache under `cache_root`, creating `<cache_root>/medias`.
    pub async fn new(cache_root: impl AsRef<Path>) -> CacheResult<Self> {
        let root = cache_root.as_ref().join(MEDIAS_DIR);
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The `medias` directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path under the root, off the async runtime.
    async fn key_path(&self, key: &SafeRelativePath) -> CacheResult<PathBuf> {
        let root = self.root.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
    }

    /// Map a key to a path, refusing anything that resolves outside the root,
    /// including through symlinks planted inside it.
    fn key_path_sync(root: &Path, key: &SafeRelativePath) -> CacheResult<PathBuf> {
        let rel = Path::new(key.as_str());
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(CacheError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = root.join(rel);
        let root_canonical = root.canonicalize().map_err(|e| {
            CacheError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize cache root: {e}"),
            ))
        })?;

        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        CacheError::InvalidKey(format!("symlink target missing or invalid: {key}"))
                    } else {
                        CacheError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(CacheError::InvalidKey(format!(
                        "resolved path escapes cache root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(CacheError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // New path: the nearest existing ancestor must still be inside the
        // root, otherwise create_dir_all would follow a planted symlink.
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            if parent == root {
                break;
            }
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            CacheError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {key}"
                            ))
                        } else {
                            CacheError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;
                    if !parent_canonical.starts_with(&root_canonical) {
                        return Err(CacheError::InvalidKey(format!(
                            "ancestor path escapes cache root: {key}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(CacheError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    fn not_found(key: &SafeRelativePath) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
        move |e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CacheError::NotFound(key.to_string())
            } else {
                CacheError::Io(e)
            }
        }
    }

    /// Start a staged write for `key`, optionally capped at `limit` bytes.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn stage(
        &self,
        key: &SafeRelativePath,
        limit: Option<u64>,
    ) -> CacheResult<StagedWrite> {
        let path = self.key_path(key).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        StagedWrite::create(key.clone(), path, limit).await
    }

    /// Write `data` under `key` atomically. Returns the number of bytes.
    #[instrument(skip_all, fields(key = %key, size = data.len()))]
    pub async fn put(&self, key: &SafeRelativePath, data: Bytes) -> CacheResult<u64> {
        let mut staged = self.stage(key, None).await?;
        staged.write(&data).await?;
        staged.finish().await?.commit().await
    }

    /// Read a whole artifact.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get(&self, key: &SafeRelativePath) -> CacheResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(Self::not_found(key))?;
        Ok(Bytes::from(data))
    }

    /// Open an artifact for streaming.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn open(&self, key: &SafeRelativePath) -> CacheResult<OpenArtifact> {
        let path = self.key_path(key).await?;
        let file = fs::File::open(&path).await.map_err(Self::not_found(key))?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(CacheError::NotFound(key.to_string()));
        }
        Ok(OpenArtifact {
            file,
            size: meta.len(),
        })
    }

    /// Whether a regular file exists under `key`.
    pub async fn contains(&self, key: &SafeRelativePath) -> CacheResult<bool> {
        Ok(self.stat(key).await?.is_some())
    }

    /// Size and timestamps of an artifact, `None` when absent.
    pub async fn stat(&self, key: &SafeRelativePath) -> CacheResult<Option<CacheEntry>> {
        let path = self.key_path(key).await?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(entry_from_meta(key.clone(), &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an artifact.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn delete(&self, key: &SafeRelativePath) -> CacheResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path).await.map_err(Self::not_found(key))?;
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    /// Record an access, for eviction ordering.
    pub async fn touch(&self, key: &SafeRelativePath) -> CacheResult<()> {
        let path = self.key_path(key).await?;
        let key = key.clone();
        tokio::task::spawn_blocking(move || -> CacheResult<()> {
            let file = std::fs::File::open(&path).map_err(Self::not_found(&key))?;
            file.set_times(FileTimes::new().set_accessed(SystemTime::now()))?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
    }

    /// Every artifact under `prefix` (usually a media subtree), sorted by key.
    /// In-progress writes are skipped.
    #[instrument(skip_all, fields(prefix = %prefix))]
    pub async fn holdings(&self, prefix: &SafeRelativePath) -> CacheResult<Vec<CacheEntry>> {
        let base = self.key_path(prefix).await?;
        let mut entries: Vec<CacheEntry> = self
            .walk(base)
            .await?
            .into_iter()
            .filter_map(|(path, meta)| {
                let key = self.key_of(&path)?;
                Some(entry_from_meta(key, &meta))
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Bytes used under `prefix`.
    pub async fn usage(&self, prefix: &SafeRelativePath) -> CacheResult<u64> {
        Ok(self.holdings(prefix).await?.iter().map(|e| e.size).sum())
    }

    /// Remove artifacts not used for `max_age` unless listed in `keep`.
    /// Leftover temporary files of the same age go too.
    #[instrument(skip_all, fields(max_age_secs = max_age.as_secs()))]
    pub async fn cleanup_older_than(
        &self,
        max_age: Duration,
        keep: &HashSet<SafeRelativePath>,
    ) -> CacheResult<CleanupReport> {
        let cutoff = OffsetDateTime::now_utc() - max_age;
        let mut report = CleanupReport::default();

        for (path, meta) in self.walk(self.root.clone()).await? {
            let modified = system_time(meta.modified().ok());
            let accessed = system_time(meta.accessed().ok());
            let last_used = modified.max(accessed);
            if last_used >= cutoff {
                continue;
            }
            if let Some(key) = self.key_of(&path)
                && keep.contains(&key)
            {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    report.removed += 1;
                    report.bytes += meta.len();
                    self.prune_empty_parents(&path).await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if report.removed > 0 {
            tracing::info!(
                removed = report.removed,
                bytes = report.bytes,
                "Cache cleanup finished"
            );
        }
        Ok(report)
    }

    /// Regular files below `base`, symlinks ignored.
    async fn walk(&self, base: PathBuf) -> CacheResult<Vec<(PathBuf, std::fs::Metadata)>> {
        let mut results = Vec::new();
        match fs::try_exists(&base).await {
            Ok(false) => return Ok(results),
            Ok(true) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(e.into()),
        }

        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                // file_type() does not follow symlinks.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    let meta = entry.metadata().await?;
                    results.push((entry.path(), meta));
                }
            }
        }
        Ok(results)
    }

    /// Cache key of a walked path; `None` for temporary files and names that
    /// are not valid keys.
    fn key_of(&self, path: &Path) -> Option<SafeRelativePath> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(s) => segments.push(s.to_str()?),
                _ => return None,
            }
        }
        if segments.last()?.contains(TEMP_MARKER) {
            return None;
        }
        SafeRelativePath::parse(&segments.join("/")).ok()
    }

    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

fn system_time(t: Option<SystemTime>) -> OffsetDateTime {
    t.map(OffsetDateTime::from)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn entry_from_meta(key: SafeRelativePath, meta: &std::fs::Metadata) -> CacheEntry {
    let modified = system_time(meta.modified().ok());
    let accessed = meta
        .accessed()
        .ok()
        .map(OffsetDateTime::from)
        .unwrap_or(modified);
    CacheEntry {
        key,
        size: meta.len(),
        modified,
        accessed,
    }
}
