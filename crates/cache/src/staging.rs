//! Staged writes: bytes land in a temporary sibling of the canonical path and
//! are renamed into place only on commit.

use crate::error::{CacheError, CacheResult};
use pkgmesh_core::{ContentHash, ContentHasher, SafeRelativePath};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Marker in the file name of in-progress writes.
pub(crate) const TEMP_MARKER: &str = ".tmp.";

/// An in-progress write. Dropping it without [`finish`](Self::finish)
/// removes the temporary file.
pub struct StagedWrite {
    key: SafeRelativePath,
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    hasher: Option<ContentHasher>,
    bytes_written: u64,
    limit: Option<u64>,
}

impl StagedWrite {
    pub(crate) async fn create(
        key: SafeRelativePath,
        final_path: PathBuf,
        limit: Option<u64>,
    ) -> CacheResult<Self> {
        // Unique name so concurrent writers of the same key never share a file.
        let temp_name = format!("{}{}", TEMP_MARKER, Uuid::new_v4());
        let temp_path = final_path.with_file_name(
            final_path
                .file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        let file = fs::File::create(&temp_path).await?;

        Ok(Self {
            key,
            file: Some(file),
            temp_path,
            final_path,
            hasher: Some(ContentHash::hasher()),
            bytes_written: 0,
            limit,
        })
    }

    /// Append bytes. Fails with `TooLarge` once the limit would be passed.
    pub async fn write(&mut self, data: &[u8]) -> CacheResult<()> {
        let total = self.bytes_written + data.len() as u64;
        if let Some(limit) = self.limit
            && total > limit
        {
            return Err(CacheError::TooLarge {
                key: self.key.to_string(),
                limit,
            });
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("staged write already finished"))?;
        file.write_all(data).await?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(data);
        }
        self.bytes_written = total;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush to disk and hand over the staged bytes for verification.
    pub async fn finish(mut self) -> CacheResult<StagedArtifact> {
        if let Some(file) = self.file.take() {
            file.sync_all().await?;
        }
        let sha256 = self
            .hasher
            .take()
            .map(ContentHasher::finalize)
            .unwrap_or_else(|| ContentHash::compute(b""));

        Ok(StagedArtifact {
            key: self.key.clone(),
            temp_path: std::mem::take(&mut self.temp_path),
            final_path: std::mem::take(&mut self.final_path),
            size: self.bytes_written,
            sha256,
        })
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.temp_path.as_os_str().is_empty() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

/// Fully written bytes waiting for the integrity gate.
///
/// Nothing is visible under the canonical name until [`commit`](Self::commit);
/// dropping the value discards the bytes.
pub struct StagedArtifact {
    key: SafeRelativePath,
    temp_path: PathBuf,
    final_path: PathBuf,
    size: u64,
    sha256: ContentHash,
}

impl StagedArtifact {
    pub fn key(&self) -> &SafeRelativePath {
        &self.key
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// SHA-256 of the staged bytes, computed while writing.
    pub fn sha256(&self) -> ContentHash {
        self.sha256
    }

    /// Atomically move the bytes to their canonical path.
    pub async fn commit(mut self) -> CacheResult<u64> {
        let temp_path = std::mem::take(&mut self.temp_path);
        if let Err(err) = fs::rename(&temp_path, &self.final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        tracing::debug!(key = %self.key, size = self.size, "Committed artifact");
        Ok(self.size)
    }

    /// Throw the staged bytes away.
    pub async fn discard(mut self) {
        let temp_path = std::mem::take(&mut self.temp_path);
        let _ = fs::remove_file(&temp_path).await;
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if !self.temp_path.as_os_str().is_empty() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
