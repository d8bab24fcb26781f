//! Persistent peer blacklist.

use crate::error::PeerResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Why and when a peer was blacklisted. Entries are keyed by host, so the
/// peer cannot escape by announcing another port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// Address the peer was serving from when it was blacklisted.
    pub address: SocketAddr,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub since: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BlacklistFile {
    #[serde(default)]
    peers: BTreeMap<IpAddr, BlacklistEntry>,
}

/// JSON file holding the blacklist. Each save replaces the file atomically.
#[derive(Clone, Debug)]
pub struct BlacklistStore {
    path: Option<PathBuf>,
}

impl BlacklistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A store that keeps nothing across restarts.
    pub fn ephemeral() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the blacklist. A missing file is an empty blacklist; an
    /// unreadable one is logged and treated the same.
    pub async fn load(&self) -> PeerResult<BTreeMap<IpAddr, BlacklistEntry>> {
        let Some(path) = &self.path else {
            return Ok(BTreeMap::new());
        };
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<BlacklistFile>(&data) {
            Ok(file) => Ok(file.peers),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt peer blacklist");
                Ok(BTreeMap::new())
            }
        }
    }

    /// Write the blacklist via temp file, fsync and rename.
    pub async fn save(&self, peers: &BTreeMap<IpAddr, BlacklistEntry>) -> PeerResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(&BlacklistFile {
            peers: peers.clone(),
        })?;
        let temp_path = path.with_file_name(format!(
            "{}.tmp.{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4()
        ));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlacklistStore::new(dir.path().join("state/peer-blacklist.json"));
        assert!(store.load().await.unwrap().is_empty());

        let mut peers = BTreeMap::new();
        peers.insert(
            "192.168.1.20".parse().unwrap(),
            BlacklistEntry {
                address: "192.168.1.20:9876".parse().unwrap(),
                reason: "sha256 mismatch".to_string(),
                since: OffsetDateTime::UNIX_EPOCH,
                node_id: Some("node-b".to_string()),
            },
        );
        store.save(&peers).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, peers);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("state"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer-blacklist.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = BlacklistStore::new(&path);
        assert!(store.load().await.unwrap().is_empty());
    }
}
