//! JSON payloads exchanged between peers.

use pkgmesh_core::MediaKey;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use time::OffsetDateTime;

/// A `(version, architecture)` pair a peer serves.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    pub version: String,
    pub arch: String,
}

impl Capability {
    pub fn new(version: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            arch: arch.into(),
        }
    }

    /// Whether this capability covers the media.
    pub fn covers(&self, media: &MediaKey) -> bool {
        self.version == media.version && self.arch == media.arch
    }
}

/// Self-announcement, sent over UDP broadcast and `POST /api/announce`.
///
/// The address host is taken from the packet or connection source; only the
/// HTTP port travels in the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    pub node_id: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Unix seconds at the sender.
    pub timestamp: i64,
}

impl Announce {
    pub fn new(node_id: impl Into<String>, port: u16, capabilities: Vec<Capability>) -> Self {
        Self {
            node_id: node_id.into(),
            port,
            capabilities,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    /// Basic sanity checks on a received announce.
    pub fn validate(&self) -> Result<(), String> {
        if self.node_id.is_empty() || self.node_id.len() > 128 {
            return Err("node_id must be 1..=128 bytes".to_string());
        }
        if self.port == 0 {
            return Err("port must not be 0".to_string());
        }
        if self.capabilities.len() > 256 {
            return Err("too many capabilities".to_string());
        }
        Ok(())
    }
}

/// Answer to `POST /api/announce`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceAck {
    pub status: String,
    /// Whether the receiver already knew the sender.
    pub known: bool,
}

/// Body of `POST /api/have`: one cache key or a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HaveRequest {
    Single { key: String },
    Batch { keys: Vec<String> },
}

/// One available artifact in a batch answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaveEntry {
    pub key: String,
    pub size: u64,
}

/// Answer to `POST /api/have`, shaped after the request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HaveResponse {
    Single {
        available: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    Batch {
        available: Vec<HaveEntry>,
        missing: Vec<String>,
        available_count: usize,
        missing_count: usize,
    },
}

/// Trust state of a known peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    /// Seen on the network, nothing fetched from it yet.
    Announced,
    /// Served at least one artifact that passed verification.
    Trusted,
    /// Served bad bytes or was blacklisted by hand.
    Blacklisted,
}

/// A row of `GET /api/peers`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub address: SocketAddr,
    pub node_id: Option<String>,
    pub capabilities: Vec<Capability>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    pub state: PeerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_have_request_shapes() {
        let single: HaveRequest = serde_json::from_str(r#"{"key":"custom/x/a.rpm"}"#).unwrap();
        assert_eq!(
            single,
            HaveRequest::Single {
                key: "custom/x/a.rpm".to_string()
            }
        );
        let batch: HaveRequest = serde_json::from_str(r#"{"keys":["a","b"]}"#).unwrap();
        assert!(matches!(batch, HaveRequest::Batch { keys } if keys.len() == 2));
    }

    #[test]
    fn test_have_response_shapes() {
        let missing = serde_json::to_value(HaveResponse::Single {
            available: false,
            size: None,
        })
        .unwrap();
        assert_eq!(missing, serde_json::json!({ "available": false }));

        let batch: HaveResponse = serde_json::from_str(
            r#"{"available":[{"key":"a","size":3}],"missing":["b"],"available_count":1,"missing_count":1}"#,
        )
        .unwrap();
        assert!(matches!(batch, HaveResponse::Batch { available_count: 1, .. }));
    }

    #[test]
    fn test_announce_validation() {
        let ok = Announce::new("node-a", 9876, vec![Capability::new("9", "x86_64")]);
        assert!(ok.validate().is_ok());
        assert!(Announce::new("", 9876, vec![]).validate().is_err());
        assert!(Announce::new("node-a", 0, vec![]).validate().is_err());
    }
}
