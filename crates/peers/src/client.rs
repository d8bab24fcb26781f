//! HTTP client for talking to other pkgmesh daemons.

use crate::error::{PeerError, PeerResult};
use crate::wire::{Announce, AnnounceAck, HaveRequest, HaveResponse};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use pkgmesh_core::SafeRelativePath;
use std::net::SocketAddr;
use std::time::Duration;

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Client for the peer-facing part of the HTTP API.
#[derive(Clone, Debug)]
pub struct PeerClient {
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl PeerClient {
    pub fn new(connect_timeout: Duration, probe_timeout: Duration) -> PeerResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("pkgmesh/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            probe_timeout,
        })
    }

    fn url(peer: SocketAddr, path: &str) -> String {
        format!("http://{peer}{path}")
    }

    /// URL of an artifact on a peer.
    pub fn media_url(peer: SocketAddr, key: &SafeRelativePath) -> String {
        let mut url = Self::url(peer, "/media");
        for segment in key.segments() {
            url.push('/');
            url.extend(utf8_percent_encode(segment, PATH_SEGMENT));
        }
        url
    }

    /// Ask a peer whether it holds `key`. Returns the size it reports.
    pub async fn probe_have(
        &self,
        peer: SocketAddr,
        key: &SafeRelativePath,
    ) -> PeerResult<Option<u64>> {
        let response = self
            .http
            .post(Self::url(peer, "/api/have"))
            .timeout(self.probe_timeout)
            .json(&HaveRequest::Single {
                key: key.to_string(),
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status {
                peer,
                status: status.as_u16(),
            });
        }
        match response.json::<HaveResponse>().await? {
            HaveResponse::Single {
                available: true,
                size,
            } => Ok(Some(size.unwrap_or_default())),
            HaveResponse::Single { .. } => Ok(None),
            HaveResponse::Batch { available, .. } => Ok(available
                .into_iter()
                .find(|e| e.key == key.as_str())
                .map(|e| e.size)),
        }
    }

    /// Start downloading `key` from a peer. The caller streams the body.
    pub async fn fetch(
        &self,
        peer: SocketAddr,
        key: &SafeRelativePath,
    ) -> PeerResult<reqwest::Response> {
        let response = self.http.get(Self::media_url(peer, key)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status {
                peer,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Announce ourselves to one peer over HTTP.
    pub async fn announce_to(&self, peer: SocketAddr, announce: &Announce) -> PeerResult<AnnounceAck> {
        let response = self
            .http
            .post(Self::url(peer, "/api/announce"))
            .timeout(self.probe_timeout)
            .json(announce)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status {
                peer,
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Capability;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client() -> PeerClient {
        PeerClient::new(Duration::from_secs(2), Duration::from_secs(2)).unwrap()
    }

    fn key(s: &str) -> SafeRelativePath {
        SafeRelativePath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_probe_have() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/have")
                    .json_body(json!({ "key": "custom/extras/a.rpm" }));
                then.status(200).json_body(json!({ "available": true, "size": 42 }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/have")
                    .json_body(json!({ "key": "custom/extras/b.rpm" }));
                then.status(200).json_body(json!({ "available": false }));
            })
            .await;

        let client = client();
        let peer = *server.address();
        assert_eq!(
            client.probe_have(peer, &key("custom/extras/a.rpm")).await.unwrap(),
            Some(42)
        );
        assert_eq!(
            client.probe_have(peer, &key("custom/extras/b.rpm")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_fetch_status_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/media/custom/extras/a-1.0.rpm");
                then.status(200).body("rpm bytes");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/media/custom/extras/missing.rpm");
                then.status(404);
            })
            .await;

        let client = client();
        let peer = *server.address();
        let body = client
            .fetch(peer, &key("custom/extras/a-1.0.rpm"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "rpm bytes");

        let err = client
            .fetch(peer, &key("custom/extras/missing.rpm"))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_announce_to() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/announce")
                    .json_body_partial(r#"{ "node_id": "node-a", "port": 9876 }"#);
                then.status(200).json_body(json!({ "status": "ok", "known": false }));
            })
            .await;

        let announce = Announce::new("node-a", 9876, vec![Capability::new("9", "x86_64")]);
        let ack = client()
            .announce_to(*server.address(), &announce)
            .await
            .unwrap();
        assert_eq!(ack.status, "ok");
        assert!(!ack.known);
        mock.assert_async().await;
    }
}
