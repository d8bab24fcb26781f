//! Integration tests for HTTP API endpoints.

mod common;

use axum::http::StatusCode;
use common::TestServer;
use serde_json::json;
use std::net::SocketAddr;

fn announce_body(node_id: &str, port: u16) -> serde_json::Value {
    json!({
        "node_id": node_id,
        "port": port,
        "capabilities": [{ "version": "9", "arch": "x86_64" }],
        "timestamp": 1_700_000_000
    })
}

#[tokio::test]
async fn test_ping() {
    let server = TestServer::new().await;
    let (status, body) = server.raw_request("GET", "/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_status() {
    let server = TestServer::new().await;
    let (status, body) = server.json_request("GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);
    assert_eq!(body["port"], server.state.config.server.port);
    assert_eq!(body["node_id"], server.state.peers.node_id());
    assert_eq!(body["peers"], 0);
    assert_eq!(body["workers"], server.state.config.fetch.workers);
    assert!(body["last_refresh"].is_null());
    assert!(body["start_time"].is_string());
}

#[tokio::test]
async fn test_announce_then_list_peers() {
    let server = TestServer::new().await;

    let (status, ack) = server
        .json_request("POST", "/api/announce", Some(announce_body("node-b", 9999)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({ "status": "ok", "known": false }));

    let (_, ack) = server
        .json_request("POST", "/api/announce", Some(announce_body("node-b", 9999)))
        .await;
    assert_eq!(ack["known"], true);

    let (status, peers) = server.json_request("GET", "/api/peers", None).await;
    assert_eq!(status, StatusCode::OK);
    let peers = peers.as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["address"], "127.0.0.1:9999");
    assert_eq!(peers[0]["node_id"], "node-b");
    assert_eq!(peers[0]["state"], "announced");
}

#[tokio::test]
async fn test_announce_rejects_invalid_payload() {
    let server = TestServer::new().await;
    let (status, body) = server
        .json_request("POST", "/api/announce", Some(announce_body("node-b", 0)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_blacklisted_peer_is_listed_with_reason() {
    let server = TestServer::new().await;
    let addr: SocketAddr = "192.168.1.50:9876".parse().unwrap();
    server
        .state
        .peers
        .blacklist(addr, "sha256 mismatch")
        .await
        .unwrap();

    let (_, peers) = server.json_request("GET", "/api/peers", None).await;
    let peers = peers.as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["state"], "blacklisted");
    assert_eq!(peers[0]["reason"], "sha256 mismatch");
}

#[tokio::test]
async fn test_have_single() {
    let server = TestServer::new().await;
    server.cache_put("custom/extras/a.rpm", b"rpm bytes").await;

    let (status, body) = server
        .json_request("POST", "/api/have", Some(json!({ "key": "custom/extras/a.rpm" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "available": true, "size": 9 }));

    let (_, body) = server
        .json_request("POST", "/api/have", Some(json!({ "key": "custom/extras/b.rpm" })))
        .await;
    assert_eq!(body, json!({ "available": false }));

    let (status, body) = server
        .json_request("POST", "/api/have", Some(json!({ "key": "../etc/passwd" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "path_safety_violation");
}

#[tokio::test]
async fn test_have_batch() {
    let server = TestServer::new().await;
    server.cache_put("custom/extras/a.rpm", b"rpm bytes").await;

    let (status, body) = server
        .json_request(
            "POST",
            "/api/have",
            Some(json!({ "keys": ["custom/extras/a.rpm", "custom/extras/b.rpm", "../x"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], json!([{ "key": "custom/extras/a.rpm", "size": 9 }]));
    assert_eq!(body["missing"], json!(["custom/extras/b.rpm", "../x"]));
    assert_eq!(body["available_count"], 1);
    assert_eq!(body["missing_count"], 2);
}

#[tokio::test]
async fn test_media_download() {
    let server = TestServer::new().await;
    server
        .cache_put(
            "official/9/x86_64/media/core/core-release/media_info/MD5SUM",
            b"d41d8cd98f00b204e9800998ecf8427e  a.rpm\n",
        )
        .await;

    let (status, body) = server
        .raw_request(
            "GET",
            "/media/official/9/x86_64/media/core/core-release/media_info/MD5SUM",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"d41d8cd98f00b204e9800998ecf8427e  a.rpm\n");

    let (status, body) = server
        .json_request("GET", "/media/custom/extras/missing.rpm", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = server
        .json_request("GET", "/media/custom/../../etc/passwd", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;
    let (status, body) = server.raw_request("GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("pkgmesh_live_peers"));

    let disabled = TestServer::with_config(|c| c.server.metrics_enabled = false).await;
    let (status, _) = disabled.raw_request("GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
