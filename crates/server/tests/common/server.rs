//! Server test utilities.

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use pkgmesh_core::SafeRelativePath;
use pkgmesh_core::config::AppConfig;
use pkgmesh_server::{AppState, create_router};
use serde_json::Value;
use std::net::SocketAddr;
use tempfile::TempDir;
use tower::ServiceExt;

/// Source address every test request appears to come from.
#[allow(dead_code)]
pub const CLIENT_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 40000);

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the test configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        adjust(&mut config);

        pkgmesh_server::metrics::register_metrics();
        let state = AppState::from_config(config)
            .await
            .expect("Failed to build app state");
        let router = create_router(state.clone())
            .layer(MockConnectInfo(SocketAddr::from(CLIENT_ADDR)));

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Store `data` in the cache under `key`.
    pub async fn cache_put(&self, key: &str, data: &'static [u8]) {
        let key = SafeRelativePath::parse(key).expect("invalid test key");
        self.state
            .cache
            .put(&key, bytes::Bytes::from_static(data))
            .await
            .expect("Failed to seed cache");
    }

    /// Send a request and return status and raw body.
    pub async fn raw_request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, bytes::Bytes) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    /// Send a request and decode the JSON answer (`Null` when empty).
    pub async fn json_request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = self.raw_request(method, uri, body).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
