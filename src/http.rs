//! Node HTTP surfaces
//!
//! Two small routers make up a node's wire presence:
//!
//! - [`data_router`]: the data surface keyed transports hit. Every
//!   request path is served as a file read from the node's data
//!   directory, plus a `/healthz` probe. The transport layer only
//!   inspects status codes, so any server answering `[200, 399]` for
//!   held keys works in its place.
//! - [`provider_router`]: the provider control surface, exposing a
//!   [`Provider`] over HTTP so a remote supervisor can enumerate keys
//!   and trigger updates. [`HttpProvider`] is the matching client.

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::common::utils::{slash, unslash};
use crate::common::{Error, Result};
use crate::provider::Provider;

/// Router serving the files under `root` at their relative paths.
pub fn data_router(root: PathBuf) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(serve_key)
        .with_state(Arc::new(root))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn serve_key(State(root): State<Arc<PathBuf>>, uri: Uri) -> impl IntoResponse {
    let rel = uri.path().trim_start_matches('/');
    let rel = Path::new(rel);

    // Only plain descending paths reach the filesystem.
    let traversal = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if rel.as_os_str().is_empty() || traversal {
        return (StatusCode::NOT_FOUND, Vec::new());
    }

    match tokio::fs::read(root.join(rel)).await {
        Ok(bytes) => (StatusCode::OK, bytes),
        Err(_) => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

/// Router exposing a provider's capability set:
///
/// ```text
/// GET  /keys?prefix=<p>   JSON array of keys under the prefix
/// GET  /keys/<key>        204 when held, 404 otherwise
/// POST /update/<key>      materialize/refresh the key, 204 on success
/// ```
pub fn provider_router(provider: Arc<dyn Provider>) -> Router {
    Router::new()
        .route("/keys", get(list_provider_keys))
        .route("/keys/{*key}", get(check_provider_key))
        .route("/update/{*key}", post(update_provider_key))
        .with_state(provider)
}

#[derive(Deserialize)]
struct KeysQuery {
    #[serde(default)]
    prefix: String,
}

async fn list_provider_keys(
    State(provider): State<Arc<dyn Provider>>,
    Query(query): Query<KeysQuery>,
) -> impl IntoResponse {
    match provider.keys(&query.prefix).await {
        Ok(keys) => (StatusCode::OK, Json(keys)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn check_provider_key(
    State(provider): State<Arc<dyn Provider>>,
    AxumPath(key): AxumPath<String>,
) -> StatusCode {
    match provider.has_key(&slash(&key)).await {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn update_provider_key(
    State(provider): State<Arc<dyn Provider>>,
    AxumPath(key): AxumPath<String>,
) -> impl IntoResponse {
    match provider.update(&slash(&key)).await {
        Ok(()) => (StatusCode::NO_CONTENT, String::new()),
        Err(e) if e.is_not_found() => (StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// [`Provider`] implementation over a remote [`provider_router`].
pub struct HttpProvider {
    base: String,
    http: reqwest::Client,
}

impl HttpProvider {
    /// `base` is the provider surface's URL, e.g. `http://10.0.0.5:7071`.
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn upstream_error(resp: reqwest::Response) -> Error {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Error::Upstream {
            status,
            body: body.trim().to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Provider for HttpProvider {
    async fn has_key(&self, key: &str) -> Result<bool> {
        let url = format!("{}/keys/{}", self.base, unslash(key));
        let resp = self.http.get(&url).send().await?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::upstream_error(resp).await),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/keys", self.base);
        let resp = self
            .http
            .get(&url)
            .query(&[("prefix", prefix)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::upstream_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn update(&self, key: &str) -> Result<()> {
        let url = format!("{}/update/{}", self.base, unslash(key));
        let resp = self.http.post(&url).send().await?;
        match resp.status().as_u16() {
            200..=299 => Ok(()),
            404 => Err(Error::NotFound(slash(key))),
            _ => Err(Self::upstream_error(resp).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;

    async fn serve(router: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_serves_files_and_health() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("repos/x"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("repos/x/y"), b"valY")
            .await
            .unwrap();
        let addr = serve(data_router(dir.path().to_path_buf())).await;

        let resp = reqwest::get(format!("http://{}/healthz", addr)).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let resp = reqwest::get(format!("http://{}/repos/x/y", addr))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.text().await.unwrap(), "valY");

        let resp = reqwest::get(format!("http://{}/missing", addr)).await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("inside"), b"x").await.unwrap();
        let addr = serve(data_router(dir.path().join("sub"))).await;

        let resp = reqwest::get(format!("http://{}/../inside", addr))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_provider_over_http_roundtrip() {
        let local = Arc::new(MemoryProvider::new(["/alice", "/repos/x/y"]));
        let addr = serve(provider_router(local.clone())).await;
        let remote = HttpProvider::new(&format!("http://{}", addr));

        assert!(remote.has_key("/alice").await.unwrap());
        assert!(!remote.has_key("/bob").await.unwrap());

        assert_eq!(
            remote.keys("").await.unwrap(),
            vec!["/alice", "/repos/x/y"]
        );
        assert_eq!(remote.keys("/repos").await.unwrap(), vec!["/repos/x/y"]);

        remote.update("/carol").await.unwrap();
        assert!(local.has_key("/carol").await.unwrap());
    }
}
