//! Fixture server lifecycle.
//!
//! Content scripts are not injected into `file://` or `data:` pages by
//! default, so fixtures are served over plain HTTP on localhost. The
//! `DevServer` trait is all the rest of the harness sees: a base URL and a
//! health check. `FixtureServer` serves a directory; `StaticUrlServer`
//! points at something already running.

use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use axum::Router;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

/// A running HTTP server that tests navigate to.
#[async_trait]
pub trait DevServer: Send + Sync {
    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:9873`.
    fn base_url(&self) -> &str;

    /// Fails fast if the server is down. Defaults to Ok.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Joins a path onto the base URL.
    ///
    /// ```ignore
    /// server.url("/scroll-test.html") // "http://127.0.0.1:9873/scroll-test.html"
    /// ```
    fn url(&self, path: &str) -> String {
        let base = self.base_url().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

impl fmt::Debug for dyn DevServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevServer")
            .field("base_url", &self.base_url())
            .finish()
    }
}

/// A server the harness doesn't manage, e.g. a fixture server started by
/// `keynav serve` in another terminal.
#[derive(Debug, Clone)]
pub struct StaticUrlServer {
    base_url: String,
}

impl StaticUrlServer {
    /// Wraps an existing base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DevServer for StaticUrlServer {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn health_check(&self) -> Result<()> {
        ping(&self.url("/")).await
    }
}

async fn ping(url: &str) -> Result<()> {
    let response = reqwest::Client::builder()
        .no_proxy()
        .build()?
        .get(url)
        .send()
        .await
        .map_err(|e| HarnessError::ConnectionFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(HarnessError::ConnectionFailed {
            url: url.to_string(),
            reason: format!("fixture server answered {}", response.status()),
        })
    }
}

/// Serves a directory of static fixtures on localhost.
///
/// The server runs on a background task that is aborted when the value is
/// dropped.
pub struct FixtureServer {
    root: PathBuf,
    addr: SocketAddr,
    base_url: String,
    task: JoinHandle<()>,
}

impl FixtureServer {
    /// Binds `127.0.0.1:<port>` and starts serving `root`. Port 0 picks a
    /// free port.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `root` is not a directory, or `Io` if the port
    /// can't be bound.
    pub async fn start(root: impl AsRef<Path>, port: u16) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(HarnessError::Config(format!(
                "fixtures directory '{}' does not exist",
                root.display()
            )));
        }

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
        let addr = listener.local_addr()?;

        let app = Router::new().fallback_service(ServeDir::new(&root));
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("fixture server stopped: {e}");
            }
        });

        let base_url = format!("http://{addr}");
        info!(root = %root.display(), url = %base_url, "fixture server listening");

        Ok(Self {
            root,
            addr,
            base_url,
            task,
        })
    }

    /// Directory being served.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Serves until the task ends. Used by `keynav serve`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the server task panicked.
    pub async fn run_forever(mut self) -> Result<()> {
        (&mut self.task).await.map_err(std::io::Error::other)?;
        Ok(())
    }
}

#[async_trait]
impl DevServer for FixtureServer {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn health_check(&self) -> Result<()> {
        ping(&self.url("/")).await
    }
}

impl fmt::Debug for FixtureServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureServer")
            .field("root", &self.root)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        debug!(url = %self.base_url, "stopping fixture server");
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_server_url_joining() {
        let server = StaticUrlServer::new("http://127.0.0.1:9873");
        assert_eq!(
            server.url("/scroll-test.html"),
            "http://127.0.0.1:9873/scroll-test.html"
        );
        assert_eq!(server.url("index.html"), "http://127.0.0.1:9873/index.html");

        let server_with_slash = StaticUrlServer::new("http://127.0.0.1:9873/");
        assert_eq!(server_with_slash.url("/a"), "http://127.0.0.1:9873/a");
    }

    #[tokio::test]
    async fn serves_files_from_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<title>fixtures</title>").unwrap();
        std::fs::write(dir.path().join("page.html"), "<p id=x>hello</p>").unwrap();

        let server = FixtureServer::start(dir.path(), 0).await.unwrap();
        assert_ne!(server.port(), 0);
        server.health_check().await.unwrap();

        let body = reqwest::get(server.url("page.html"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "<p id=x>hello</p>");
    }

    #[tokio::test]
    async fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "ok").unwrap();
        let server = FixtureServer::start(dir.path(), 0).await.unwrap();

        let status = reqwest::get(server.url("nope.html")).await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = FixtureServer::start(dir.path().join("absent"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[tokio::test]
    async fn health_check_fails_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "ok").unwrap();
        let server = FixtureServer::start(dir.path(), 0).await.unwrap();
        let remote = StaticUrlServer::new(server.base_url().to_string());
        remote.health_check().await.unwrap();

        drop(server);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(remote.health_check().await.is_err());
    }
}
