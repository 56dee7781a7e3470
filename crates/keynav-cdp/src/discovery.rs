//! Debugging target discovery over the `/json` HTTP endpoints.
//!
//! Chrome started with `--remote-debugging-port` lists its targets at
//! `http://127.0.0.1:<port>/json/list`. Each entry carries the WebSocket URL
//! a [`CdpClient`](crate::client::CdpClient) connects to. The same endpoint
//! family opens, activates and closes tabs without needing a browser-level
//! session.

use crate::error::{HarnessError, Result};
use crate::wait::{WaitConfig, wait_for_value};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Classification of a debugging target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// A regular tab.
    Page,
    /// A Manifest V2 extension background page.
    BackgroundPage,
    /// A Manifest V3 extension service worker.
    ServiceWorker,
    /// An out-of-process iframe.
    Iframe,
    /// A dedicated or shared worker.
    Worker,
    /// Anything else (`browser`, `webview`, `other`, ...).
    #[serde(other)]
    Other,
}

impl TargetKind {
    /// True for targets that can host an extension's background context.
    #[must_use]
    pub fn is_background(self) -> bool {
        matches!(self, TargetKind::BackgroundPage | TargetKind::ServiceWorker)
    }
}

/// One entry of the `/json/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target id, also the last path segment of the WebSocket URL.
    pub id: String,
    /// Target type.
    #[serde(rename = "type")]
    pub kind: TargetKind,
    /// Document title (empty for workers).
    #[serde(default)]
    pub title: String,
    /// Current URL.
    #[serde(default)]
    pub url: String,
    /// WebSocket URL. Absent while another client holds an exclusive session.
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    /// Returns the WebSocket URL or a `TargetNotFound` error naming the target.
    ///
    /// # Errors
    ///
    /// Fails when the target does not currently expose a WebSocket URL.
    pub fn ws_url(&self) -> Result<&str> {
        self.web_socket_debugger_url
            .as_deref()
            .ok_or_else(|| HarnessError::TargetNotFound(format!("a debuggable '{}'", self.id)))
    }

    /// The extension id if this target runs on a `chrome-extension://` URL.
    #[must_use]
    pub fn extension_id(&self) -> Option<&str> {
        self.url
            .strip_prefix("chrome-extension://")
            .and_then(|rest| rest.split('/').next())
            .filter(|id| !id.is_empty())
    }

    /// True if this is the background context of an extension, optionally a
    /// specific one.
    #[must_use]
    pub fn is_extension_background(&self, extension_id: Option<&str>) -> bool {
        if !self.kind.is_background() {
            return false;
        }
        match (self.extension_id(), extension_id) {
            (Some(found), Some(wanted)) => found == wanted,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Case-insensitive match on id, title or URL, used by CLI lookups.
    #[must_use]
    pub fn matches(&self, needle: &str) -> bool {
        if self.id == needle {
            return true;
        }
        let needle = needle.to_lowercase();
        self.title.to_lowercase().contains(&needle) || self.url.to_lowercase().contains(&needle)
    }
}

impl fmt::Display for TargetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:?}] {} ({})", self.id, self.kind, self.title, self.url)
    }
}

/// Response of `/json/version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserVersion {
    /// Product string, e.g. `Chrome/131.0.6778.85`.
    #[serde(rename = "Browser")]
    pub browser: String,
    /// CDP version.
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    /// WebSocket URL of the browser-level target.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// HTTP client for the `/json` endpoints of one debugging port.
#[derive(Debug, Clone)]
pub struct TargetDiscovery {
    base_url: String,
    http: reqwest::Client,
}

impl TargetDiscovery {
    /// Discovery against `127.0.0.1:<port>`.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self::with_base_url(format!("http://127.0.0.1:{port}"))
    }

    /// Discovery against an explicit base URL (no trailing slash).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Base URL requests go to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lists every target.
    ///
    /// # Errors
    ///
    /// Returns `Http` if the debugging port is unreachable.
    pub async fn list(&self) -> Result<Vec<TargetInfo>> {
        let targets: Vec<TargetInfo> = self
            .http
            .get(format!("{}/json/list", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(count = targets.len(), "listed debugging targets");
        Ok(targets)
    }

    /// Lists page targets only.
    ///
    /// # Errors
    ///
    /// Returns `Http` if the debugging port is unreachable.
    pub async fn pages(&self) -> Result<Vec<TargetInfo>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.kind == TargetKind::Page)
            .collect())
    }

    /// Browser version and browser-level WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns `Http` if the debugging port is unreachable.
    pub async fn version(&self) -> Result<BrowserVersion> {
        Ok(self
            .http
            .get(format!("{}/json/version", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Opens a new tab on `url` and returns its target.
    ///
    /// Chrome only accepts `PUT` for this endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Http` on transport or status errors.
    pub async fn open(&self, url: &str) -> Result<TargetInfo> {
        let target: TargetInfo = self
            .http
            .put(format!("{}/json/new?{url}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(id = %target.id, url, "opened page target");
        Ok(target)
    }

    /// Brings a target's tab to the foreground.
    ///
    /// # Errors
    ///
    /// Returns `Http` on transport or status errors.
    pub async fn activate(&self, id: &str) -> Result<()> {
        self.http
            .get(format!("{}/json/activate/{id}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Closes a target.
    ///
    /// # Errors
    ///
    /// Returns `Http` on transport or status errors.
    pub async fn close(&self, id: &str) -> Result<()> {
        self.http
            .get(format!("{}/json/close/{id}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Finds the background context of an extension.
    ///
    /// # Errors
    ///
    /// Returns `TargetNotFound` if no extension background is listed.
    pub async fn extension_background(&self, extension_id: Option<&str>) -> Result<TargetInfo> {
        self.list()
            .await?
            .into_iter()
            .find(|t| t.is_extension_background(extension_id))
            .ok_or_else(|| {
                HarnessError::TargetNotFound(match extension_id {
                    Some(id) => format!("extension background for '{id}'"),
                    None => "any extension background".to_string(),
                })
            })
    }

    /// Polls the target list until one matches `predicate`.
    ///
    /// Service workers of freshly loaded extensions can take a moment to
    /// appear, so callers wait rather than look once.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if nothing matches in time.
    pub async fn wait_for_target<P>(
        &self,
        predicate: P,
        wait: WaitConfig,
        description: &str,
    ) -> Result<TargetInfo>
    where
        P: Fn(&TargetInfo) -> bool,
    {
        let predicate = &predicate;
        wait_for_value(
            move || async move {
                let targets = self.list().await?;
                Ok::<_, HarnessError>(targets.into_iter().find(|t| predicate(t)))
            },
            wait,
            description,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"[
        {
            "description": "",
            "devtoolsFrontendUrl": "/devtools/inspector.html?ws=127.0.0.1:9222/devtools/page/079471019CB0",
            "id": "079471019CB0",
            "title": "Hints fixture",
            "type": "page",
            "url": "http://127.0.0.1:9873/hints-test.html",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/079471019CB0"
        },
        {
            "id": "5591A6D431C2",
            "title": "Service Worker chrome-extension://abcdefghijklmnop/background.js",
            "type": "service_worker",
            "url": "chrome-extension://abcdefghijklmnop/background.js",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/5591A6D431C2"
        },
        {
            "id": "B7",
            "title": "",
            "type": "webview",
            "url": "about:blank"
        }
    ]"#;

    fn listing() -> Vec<TargetInfo> {
        serde_json::from_str(LISTING).expect("listing parses")
    }

    #[test]
    fn parses_target_listing() {
        let targets = listing();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].kind, TargetKind::Page);
        assert_eq!(targets[1].kind, TargetKind::ServiceWorker);
        assert_eq!(targets[2].kind, TargetKind::Other);
        assert!(targets[2].web_socket_debugger_url.is_none());
    }

    #[test]
    fn ws_url_requires_debugger_url() {
        let targets = listing();
        assert_eq!(
            targets[0].ws_url().unwrap(),
            "ws://127.0.0.1:9222/devtools/page/079471019CB0"
        );
        assert!(matches!(
            targets[2].ws_url(),
            Err(HarnessError::TargetNotFound(_))
        ));
    }

    #[test]
    fn identifies_extension_background() {
        let targets = listing();
        let worker = &targets[1];
        assert_eq!(worker.extension_id(), Some("abcdefghijklmnop"));
        assert!(worker.is_extension_background(None));
        assert!(worker.is_extension_background(Some("abcdefghijklmnop")));
        assert!(!worker.is_extension_background(Some("other")));
        assert!(!targets[0].is_extension_background(None));
    }

    #[test]
    fn matches_by_id_title_or_url() {
        let page = &listing()[0];
        assert!(page.matches("079471019CB0"));
        assert!(page.matches("hints FIXTURE"));
        assert!(page.matches("hints-test.html"));
        assert!(!page.matches("scroll"));
    }

    #[test]
    fn parses_version() {
        let version: BrowserVersion = serde_json::from_str(
            r#"{
                "Browser": "Chrome/131.0.6778.85",
                "Protocol-Version": "1.3",
                "User-Agent": "Mozilla/5.0",
                "V8-Version": "13.1.201.13",
                "WebKit-Version": "537.36",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/9f0c"
            }"#,
        )
        .unwrap();
        assert_eq!(version.protocol_version, "1.3");
        assert!(version.web_socket_debugger_url.ends_with("/browser/9f0c"));
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let discovery = TargetDiscovery::with_base_url("http://localhost:9222/");
        assert_eq!(discovery.base_url(), "http://localhost:9222");
        assert_eq!(TargetDiscovery::new(9333).base_url(), "http://127.0.0.1:9333");
    }
}
