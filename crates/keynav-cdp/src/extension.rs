//! `chrome.tabs` and `chrome.windows` access through the extension itself.
//!
//! Page targets can't see tab or window state. The extension's background
//! context can, so `ExtensionApi` connects to that target (an MV3 service
//! worker or an MV2 background page) and evaluates promise-returning
//! `chrome.*` calls there, awaiting the promise over CDP.

use crate::client::CdpClient;
use crate::discovery::{TargetDiscovery, TargetInfo};
use crate::error::{HarnessError, Result};
use crate::wait::WaitConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

/// Mute state of a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutedInfo {
    /// Whether the tab is muted.
    pub muted: bool,
    /// Why (`user`, `capture`, `extension`).
    #[serde(default)]
    pub reason: Option<String>,
}

/// Subset of `chrome.tabs.Tab` the suite reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    /// Tab id.
    pub id: i64,
    /// Position within its window.
    pub index: u32,
    /// Owning window.
    pub window_id: i64,
    /// Whether it is the active tab of its window.
    pub active: bool,
    /// Whether it is pinned.
    #[serde(default)]
    pub pinned: bool,
    /// Whether it is producing sound.
    #[serde(default)]
    pub audible: Option<bool>,
    /// Mute state.
    #[serde(default)]
    pub muted_info: Option<MutedInfo>,
    /// URL (requires the `tabs` permission).
    #[serde(default)]
    pub url: Option<String>,
    /// Title (requires the `tabs` permission).
    #[serde(default)]
    pub title: Option<String>,
    /// `loading` or `complete`.
    #[serde(default)]
    pub status: Option<String>,
}

impl Tab {
    /// True if the tab is muted.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted_info.as_ref().is_some_and(|m| m.muted)
    }

    /// URL or empty string.
    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or_default()
    }
}

/// Subset of `chrome.windows.Window`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    /// Window id.
    pub id: i64,
    /// Whether it has focus.
    #[serde(default)]
    pub focused: bool,
    /// `normal`, `popup`, ...
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Tabs, when requested with `populate`.
    #[serde(default)]
    pub tabs: Option<Vec<Tab>>,
}

/// Filter for `chrome.tabs.query`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_focused_window: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    window_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    muted: Option<bool>,
}

impl TabQuery {
    /// Matches every tab.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// The active tab of the last focused window.
    #[must_use]
    pub fn active_in_focused_window() -> Self {
        Self {
            active: Some(true),
            last_focused_window: Some(true),
            ..Self::default()
        }
    }

    /// Restricts to one window.
    #[must_use]
    pub fn in_window(mut self, window_id: i64) -> Self {
        self.window_id = Some(window_id);
        self
    }

    /// Restricts to URLs matching a match pattern.
    #[must_use]
    pub fn with_url(mut self, pattern: impl Into<String>) -> Self {
        self.url = Some(pattern.into());
        self
    }

    /// Restricts by mute state.
    #[must_use]
    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = Some(muted);
        self
    }
}

/// Wraps an async function body so it can be awaited by `Runtime.evaluate`.
fn async_body(body: &str) -> String {
    format!("(async () => {{ {body} }})()")
}

/// Connection to the extension's background context.
#[derive(Debug)]
pub struct ExtensionApi {
    client: CdpClient,
    target: TargetInfo,
}

impl ExtensionApi {
    /// Waits for the extension background target and connects to it.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if no background target shows up, or a
    /// connection error.
    pub async fn connect(
        discovery: &TargetDiscovery,
        extension_id: Option<&str>,
        wait: WaitConfig,
    ) -> Result<Self> {
        let target = discovery
            .wait_for_target(
                |t| t.is_extension_background(extension_id),
                wait,
                "extension background target",
            )
            .await?;
        Self::attach(target).await
    }

    /// Connects to a known background target.
    ///
    /// # Errors
    ///
    /// Returns a connection error.
    pub async fn attach(target: TargetInfo) -> Result<Self> {
        let client = CdpClient::connect(target.ws_url()?).await?;
        info!(
            extension = target.extension_id().unwrap_or("?"),
            "attached to extension background"
        );
        Ok(Self { client, target })
    }

    /// Extension id, from the background target URL.
    #[must_use]
    pub fn extension_id(&self) -> Option<&str> {
        self.target.extension_id()
    }

    /// Background target this API talks to.
    #[must_use]
    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    /// Underlying client, e.g. for coverage or console capture.
    #[must_use]
    pub fn client(&self) -> &CdpClient {
        &self.client
    }

    /// Runs an async function body in the background context.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the body throws or rejects.
    pub async fn call<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        self.client.evaluate_as(&async_body(body)).await
    }

    async fn call_unit(&self, body: &str) -> Result<()> {
        self.client.evaluate(&async_body(body)).await?;
        Ok(())
    }

    /// `chrome.tabs.query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn query_tabs(&self, query: &TabQuery) -> Result<Vec<Tab>> {
        let query = serde_json::to_string(query)?;
        self.call(&format!("return await chrome.tabs.query({query});"))
            .await
    }

    /// All tabs across windows, ordered by window then index.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn all_tabs(&self) -> Result<Vec<Tab>> {
        let mut tabs = self.query_tabs(&TabQuery::all()).await?;
        tabs.sort_by_key(|t| (t.window_id, t.index));
        Ok(tabs)
    }

    /// Active tab of the last focused window.
    ///
    /// # Errors
    ///
    /// Returns `TargetNotFound` if no tab is active.
    pub async fn active_tab(&self) -> Result<Tab> {
        self.query_tabs(&TabQuery::active_in_focused_window())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::TargetNotFound("an active tab".to_string()))
    }

    /// `chrome.tabs.get`.
    ///
    /// # Errors
    ///
    /// Returns an error if no such tab exists.
    pub async fn get_tab(&self, tab_id: i64) -> Result<Tab> {
        self.call(&format!("return await chrome.tabs.get({tab_id});"))
            .await
    }

    /// `chrome.tabs.create`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn create_tab(&self, url: &str, active: bool) -> Result<Tab> {
        let props = json!({ "url": url, "active": active });
        self.call(&format!("return await chrome.tabs.create({props});"))
            .await
    }

    /// `chrome.tabs.update` with arbitrary properties.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn update_tab(&self, tab_id: i64, props: Value) -> Result<Tab> {
        self.call(&format!("return await chrome.tabs.update({tab_id}, {props});"))
            .await
    }

    /// Activates a tab and focuses its window.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn activate_tab(&self, tab_id: i64) -> Result<Tab> {
        let tab = self.update_tab(tab_id, json!({ "active": true })).await?;
        self.update_window(tab.window_id, json!({ "focused": true }))
            .await?;
        Ok(tab)
    }

    /// `chrome.tabs.update(id, {muted})`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn set_muted(&self, tab_id: i64, muted: bool) -> Result<Tab> {
        self.update_tab(tab_id, json!({ "muted": muted })).await
    }

    /// `chrome.tabs.move` within the tab's window.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn move_tab(&self, tab_id: i64, index: i64) -> Result<Tab> {
        self.call(&format!(
            "const moved = await chrome.tabs.move({tab_id}, {{ index: {index} }}); \
             return Array.isArray(moved) ? moved[0] : moved;"
        ))
        .await
    }

    /// `chrome.tabs.remove`.
    ///
    /// # Errors
    ///
    /// Returns an error if any tab doesn't exist.
    pub async fn remove_tabs(&self, tab_ids: &[i64]) -> Result<()> {
        if tab_ids.is_empty() {
            return Ok(());
        }
        let ids = serde_json::to_string(tab_ids)?;
        self.call_unit(&format!("await chrome.tabs.remove({ids});"))
            .await
    }

    /// `chrome.tabs.getZoom`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn get_zoom(&self, tab_id: i64) -> Result<f64> {
        self.call(&format!("return await chrome.tabs.getZoom({tab_id});"))
            .await
    }

    /// `chrome.tabs.setZoom`. A factor of 0 resets to the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn set_zoom(&self, tab_id: i64, factor: f64) -> Result<()> {
        self.call_unit(&format!("await chrome.tabs.setZoom({tab_id}, {factor});"))
            .await
    }

    /// `chrome.windows.create`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn create_window(&self, url: Option<&str>) -> Result<Window> {
        let props = match url {
            Some(url) => json!({ "url": url, "focused": true }),
            None => json!({ "focused": true }),
        };
        self.call(&format!(
            "return await chrome.windows.create({props});"
        ))
        .await
    }

    /// `chrome.windows.update`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn update_window(&self, window_id: i64, props: Value) -> Result<Window> {
        self.call(&format!(
            "return await chrome.windows.update({window_id}, {props});"
        ))
        .await
    }

    /// `chrome.windows.remove`.
    ///
    /// # Errors
    ///
    /// Returns an error if the window doesn't exist.
    pub async fn remove_window(&self, window_id: i64) -> Result<()> {
        self.call_unit(&format!("await chrome.windows.remove({window_id});"))
            .await
    }

    /// `chrome.windows.getAll({populate: true})`, normal windows only.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn all_windows(&self) -> Result<Vec<Window>> {
        self.call(
            "return await chrome.windows.getAll({ populate: true, windowTypes: ['normal'] });",
        )
        .await
    }

    /// Restores a known start state: one window holding one tab on
    /// `keep_url`, active, unmuted, at default zoom.
    ///
    /// # Errors
    ///
    /// Returns an error if any tab or window call fails.
    pub async fn reset_tabs(&self, keep_url: &str) -> Result<Tab> {
        let windows = self.all_windows().await?;

        let Some((first, others)) = windows.split_first() else {
            let window = self.create_window(Some(keep_url)).await?;
            let tab = window
                .tabs
                .and_then(|tabs| tabs.into_iter().next())
                .ok_or_else(|| HarnessError::TargetNotFound("a tab in a new window".into()))?;
            return Ok(tab);
        };

        for window in others {
            self.remove_window(window.id).await?;
        }

        let tabs = first.tabs.clone().unwrap_or_default();
        let Some((keep, extra)) = tabs.split_first() else {
            return self.create_tab(keep_url, true).await;
        };
        let extra: Vec<i64> = extra.iter().map(|t| t.id).collect();
        self.remove_tabs(&extra).await?;

        self.set_zoom(keep.id, 0.0).await?;
        let tab = self
            .update_tab(
                keep.id,
                json!({ "url": keep_url, "active": true, "muted": false }),
            )
            .await?;
        debug!(tab = tab.id, removed = extra.len(), "tabs reset");
        Ok(tab)
    }
}
