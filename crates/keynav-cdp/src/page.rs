//! Page-level browser operations and navigation.
//!
//! A `Page` is a `CdpClient` bound to one page target plus a console
//! capture running on it. Content scripts live in that target, so key
//! events, DOM reads and page-side coverage all go through here.

use crate::client::CdpClient;
use crate::console::{ConsoleCapture, spawn_capture};
use crate::discovery::{TargetDiscovery, TargetInfo};
use crate::error::{HarnessError, Result};
use crate::keys::{dispatch_with_commands, parse_keys, send_keys};
use crate::server::DevServer;
use crate::wait::{WaitConfig, wait_for_result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Id of the scratch textarea `paste_clipboard` pastes into.
const PASTE_TARGET_ID: &str = "__keynav_paste_target";

/// Page scroll offsets in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScrollPosition {
    /// `window.scrollX`
    pub x: f64,
    /// `window.scrollY`
    pub y: f64,
}

/// A browser tab with testing capabilities.
#[derive(Debug)]
pub struct Page {
    client: CdpClient,
    target: TargetInfo,
    console: ConsoleCapture,
    console_task: JoinHandle<()>,
}

impl Page {
    /// Connects to an existing page target and starts console capture.
    ///
    /// # Errors
    ///
    /// Returns an error if the target has no WebSocket URL or the
    /// connection fails.
    pub async fn attach(target: TargetInfo) -> Result<Self> {
        let client = CdpClient::connect(target.ws_url()?).await?;
        let console = ConsoleCapture::new();
        let console_task = spawn_capture(&client, console.clone()).await?;
        client.enable("Page").await?;

        debug!(target = %target, "attached to page");
        Ok(Self {
            client,
            target,
            console,
            console_task,
        })
    }

    /// Opens a new tab on `url`, attaches to it and waits for it to load.
    ///
    /// # Errors
    ///
    /// Returns an error if the tab can't be created or never loads.
    pub async fn open(discovery: &TargetDiscovery, url: &str, wait: WaitConfig) -> Result<Self> {
        let target = discovery.open(url).await?;
        let page = Self::attach(target).await?;
        page.wait_for_load(wait).await?;
        Ok(page)
    }

    /// Underlying CDP connection.
    #[must_use]
    pub fn client(&self) -> &CdpClient {
        &self.client
    }

    /// Target this page is attached to.
    #[must_use]
    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    /// Returns a handle to the console message capture.
    #[must_use]
    pub fn console(&self) -> &ConsoleCapture {
        &self.console
    }

    /// Navigates to an absolute URL and waits for load.
    ///
    /// # Errors
    ///
    /// Returns `NavigationFailed` if Chrome reports an `errorText`, or a
    /// wait timeout if the page never completes.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let result = self
            .client
            .send("Page.navigate", json!({ "url": url }))
            .await
            .map_err(|e| HarnessError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(error) = result
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
        {
            return Err(HarnessError::NavigationFailed {
                url: url.to_string(),
                reason: error.to_string(),
            });
        }

        self.wait_for_load(WaitConfig::default()).await
    }

    /// Navigates to a server-relative path after a health check.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is down or navigation fails.
    pub async fn navigate_to(&self, server: &dyn DevServer, path: &str) -> Result<()> {
        server.health_check().await?;
        self.navigate(&server.url(path)).await
    }

    /// Waits until `document.readyState` is `complete`.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if the page doesn't finish loading.
    pub async fn wait_for_load(&self, config: WaitConfig) -> Result<()> {
        wait_for_result(
            move || async move {
                let state: String = self.evaluate("document.readyState").await?;
                Ok(state == "complete")
            },
            config,
            "document ready",
        )
        .await
    }

    /// Raises the tab so it receives key input.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn bring_to_front(&self) -> Result<()> {
        self.client.send("Page.bringToFront", json!({})).await?;
        Ok(())
    }

    /// Evaluates JavaScript in the page's main world.
    ///
    /// Content-script globals live in an isolated world and are not
    /// visible here; their DOM effects are.
    ///
    /// # Errors
    ///
    /// Returns an error if the script throws or the value has the wrong
    /// shape.
    pub async fn evaluate<T: DeserializeOwned>(&self, script: &str) -> Result<T> {
        self.client.evaluate_as(script).await
    }

    /// Polls a JavaScript expression until it is truthy.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` with `description` as the condition.
    pub async fn wait_for_js(
        &self,
        expression: &str,
        config: WaitConfig,
        description: &str,
    ) -> Result<()> {
        let script = truthy_script(expression);
        let script = script.as_str();
        wait_for_result(
            move || async move { self.evaluate::<bool>(script).await },
            config,
            description,
        )
        .await
    }

    /// Waits for a CSS selector to match an element.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if nothing matches in time.
    pub async fn wait_for_selector(&self, selector: &str, config: WaitConfig) -> Result<()> {
        self.wait_for_js(
            &selector_script(selector)?,
            config,
            &format!("selector '{selector}'"),
        )
        .await
    }

    /// Sends a key sequence in extension notation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for bad notation or a dispatch error.
    pub async fn send_keys(&self, notation: &str, gap: Duration) -> Result<()> {
        send_keys(&self.client, notation, gap).await
    }

    /// Current scroll offsets.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    pub async fn scroll_position(&self) -> Result<ScrollPosition> {
        self.evaluate("({ x: window.scrollX, y: window.scrollY })")
            .await
    }

    /// Text of the current selection, empty if none.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    pub async fn selection_text(&self) -> Result<String> {
        self.evaluate("window.getSelection().toString()").await
    }

    /// Reads the system clipboard by pasting into a scratch textarea.
    ///
    /// `navigator.clipboard.readText` needs a permission prompt; the
    /// `paste` editing command attached to a synthetic Ctrl+V does not.
    /// The textarea is removed and focus restored to `<body>` afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch element can't be created or the key
    /// events fail.
    pub async fn paste_clipboard(&self) -> Result<String> {
        let id = serde_json::to_string(PASTE_TARGET_ID)?;
        self.client
            .evaluate(&format!(
                "(() => {{
                    let el = document.getElementById({id});
                    if (!el) {{
                        el = document.createElement('textarea');
                        el.id = {id};
                        el.style.position = 'fixed';
                        el.style.top = '0';
                        el.style.opacity = '0';
                        document.body.appendChild(el);
                    }}
                    el.value = '';
                    el.focus();
                }})()"
            ))
            .await?;

        let strokes = parse_keys("<Ctrl-v>")?;
        for stroke in &strokes {
            dispatch_with_commands(&self.client, stroke, &["paste"]).await?;
        }

        let text: String = self
            .evaluate(&format!(
                "(() => {{
                    const el = document.getElementById({id});
                    const text = el ? el.value : '';
                    if (el) {{ el.blur(); el.remove(); }}
                    return text;
                }})()"
            ))
            .await?;
        Ok(text)
    }

    /// Current page URL.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    pub async fn url(&self) -> Result<String> {
        self.evaluate("window.location.href").await
    }

    /// Page title.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    pub async fn title(&self) -> Result<String> {
        self.evaluate("document.title").await
    }

    /// Closes the tab and the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if `Page.close` is rejected.
    pub async fn close(self) -> Result<()> {
        let result = self.client.send("Page.close", json!({})).await;
        self.console_task.abort();
        self.client.close().await;
        match result {
            // The target may go away before it answers.
            Err(HarnessError::ConnectionClosed) => Ok(()),
            Err(e) => {
                warn!("Page.close failed: {e}");
                Err(e)
            }
            Ok(_) => Ok(()),
        }
    }
}

/// Coerces an expression to a boolean.
fn truthy_script(expression: &str) -> String {
    format!("!!({expression})")
}

/// `querySelector` call with the selector as a JSON string literal, so
/// quotes, backticks and newlines can't end the argument early.
fn selector_script(selector: &str) -> Result<String> {
    let literal = serde_json::to_string(selector)?;
    Ok(format!("document.querySelector({literal})"))
}
