//! Per-test browser session.
//!
//! A `Session` owns everything one test touches: the browser (when
//! launched), the fixture server, a client on the extension background, the
//! HTTP bridge when `tab_source = "bridge"` and a `Page` on the fixture tab. Starting one resets the browser to a single
//! tab on the fixture, so tests never see each other's tabs, zoom or mute
//! state.

use crate::dom::clear_selection;
use crate::{fixtures_dir, init_tracing};
use keynav_cdp::coverage::CoverageRecorder;
use keynav_cdp::{
    BrowserMode, Command, DevServer, ExtensionApi, ExtensionBridge, FixtureServer, HarnessConfig,
    HarnessError, KeyBindings, Page, Result, StaticUrlServer, Tab, TabSource, TargetDiscovery,
    TargetKind, TestBrowser, WaitConfig, wait_for_value,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between strokes of a multi-key binding such as `gg`.
const KEY_GAP: Duration = Duration::from_millis(30);

/// Browser, fixtures and extension access for one test.
#[derive(Debug)]
pub struct Session {
    config: HarnessConfig,
    browser: Option<TestBrowser>,
    server: Box<dyn DevServer>,
    discovery: TargetDiscovery,
    ext: ExtensionApi,
    bridge: Option<ExtensionBridge>,
    page: Page,
}

impl Session {
    /// Starts a session on `fixture` (a path under the fixtures dir, query
    /// string allowed).
    ///
    /// Returns `Ok(None)` after logging a warning when the environment
    /// can't run browser tests: launch mode with no extension configured,
    /// or attach mode with nothing listening on the debugging port.
    ///
    /// # Errors
    ///
    /// Returns configuration, launch and connection errors.
    pub async fn start(fixture: &str) -> Result<Option<Self>> {
        init_tracing();

        let config: HarnessConfig = HarnessConfig::figment(None).extract()?;
        if config.mode == BrowserMode::Launch && config.extension_path.is_none() {
            warn!("skipping: set KEYNAV_EXTENSION_PATH or extension_path in keynav.toml");
            return Ok(None);
        }
        config.validate()?;

        if config.mode == BrowserMode::Attach {
            if let Err(e) = config.discovery().version().await {
                warn!(port = config.cdp_port, "skipping: no browser to attach to ({e})");
                return Ok(None);
            }
        }

        Self::start_with(config, fixture).await.map(Some)
    }

    /// Starts a session with an explicit, already validated config.
    ///
    /// # Errors
    ///
    /// Returns launch, fixture server and connection errors.
    pub async fn start_with(config: HarnessConfig, fixture: &str) -> Result<Self> {
        let browser = match config.mode {
            BrowserMode::Launch => Some(TestBrowser::launch(config.browser_config()?).await?),
            BrowserMode::Attach => None,
        };
        let discovery = config.discovery();

        let server: Box<dyn DevServer> = match &config.fixture_url {
            Some(url) => Box::new(StaticUrlServer::new(url.as_str())),
            None => Box::new(
                FixtureServer::start(config.fixtures_dir_or(&fixtures_dir()), config.fixture_port)
                    .await?,
            ),
        };
        server.health_check().await?;

        let bridge = match config.tab_source {
            TabSource::Bridge => Some(ExtensionBridge::start(config.bridge_port).await?),
            TabSource::Background => None,
        };

        let ext = ExtensionApi::connect(
            &discovery,
            config.extension_id.as_deref(),
            config.wait_config(),
        )
        .await?;

        let url = server.url(fixture);
        ext.reset_tabs(&url).await?;
        let page = attach_by_url(&discovery, &url, config.wait_config()).await?;

        let session = Self {
            config,
            browser,
            server,
            discovery,
            ext,
            bridge,
            page,
        };
        session.prepare_page().await?;
        info!(fixture, "session ready");
        Ok(session)
    }

    /// Brings the page forward, clears selection and waits for content
    /// scripts to settle.
    async fn prepare_page(&self) -> Result<()> {
        self.page.wait_for_load(self.config.wait_config()).await?;
        self.page.bring_to_front().await?;
        clear_selection(&self.page).await?;
        self.settle().await;
        Ok(())
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The attached fixture page.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Extension background access.
    #[must_use]
    pub fn ext(&self) -> &ExtensionApi {
        &self.ext
    }

    /// HTTP bridge, when tab state is read through it.
    #[must_use]
    pub fn bridge(&self) -> Option<&ExtensionBridge> {
        self.bridge.as_ref()
    }

    /// The active tab, read from the configured `tab_source`.
    ///
    /// # Errors
    ///
    /// Returns `TargetNotFound` when no tab is active, or a bridge error.
    pub async fn active_tab(&self) -> Result<Tab> {
        match &self.bridge {
            Some(bridge) => bridge.active_tab().await,
            None => self.ext.active_tab().await,
        }
    }

    /// Every tab ordered by window then index, read from the configured
    /// `tab_source`.
    ///
    /// # Errors
    ///
    /// Returns a background or bridge error.
    pub async fn all_tabs(&self) -> Result<Vec<Tab>> {
        match &self.bridge {
            Some(bridge) => bridge.all_tabs().await,
            None => self.ext.all_tabs().await,
        }
    }

    /// `/json` client.
    #[must_use]
    pub fn discovery(&self) -> &TargetDiscovery {
        &self.discovery
    }

    /// Effective key bindings.
    #[must_use]
    pub fn bindings(&self) -> &KeyBindings {
        &self.config.keys
    }

    /// Polling config from `[wait]`.
    #[must_use]
    pub fn wait(&self) -> WaitConfig {
        self.config.wait_config()
    }

    /// Absolute URL of a fixture path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        self.server.url(path)
    }

    /// Navigates the attached page to another fixture and waits for it to
    /// settle.
    ///
    /// # Errors
    ///
    /// Returns an error if the fixture server is down or the page doesn't
    /// load.
    pub async fn goto(&self, path: &str) -> Result<()> {
        self.page.navigate_to(self.server.as_ref(), path).await?;
        self.prepare_page().await
    }

    /// Sleeps for `settle_ms`.
    pub async fn settle(&self) {
        tokio::time::sleep(self.config.settle()).await;
    }

    /// Sends the keys bound to `command`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` or a dispatch error.
    pub async fn press(&self, command: Command) -> Result<()> {
        let notation = self.bindings().notation(command);
        debug!(%command, keys = notation, "pressing");
        self.page.send_keys(notation, KEY_GAP).await
    }

    /// Sends raw key notation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` or a dispatch error.
    pub async fn keys(&self, notation: &str) -> Result<()> {
        self.page.send_keys(notation, KEY_GAP).await
    }

    /// Polls a page expression until truthy.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout`.
    pub async fn wait_until(&self, expression: &str, description: &str) -> Result<()> {
        self.page
            .wait_for_js(expression, self.wait(), description)
            .await
    }

    /// Opens a fixture in a new background tab.
    ///
    /// # Errors
    ///
    /// Returns an error if the tab can't be created.
    pub async fn open_tab(&self, path: &str) -> Result<Tab> {
        let tab = self.ext.create_tab(&self.url(path), false).await?;
        debug!(tab = tab.id, path, "opened tab");
        Ok(tab)
    }

    /// Polls until the browser has exactly `count` tabs.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout`.
    pub async fn wait_for_tab_count(&self, count: usize) -> Result<Vec<Tab>> {
        wait_for_value(
            move || async move {
                let tabs = self.all_tabs().await?;
                Ok((tabs.len() == count).then_some(tabs))
            },
            self.wait(),
            &format!("{count} tabs"),
        )
        .await
    }

    /// Polls until the active tab satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout`.
    pub async fn wait_for_active_tab<P>(&self, predicate: P, description: &str) -> Result<Tab>
    where
        P: Fn(&Tab) -> bool,
    {
        let predicate = &predicate;
        wait_for_value(
            move || async move {
                let tab = self.active_tab().await?;
                Ok(predicate(&tab).then_some(tab))
            },
            self.wait(),
            description,
        )
        .await
    }

    /// Moves key input to the currently active tab: finds its page target
    /// by URL and re-attaches.
    ///
    /// # Errors
    ///
    /// Returns `TargetNotFound` if no page target has the tab's URL.
    pub async fn attach_active(&mut self) -> Result<Tab> {
        let tab = self.active_tab().await?;
        let url = tab
            .url
            .clone()
            .ok_or_else(|| HarnessError::TargetNotFound("URL of the active tab".to_string()))?;
        self.page = attach_by_url(&self.discovery, &url, self.wait()).await?;
        self.prepare_page().await?;
        Ok(tab)
    }

    /// Starts call counting on the page when coverage is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the Profiler domain is unavailable.
    pub async fn start_coverage(&self) -> Result<Option<CoverageRecorder<'_>>> {
        if !self.config.coverage.enabled {
            return Ok(None);
        }
        CoverageRecorder::start(self.page.client()).await.map(Some)
    }

    /// Writes the extension-script part of a coverage delta to
    /// `<output_dir>/<name>.json`.
    ///
    /// # Errors
    ///
    /// Returns Profiler or I/O errors.
    pub async fn save_coverage(
        &self,
        name: &str,
        recorder: Option<CoverageRecorder<'_>>,
    ) -> Result<Option<PathBuf>> {
        let Some(recorder) = recorder else {
            return Ok(None);
        };
        let mut delta = recorder.finish().await?;
        if let Some(id) = self.ext.extension_id() {
            delta = delta.retain_url_prefix(&format!("chrome-extension://{id}/"));
        }

        let path = self.config.coverage.output_dir.join(format!("{name}.json"));
        delta.write_json(&path)?;
        info!(
            test = name,
            functions = delta.functions_hit().len(),
            hits = delta.total_hits(),
            "coverage written to {}",
            path.display()
        );
        Ok(Some(path))
    }

    /// Console errors and exceptions logged by the page so far.
    #[must_use]
    pub fn console_errors(&self) -> Vec<String> {
        self.page
            .console()
            .errors()
            .into_iter()
            .map(|m| m.text)
            .collect()
    }

    /// Closes the browser when this session launched it.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser doesn't close cleanly.
    pub async fn close(self) -> Result<()> {
        let Self { browser, page, .. } = self;
        drop(page);
        if let Some(browser) = browser {
            browser.close().await?;
        }
        Ok(())
    }
}

/// Waits for a page target at `url` and attaches to it.
async fn attach_by_url(discovery: &TargetDiscovery, url: &str, wait: WaitConfig) -> Result<Page> {
    let target = discovery
        .wait_for_target(
            |t| t.kind == TargetKind::Page && t.url == url,
            wait,
            &format!("page target at {url}"),
        )
        .await?;
    Page::attach(target).await
}
