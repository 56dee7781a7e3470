//! Browser lifecycle management and process control.
//!
//! `TestBrowser` launches Chromium with the unpacked extension loaded and a
//! fixed remote-debugging port. Everything after launch goes through that
//! port (`/json` discovery plus raw CDP clients), so a launched browser and
//! one started by hand for `attach` mode look the same to the rest of the
//! harness.
//!
//! # Resource Safety
//!
//! chromiumoxide kills the Chrome process when its `Browser` is dropped, so
//! a panicking test doesn't leak processes. Explicit `close()` is still
//! preferred: it waits for Chrome to exit and removes the temporary profile.

use crate::discovery::TargetDiscovery;
use crate::error::{HarnessError, Result};
use crate::page::Page;
use crate::wait::WaitConfig;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for launching a test browser.
#[derive(Debug, Clone)]
pub struct TestBrowserConfig {
    /// Unpacked extension directory to load.
    pub extension_path: PathBuf,

    /// Remote debugging port (default: 9222).
    pub cdp_port: u16,

    /// Run in new-style headless mode (default: true unless the `visible`
    /// feature is on).
    pub headless: bool,

    /// Browser window size (default: 1280x800).
    pub window_size: (u32, u32),

    /// Additional Chrome arguments.
    pub args: Vec<String>,

    /// Chrome executable path (None = auto-detect).
    pub chrome_path: Option<PathBuf>,
}

impl TestBrowserConfig {
    /// Creates a config that loads `extension_path` with defaults for the
    /// rest.
    #[must_use]
    pub fn new(extension_path: impl Into<PathBuf>) -> Self {
        Self {
            extension_path: extension_path.into(),
            cdp_port: 9222,
            headless: !cfg!(feature = "visible"),
            window_size: (1280, 800),
            args: Vec::new(),
            chrome_path: None,
        }
    }

    /// Shows the browser window, for watching a test run.
    #[must_use]
    pub fn visible(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Sets the remote debugging port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.cdp_port = port;
        self
    }

    /// Sets a custom window size.
    #[must_use]
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }

    /// Uses a specific Chrome binary.
    #[must_use]
    pub fn with_chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }

    /// Adds additional Chrome arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Full Chrome argument list, minus the profile directory.
    fn chrome_args(&self, extension: &Path) -> Vec<String> {
        // chromiumoxide's defaults include --disable-extensions, so they
        // are replaced wholesale.
        let mut args: Vec<String> = [
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-backgrounding-occluded-windows",
            "--disable-renderer-backgrounding",
            "--disable-popup-blocking",
            "--disable-sync",
            "--metrics-recording-only",
            "--password-store=basic",
            "--use-mock-keychain",
            "--autoplay-policy=no-user-gesture-required",
            // Containers rarely have user namespaces or a large /dev/shm.
            "--no-sandbox",
            "--disable-dev-shm-usage",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        if self.headless {
            // Legacy headless never loads extensions.
            args.push("--headless=new".to_string());
        }
        args.push(format!(
            "--window-size={},{}",
            self.window_size.0, self.window_size.1
        ));
        args.push(format!("--load-extension={}", extension.display()));
        args.push(format!(
            "--disable-extensions-except={}",
            extension.display()
        ));
        args.extend(self.args.iter().cloned());
        args
    }

    /// Converts to a chromiumoxide `BrowserConfig`.
    #[allow(clippy::result_large_err)]
    fn to_browser_config(&self, user_data_dir: &Path) -> Result<BrowserConfig> {
        let extension = self.extension_path.canonicalize().map_err(|e| {
            HarnessError::LaunchFailed {
                reason: format!(
                    "extension directory '{}' is not readable",
                    self.extension_path.display()
                ),
                source: Some(Box::new(e)),
            }
        })?;

        let mut config = BrowserConfig::builder()
            .with_head()
            .disable_default_args()
            .port(self.cdp_port)
            .user_data_dir(user_data_dir)
            .args(self.chrome_args(&extension));

        if let Some(path) = &self.chrome_path {
            config = config.chrome_executable(path);
        }

        config.build().map_err(|e| HarnessError::LaunchFailed {
            reason: format!("invalid browser configuration: {e}"),
            source: None,
        })
    }
}

/// A launched Chromium with the extension loaded.
///
/// ```ignore
/// let browser = TestBrowser::launch(TestBrowserConfig::new("../surfingkeys/dist")).await?;
/// let page = browser.new_page("http://127.0.0.1:9873/scroll-test.html").await?;
/// page.send_keys("j", Duration::ZERO).await?;
/// browser.close().await?;
/// ```
pub struct TestBrowser {
    inner: Arc<Mutex<Option<Browser>>>,
    handler: JoinHandle<()>,
    discovery: TargetDiscovery,
    user_data_dir: PathBuf,
}

impl TestBrowser {
    /// Launches Chrome and waits for the debugging endpoint to answer.
    ///
    /// # Errors
    ///
    /// Returns `LaunchFailed` if Chrome is missing, the extension directory
    /// is unreadable, or the process fails to start.
    pub async fn launch(config: TestBrowserConfig) -> Result<Self> {
        debug!("Launching browser with config: {:?}", config);

        // A unique profile avoids ProcessSingleton conflicts between runs
        // and starts every run with a clean extension state.
        let user_data_dir =
            std::env::temp_dir().join(format!("keynav-profile-{}", uuid::Uuid::new_v4()));
        let browser_config = config.to_browser_config(&user_data_dir)?;

        let (browser, mut handler) =
            Browser::launch(browser_config)
                .await
                .map_err(|e| HarnessError::LaunchFailed {
                    reason: "failed to launch Chrome process".to_string(),
                    source: Some(Box::new(e)),
                })?;

        // chromiumoxide only processes its CDP traffic while the handler is
        // polled.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser handler error: {}", e);
                }
            }
        });

        let discovery = TargetDiscovery::new(config.cdp_port);
        let version = discovery.version().await?;
        info!(
            browser = %version.browser,
            port = config.cdp_port,
            extension = %config.extension_path.display(),
            "browser launched"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(Some(browser))),
            handler,
            discovery,
            user_data_dir,
        })
    }

    /// `/json` client for this browser's debugging port.
    #[must_use]
    pub fn discovery(&self) -> &TargetDiscovery {
        &self.discovery
    }

    /// Opens a new tab on `url` and attaches a `Page` to it.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` if the browser has been closed, or the
    /// errors of `Page::open`.
    pub async fn new_page(&self, url: &str) -> Result<Page> {
        if self.is_closed().await {
            return Err(HarnessError::AlreadyClosed);
        }
        Page::open(&self.discovery, url, WaitConfig::default()).await
    }

    /// Closes the browser, waits for the process to exit and removes the
    /// temporary profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser fails to close gracefully.
    pub async fn close(self) -> Result<()> {
        let mut browser_guard = self.inner.lock().await;

        if let Some(mut browser) = browser_guard.take() {
            debug!("Closing browser gracefully");
            browser.close().await?;
            if let Err(e) = browser.wait().await {
                warn!("browser process did not exit cleanly: {e}");
            }
        }
        self.handler.abort();

        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            debug!("profile cleanup skipped: {e}");
        }
        Ok(())
    }

    /// Returns true if the browser has been closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

impl std::fmt::Debug for TestBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestBrowser")
            .field("debugging", &self.discovery.base_url())
            .field("profile", &self.user_data_dir)
            .finish_non_exhaustive()
    }
}

impl Drop for TestBrowser {
    fn drop(&mut self) {
        // chromiumoxide's Browser kills the process on drop if close()
        // never took it out.
        self.handler.abort();
        if let Ok(guard) = self.inner.try_lock() {
            if guard.is_some() {
                warn!("TestBrowser dropped without explicit close() - forcing shutdown via Drop");
            }
        }
    }
}
