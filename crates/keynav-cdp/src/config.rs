//! Layered harness configuration.
//!
//! Sources, lowest to highest priority: built-in defaults, `keynav.toml`
//! (or an explicit path), then `KEYNAV_*` environment variables with `__`
//! separating nested keys (`KEYNAV_WAIT__TIMEOUT_MS=10000`).

use crate::bindings::KeyBindings;
use crate::browser::TestBrowserConfig;
use crate::discovery::TargetDiscovery;
use crate::error::{HarnessError, Result};
use crate::wait::WaitConfig;
use figment::Figment;
use figment::providers::{Env, Format as _, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "keynav.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "KEYNAV_";

/// Finds `keynav.toml` in `start` or the closest ancestor holding one.
#[must_use]
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// How the harness gets a browser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    /// Start Chromium with the extension loaded.
    #[default]
    Launch,
    /// Use a browser already listening on `cdp_port`.
    Attach,
}

/// Where tab state is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabSource {
    /// `chrome.tabs` through the extension's background target.
    #[default]
    Background,
    /// The extension's HTTP bridge poller on `bridge_port`.
    Bridge,
}

/// Polling defaults, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    /// Give up after this long.
    pub timeout_ms: u64,
    /// Poll this often.
    pub interval_ms: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 6000,
            interval_ms: 100,
        }
    }
}

/// Coverage recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageSettings {
    /// Record a delta per test.
    pub enabled: bool,
    /// Where per-test JSON reports go.
    pub output_dir: PathBuf,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: PathBuf::from("target/keynav-coverage"),
        }
    }
}

/// Everything the harness and the suite read from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Remote debugging port.
    pub cdp_port: u16,
    /// Fixture server port.
    pub fixture_port: u16,
    /// HTTP bridge port.
    pub bridge_port: u16,
    /// Launch or attach.
    pub mode: BrowserMode,
    /// Where tab state is read from.
    pub tab_source: TabSource,
    /// Unpacked extension directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_path: Option<PathBuf>,
    /// Extension id, when more than one extension is loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    /// Chrome binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,
    /// New-style headless when launching.
    pub headless: bool,
    /// Window size when launching.
    pub window_size: (u32, u32),
    /// Fixture directory; callers supply their own default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixtures_dir: Option<PathBuf>,
    /// Serve fixtures from an already running server (e.g. `keynav serve`)
    /// instead of starting one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture_url: Option<String>,
    /// Polling defaults.
    pub wait: WaitSettings,
    /// Pause after navigation so content scripts can initialize.
    pub settle_ms: u64,
    /// Coverage recording.
    pub coverage: CoverageSettings,
    /// Key binding overrides by command name.
    pub keys: KeyBindings,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cdp_port: 9222,
            fixture_port: 9873,
            bridge_port: 8888,
            mode: BrowserMode::Launch,
            tab_source: TabSource::Background,
            extension_path: None,
            extension_id: None,
            chrome_path: None,
            headless: true,
            window_size: (1280, 800),
            fixtures_dir: None,
            fixture_url: None,
            wait: WaitSettings::default(),
            settle_ms: 500,
            coverage: CoverageSettings::default(),
            keys: KeyBindings::default(),
        }
    }
}

impl HarnessConfig {
    /// Provider stack: defaults, then the config file, then environment.
    ///
    /// With no explicit path, the nearest `keynav.toml` from the working
    /// directory upwards is used, if any. Test binaries run from their
    /// crate directory, so a workspace-root file is still found.
    #[must_use]
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = config_path.map(Path::to_path_buf).or_else(|| {
            std::env::current_dir()
                .ok()
                .and_then(|cwd| find_config_file(&cwd))
        });
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a source is malformed or validation fails. An
    /// explicit path that doesn't exist is an error.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            if !path.is_file() {
                return Err(HarnessError::Config(format!(
                    "config file '{}' not found",
                    path.display()
                )));
            }
        }
        Self::from_figment(&Self::figment(config_path))
    }

    /// Extracts and validates from a prepared figment.
    ///
    /// # Errors
    ///
    /// Returns `Config` on extraction or validation failure.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first problem, or `InvalidKey` for a
    /// bad `[keys]` override.
    pub fn validate(&self) -> Result<()> {
        if self.mode == BrowserMode::Launch && self.extension_path.is_none() {
            return Err(HarnessError::Config(
                "mode = \"launch\" needs extension_path (or set mode = \"attach\")".to_string(),
            ));
        }
        if self.wait.interval_ms == 0 {
            return Err(HarnessError::Config(
                "wait.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.wait.interval_ms >= self.wait.timeout_ms {
            return Err(HarnessError::Config(format!(
                "wait.interval_ms ({}) must be below wait.timeout_ms ({})",
                self.wait.interval_ms, self.wait.timeout_ms
            )));
        }
        if let Some(url) = &self.fixture_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(HarnessError::Config(format!(
                    "fixture_url '{url}' must be an http(s) URL"
                )));
            }
        }
        self.keys.validate()
    }

    /// Polling config built from `[wait]`.
    #[must_use]
    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig::from_millis(self.wait.timeout_ms, self.wait.interval_ms)
    }

    /// Post-navigation settle delay.
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// `/json` client for `cdp_port`.
    #[must_use]
    pub fn discovery(&self) -> TargetDiscovery {
        TargetDiscovery::new(self.cdp_port)
    }

    /// Fixture directory, falling back to `default`.
    #[must_use]
    pub fn fixtures_dir_or(&self, default: &Path) -> PathBuf {
        self.fixtures_dir
            .clone()
            .unwrap_or_else(|| default.to_path_buf())
    }

    /// Launch settings for `mode = "launch"`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if no extension path is set.
    pub fn browser_config(&self) -> Result<TestBrowserConfig> {
        let extension = self.extension_path.as_ref().ok_or_else(|| {
            HarnessError::Config("extension_path is required to launch a browser".to_string())
        })?;

        let mut config = TestBrowserConfig::new(extension)
            .with_port(self.cdp_port)
            .with_window_size(self.window_size.0, self.window_size.1);
        config.headless = self.headless && !cfg!(feature = "visible");
        if let Some(chrome) = &self.chrome_path {
            config = config.with_chrome_path(chrome);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::Command;
    use figment::Jail;

    fn attach() -> HarnessConfig {
        HarnessConfig {
            mode: BrowserMode::Attach,
            ..HarnessConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.cdp_port, 9222);
        assert_eq!(config.fixture_port, 9873);
        assert_eq!(config.bridge_port, 8888);
        assert_eq!(config.tab_source, TabSource::Background);
        assert_eq!(config.fixture_url, None);
        assert_eq!(config.wait_config(), WaitConfig::default());
        assert_eq!(config.settle(), Duration::from_millis(500));
        assert!(!config.coverage.enabled);
    }

    #[test]
    fn launch_requires_extension_path() {
        let err = HarnessConfig::default().validate().unwrap_err();
        assert!(matches!(err, HarnessError::Config(ref m) if m.contains("extension_path")));

        assert!(attach().validate().is_ok());
        assert!(
            HarnessConfig {
                extension_path: Some(PathBuf::from("/ext")),
                ..HarnessConfig::default()
            }
            .validate()
            .is_ok()
        );
    }

    #[test]
    fn wait_interval_bounds() {
        let mut config = attach();
        config.wait.interval_ms = 0;
        assert!(config.validate().is_err());

        config.wait.interval_ms = 6000;
        assert!(config.validate().is_err());

        config.wait.interval_ms = 50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_key_override_fails_validation() {
        let config = HarnessConfig {
            keys: KeyBindings::new().with(Command::ScrollDown, "<Nope>"),
            ..attach()
        };
        assert!(matches!(
            config.validate(),
            Err(HarnessError::InvalidKey { .. })
        ));
    }

    #[test]
    fn file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                mode = "attach"
                cdp_port = 9333
                settle_ms = 250

                [wait]
                timeout_ms = 10000

                [keys]
                scroll-down = "J"
                "#,
            )?;
            jail.set_env("KEYNAV_CDP_PORT", "9444");
            jail.set_env("KEYNAV_WAIT__INTERVAL_MS", "50");

            let config = HarnessConfig::load(None).expect("config loads");
            assert_eq!(config.mode, BrowserMode::Attach);
            assert_eq!(config.cdp_port, 9444, "env beats file");
            assert_eq!(config.settle_ms, 250);
            assert_eq!(config.wait.timeout_ms, 10000);
            assert_eq!(config.wait.interval_ms, 50);
            assert_eq!(config.keys.notation(Command::ScrollDown), "J");
            assert_eq!(config.keys.notation(Command::ScrollUp), "k");
            Ok(())
        });
    }

    #[test]
    fn bridge_tab_source_and_external_fixtures() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                mode = "attach"
                tab_source = "bridge"
                bridge_port = 8899
                fixture_url = "http://127.0.0.1:9900"
                "#,
            )?;

            let config = HarnessConfig::load(None).expect("config loads");
            assert_eq!(config.tab_source, TabSource::Bridge);
            assert_eq!(config.bridge_port, 8899);
            assert_eq!(config.fixture_url.as_deref(), Some("http://127.0.0.1:9900"));
            Ok(())
        });
    }

    #[test]
    fn fixture_url_must_be_http() {
        let config = HarnessConfig {
            fixture_url: Some("file:///tmp/fixtures".to_string()),
            ..attach()
        };
        assert!(matches!(
            config.validate(),
            Err(HarnessError::Config(ref m)) if m.contains("fixture_url")
        ));
    }

    #[test]
    fn config_file_found_in_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("crates").join("keynav-e2e");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_config_file(&nested), None);

        std::fs::write(dir.path().join(CONFIG_FILE), "mode = \"attach\"\n").unwrap();
        assert_eq!(find_config_file(&nested), Some(dir.path().join(CONFIG_FILE)));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = HarnessConfig::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn explicit_path_is_read() {
        Jail::expect_with(|_jail| {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("ci.toml");
            std::fs::write(
                &path,
                "extension_path = \"/opt/surfingkeys\"\nheadless = false\nwindow_size = [800, 600]\n",
            )
            .unwrap();

            let config = HarnessConfig::load(Some(&path)).expect("config loads");
            assert_eq!(config.extension_path, Some(PathBuf::from("/opt/surfingkeys")));
            assert!(!config.headless);

            let browser = config.browser_config().expect("browser config");
            assert_eq!(browser.window_size, (800, 600));
            assert_eq!(browser.cdp_port, 9222);
            Ok(())
        });
    }

    #[test]
    fn malformed_file_is_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, "cdp_port = \"not a port\"")?;
            let err = HarnessConfig::load(None).unwrap_err();
            assert!(matches!(err, HarnessError::Config(_)));
            Ok(())
        });
    }

    #[test]
    fn fixtures_dir_fallback() {
        let config = attach();
        assert_eq!(
            config.fixtures_dir_or(Path::new("fixtures")),
            PathBuf::from("fixtures")
        );
        let config = HarnessConfig {
            fixtures_dir: Some(PathBuf::from("/srv/fixtures")),
            ..attach()
        };
        assert_eq!(
            config.fixtures_dir_or(Path::new("fixtures")),
            PathBuf::from("/srv/fixtures")
        );
    }

    #[test]
    fn browser_config_needs_extension() {
        assert!(matches!(
            attach().browser_config(),
            Err(HarnessError::Config(_))
        ));
    }
}
