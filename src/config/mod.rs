use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub browser: BrowserConfig,
    pub site: SiteConfig,
    pub search: SearchConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
}

/// Browser engine driven over WebDriver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Chrome / Chromium via chromedriver
    Chromium,
    /// Firefox via geckodriver
    Firefox,
    /// Safari via safaridriver
    Webkit,
}

impl Engine {
    pub fn default_webdriver_url(self) -> &'static str {
        match self {
            Engine::Chromium => "http://localhost:9515",
            Engine::Firefox => "http://localhost:4444",
            Engine::Webkit => "http://localhost:4445",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Engine::Chromium => "chromium",
            Engine::Firefox => "firefox",
            Engine::Webkit => "webkit",
        };
        f.write_str(name)
    }
}

/// Browser / driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub engine: Engine,

    pub headless: bool,

    /// WebDriver server; falls back to the engine's conventional port.
    pub webdriver_url: Option<String>,

    pub page_load_timeout_secs: u64,

    /// Pause after each navigation so client-side rendering can finish.
    pub settle_ms: u64,

    pub window_width: u32,
    pub window_height: u32,

    /// Serve saved pages from this directory instead of a live browser.
    pub replay_dir: Option<PathBuf>,
}

/// Target site layout
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
}

/// Sampling, pacing and retry knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_posts: usize,

    /// Minimum spacing between the start of consecutive hashtag lookups.
    pub wait_secs: u64,

    pub jitter_ms: u64,

    pub max_attempts: u32,

    pub retry_delay_ms: u64,

    /// Bounded wait for the post grid to render.
    pub element_wait_ms: u64,
}

/// Session persistence
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub persist: bool,

    pub dir: PathBuf,

    pub login_wait_secs: u64,

    pub login_poll_secs: u64,
}

/// Result sink
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,

    /// Rewrite the results file after every verdict.
    pub incremental: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Chromium,
            headless: false,
            webdriver_url: None,
            page_load_timeout_secs: 30,
            settle_ms: 3000,
            window_width: 1280,
            window_height: 800,
            replay_dir: None,
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.instagram.com/".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_posts: 12,
            wait_secs: 3,
            jitter_ms: 0,
            max_attempts: 3,
            retry_delay_ms: 1000,
            element_wait_ms: 5000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist: false,
            dir: PathBuf::from(".tagscout/session"),
            login_wait_secs: 30,
            login_poll_secs: 5,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("hashtag_results.json"),
            incremental: true,
        }
    }
}

impl BrowserConfig {
    pub fn webdriver_url(&self) -> String {
        self.webdriver_url
            .clone()
            .unwrap_or_else(|| self.engine.default_webdriver_url().to_string())
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }
}

impl SearchConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_millis(self.element_wait_ms)
    }
}

impl SessionConfig {
    pub fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("TAGSCOUT").separator("__"))
            .build()
            .context("Failed to read configuration sources")?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_contract() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.search.max_posts, 12);
        assert_eq!(cfg.search.wait_secs, 3);
        assert_eq!(cfg.session.login_wait_secs, 30);
        assert!(!cfg.session.persist);
        assert_eq!(cfg.session.state_path(), PathBuf::from(".tagscout/session/state.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[search]\nmax_posts = 20\n\n[browser]\nengine = \"firefox\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.search.max_posts, 20);
        assert_eq!(cfg.search.max_attempts, 3);
        assert_eq!(cfg.browser.engine, Engine::Firefox);
        assert_eq!(cfg.browser.webdriver_url(), "http://localhost:4444");
    }
}
