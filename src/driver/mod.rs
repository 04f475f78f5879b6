//! Browser capability boundary.
//!
//! The sampler and session manager only ever talk to a [`BrowserDriver`]:
//! navigate, read the page, query elements, wait for a selector and move the
//! opaque credential state in and out. Two implementations exist:
//!
//! - [`webdriver::WebDriverBrowser`] drives a real browser over W3C WebDriver.
//! - [`snapshot::SnapshotDriver`] replays saved HTML pages offline.

pub mod snapshot;
pub mod webdriver;

use crate::config::BrowserConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub use snapshot::SnapshotDriver;
pub use webdriver::WebDriverBrowser;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("element not rendered or detached: {0}")]
    Element(String),

    #[error("page unreachable: {0}")]
    Unreachable(String),

    #[error("browser session lost: {0}")]
    SessionLost(String),

    #[error("browser failed to launch: {0}")]
    Launch(String),

    #[error("invalid browser state: {0}")]
    State(String),

    #[error("driver error: {0}")]
    Other(String),
}

impl DriverError {
    /// Worth another attempt after a short pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Timeout(_) | DriverError::Element(_))
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Text and the requested attributes of one matched element, captured at
/// query time so no live element handle outlives the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSnapshot {
    pub text: String,
    pub attrs: BTreeMap<String, String>,
}

impl ElementSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, url: &str) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    async fn page_source(&self) -> DriverResult<String>;

    /// All elements matching `selector`, in document order.
    async fn query(&self, selector: &str, attrs: &[&str]) -> DriverResult<Vec<ElementSnapshot>>;

    /// `Ok(false)` when nothing matched within `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> DriverResult<bool>;

    /// Cookie/storage state of the current context as an opaque JSON blob.
    async fn export_state(&self) -> DriverResult<serde_json::Value>;

    /// Load a blob previously produced by `export_state`. The caller must
    /// already be on a page of the target origin.
    async fn import_state(&self, state: &serde_json::Value) -> DriverResult<()>;

    async fn close(self: Box<Self>) -> DriverResult<()>;
}

/// The live browser, or the offline replay when `replay_dir` is set.
pub async fn launch(config: &BrowserConfig) -> DriverResult<Box<dyn BrowserDriver>> {
    match &config.replay_dir {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(DriverError::Launch(format!("replay directory {:?} does not exist", dir)));
            }
            info!("Replaying saved pages from {:?}", dir);
            Ok(Box::new(SnapshotDriver::from_dir(dir.clone())))
        }
        None => Ok(Box::new(WebDriverBrowser::launch(config).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DriverError::Timeout("goto".into()).is_transient());
        assert!(DriverError::Element("time".into()).is_transient());
        assert!(!DriverError::Unreachable("404".into()).is_transient());
        assert!(!DriverError::SessionLost("gone".into()).is_transient());
        assert!(!DriverError::Launch("no driver".into()).is_transient());
    }

    #[tokio::test]
    async fn test_launch_replay_requires_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<nav>Home</nav>").unwrap();

        let mut config = BrowserConfig::default();
        config.replay_dir = Some(dir.path().to_path_buf());
        let driver = launch(&config).await.unwrap();
        driver.goto("https://www.instagram.com/").await.unwrap();
        assert!(driver.page_source().await.unwrap().contains("Home"));

        config.replay_dir = Some(dir.path().join("missing"));
        assert!(matches!(launch(&config).await.err(), Some(DriverError::Launch(_))));
    }
}
