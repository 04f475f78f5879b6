//! Owns the one authenticated browsing context of a run.
//!
//! ```text
//! Uninitialized → LoadingPersisted → Valid ──────────┐
//!                                  → AbsentOrInvalid → (login grace period)
//!                                                    → Authenticated → Persisted
//! ```

use crate::config::{AppConfig, SessionConfig};
use crate::driver::{BrowserDriver, DriverError};
use crate::models::SessionState;
use crate::sampler::selectors::shows_login_wall;
use crate::storage::write_json_atomic;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file {path:?} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session file {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("browser rejected the stored session: {0}")]
    Import(DriverError),

    #[error("could not open {url}: {source}")]
    Home { url: String, source: DriverError },

    #[error("could not save session: {0}")]
    Save(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    LoadingPersisted,
    Valid,
    AbsentOrInvalid,
    Authenticated,
    Persisted,
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// The persisted session blob on disk.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.state_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when there is no file or the stored blob is empty.
    pub fn load(&self) -> Result<Option<SessionState>, SessionError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SessionError::Unreadable { path: self.path.clone(), source });
            }
        };

        let state: SessionState = serde_json::from_str(&raw)
            .map_err(|source| SessionError::Corrupt { path: self.path.clone(), source })?;

        if !state.is_usable() {
            warn!("Stored session at {:?} is empty, ignoring it", self.path);
            return Ok(None);
        }
        Ok(Some(state))
    }

    pub fn save(&self, state: &SessionState) -> Result<(), SessionError> {
        write_json_atomic(&self.path, state).map_err(|e| SessionError::Save(format!("{:#}", e)))
    }

    /// Returns whether a file was removed.
    pub fn clear(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub home_url: String,
    pub persist: bool,
    pub headless: bool,
    pub login_wait: Duration,
    pub login_poll: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            home_url: config.site.base_url.clone(),
            persist: config.session.persist,
            headless: config.browser.headless,
            login_wait: Duration::from_secs(config.session.login_wait_secs),
            login_poll: Duration::from_secs(config.session.login_poll_secs.max(1)),
        }
    }
}

pub struct SessionManager {
    driver: Box<dyn BrowserDriver>,
    store: SessionStore,
    settings: SessionSettings,
    phase: SessionPhase,
    interactive_waits: u32,
}

/// Exclusive loan of the browsing context for one lookup. While a lease is
/// alive nothing else can reach the driver.
pub struct SessionLease<'s> {
    driver: &'s dyn BrowserDriver,
}

impl<'s> SessionLease<'s> {
    pub fn driver(&self) -> &'s dyn BrowserDriver {
        self.driver
    }
}

impl SessionManager {
    pub fn new(driver: Box<dyn BrowserDriver>, store: SessionStore, settings: SessionSettings) -> Self {
        Self {
            driver,
            store,
            settings,
            phase: SessionPhase::Uninitialized,
            interactive_waits: 0,
        }
    }

    /// Reuses the stored session when persistence is on and one exists,
    /// otherwise gives the operator the grace period to log in by hand.
    /// Only setup failures are errors; an unconfirmed login is not.
    pub async fn establish(&mut self) -> Result<(), SessionError> {
        let stored = if self.settings.persist {
            self.transition(SessionPhase::LoadingPersisted);
            self.store.load()?
        } else {
            None
        };

        self.open_home().await?;

        match stored {
            Some(state) => {
                self.transition(SessionPhase::Valid);
                info!(
                    "Reusing session captured {} from {:?}",
                    state.captured_at.format("%Y-%m-%d %H:%M"),
                    self.store.path()
                );
                self.driver.import_state(&state.cookies).await.map_err(SessionError::Import)?;
                if self.on_login_wall().await {
                    warn!(
                        "Stored session looks logged out; lookups may fail. Run `tagscout session clear` to start over"
                    );
                }
            }
            None => {
                self.transition(SessionPhase::AbsentOrInvalid);
                self.await_manual_login().await;
            }
        }

        self.transition(SessionPhase::Authenticated);
        Ok(())
    }

    async fn open_home(&self) -> Result<(), SessionError> {
        info!("Loading {}", self.settings.home_url);
        self.driver
            .goto(&self.settings.home_url)
            .await
            .map_err(|source| SessionError::Home { url: self.settings.home_url.clone(), source })
    }

    async fn on_login_wall(&self) -> bool {
        let url = self.driver.current_url().await.unwrap_or_default();
        match self.driver.page_source().await {
            Ok(html) => shows_login_wall(&url, &html),
            Err(e) => {
                debug!("Could not read home page: {}", e);
                false
            }
        }
    }

    async fn await_manual_login(&mut self) {
        if !self.on_login_wall().await {
            info!("Already logged in");
            return;
        }
        if self.settings.login_wait.is_zero() {
            warn!("Not logged in. Some results may be limited");
            return;
        }
        if self.settings.headless {
            warn!("Not logged in and the browser is headless, so there is no window to log in with");
            return;
        }

        self.interactive_waits += 1;
        let total = self.settings.login_wait;
        info!("NOT LOGGED IN: please log in in the browser window");
        info!("You have {} seconds to complete login (adjust with --login-wait)", total.as_secs());

        let mut remaining = total;
        while !remaining.is_zero() {
            info!("  {} seconds remaining...", remaining.as_secs());
            let step = remaining.min(self.settings.login_poll);
            sleep(step).await;
            remaining -= step;

            if !self.on_login_wall().await {
                info!("Successfully logged in");
                return;
            }
        }
        warn!("Still not logged in after {:?}; continuing, results may be limited", total);
    }

    /// Writes the context's credentials over any stored session. A no-op
    /// unless persistence was requested.
    pub async fn persist(&mut self) -> Result<bool, SessionError> {
        if !self.settings.persist {
            return Ok(false);
        }

        let cookies = self.driver.export_state().await.map_err(|e| SessionError::Save(e.to_string()))?;
        let state = SessionState { cookies, captured_at: Utc::now() };
        if !state.is_usable() {
            warn!("Browser holds no session cookies, nothing to save");
            return Ok(false);
        }

        self.store.save(&state)?;
        self.transition(SessionPhase::Persisted);
        info!("Session saved to {:?}", self.store.path());
        Ok(true)
    }

    pub fn lease(&mut self) -> SessionLease<'_> {
        SessionLease { driver: self.driver.as_ref() }
    }

    #[cfg(test)]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// How many times the run blocked for a manual login.
    pub fn interactive_waits(&self) -> u32 {
        self.interactive_waits
    }

    pub async fn shutdown(self) {
        if let Err(e) = self.driver.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
    }

    fn transition(&mut self, next: SessionPhase) {
        debug!("Session: {:?} → {:?}", self.phase, next);
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SnapshotDriver;

    const WALL: &str = "<html><body><button>Log in</button><a>Sign up</a></body></html>";
    const HOME: &str = "<html><body><nav>Home</nav></body></html>";

    fn settings(persist: bool) -> SessionSettings {
        SessionSettings {
            home_url: "https://www.instagram.com/".into(),
            persist,
            headless: false,
            login_wait: Duration::from_secs(30),
            login_poll: Duration::from_secs(5),
        }
    }

    fn cookies() -> serde_json::Value {
        serde_json::json!([{"name": "sessionid", "value": "abc", "domain": ".instagram.com"}])
    }

    #[test]
    fn test_store_distinguishes_missing_empty_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());

        std::fs::write(store.path(), r#"{"cookies": [], "captured_at": "2025-01-01T00:00:00Z"}"#).unwrap();
        assert!(store.load().unwrap().is_none());

        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(SessionError::Corrupt { .. })));

        assert!(store.clear().unwrap());
        assert!(!store.clear().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_then_reuse_skips_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session/state.json"));

        // First run: no stored session, the operator logs in during the grace period.
        let first = SnapshotDriver::from_pages([("", WALL)]);
        first.seed_cookies(cookies());
        let mut manager = SessionManager::new(Box::new(first), store.clone(), settings(true));
        manager.establish().await.unwrap();
        assert_eq!(manager.interactive_waits(), 1);
        assert!(manager.persist().await.unwrap());
        assert_eq!(manager.phase(), SessionPhase::Persisted);
        manager.shutdown().await;
        assert!(store.path().exists());

        // Second run: the stored session is imported, no waiting.
        let second = SnapshotDriver::from_pages([("", HOME)]);
        let mut manager = SessionManager::new(Box::new(second), store.clone(), settings(true));
        manager.establish().await.unwrap();
        assert_eq!(manager.interactive_waits(), 0);
        assert_eq!(manager.phase(), SessionPhase::Authenticated);
        assert_eq!(manager.lease().driver().export_state().await.unwrap(), cookies());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_expiry_does_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("state.json"));
        let start = tokio::time::Instant::now();

        let mut manager = SessionManager::new(
            Box::new(SnapshotDriver::from_pages([("", WALL)])),
            store.clone(),
            settings(true),
        );
        tokio_test::assert_ok!(manager.establish().await);
        assert!(tokio::time::Instant::now() - start >= Duration::from_secs(30));

        // Nothing to save from a browser that never logged in.
        assert!(!manager.persist().await.unwrap());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_headless_or_already_logged_in_never_waits() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("state.json"));

        let mut headless = settings(false);
        headless.headless = true;
        let mut manager = SessionManager::new(Box::new(SnapshotDriver::from_pages([("", WALL)])), store.clone(), headless);
        manager.establish().await.unwrap();
        assert_eq!(manager.interactive_waits(), 0);

        let mut manager = SessionManager::new(Box::new(SnapshotDriver::from_pages([("", HOME)])), store, settings(false));
        manager.establish().await.unwrap();
        assert_eq!(manager.interactive_waits(), 0);
        assert!(!manager.persist().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_session_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("state.json"));
        std::fs::write(store.path(), "\u{0}\u{0}garbage").unwrap();

        let mut manager = SessionManager::new(Box::new(SnapshotDriver::from_pages([("", HOME)])), store, settings(true));
        assert!(matches!(manager.establish().await, Err(SessionError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_home_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("state.json"));
        let mut manager = SessionManager::new(Box::new(SnapshotDriver::from_pages([("p/X/", HOME)])), store, settings(false));
        assert!(matches!(manager.establish().await, Err(SessionError::Home { .. })));
    }
}
