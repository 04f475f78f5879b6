//! Offline driver over saved pages.
//!
//! Each URL path maps to one HTML file: `/explore/tags/foo_bar/` is served
//! from `explore_tags_foo_bar.html`, the site root from `index.html`. A
//! missing file behaves like an unreachable page.

use super::{BrowserDriver, DriverError, DriverResult, ElementSnapshot};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

enum PageStore {
    Dir(PathBuf),
    Memory(HashMap<String, String>),
}

#[derive(Default)]
struct ReplayState {
    url: Option<String>,
    html: String,
    cookies: Option<serde_json::Value>,
    faults: HashMap<String, (u32, DriverError)>,
    redirects: HashMap<String, String>,
    visits: Vec<String>,
}

pub struct SnapshotDriver {
    pages: PageStore,
    state: Mutex<ReplayState>,
}

/// File stem for a URL: path segments joined by `_`, `index` for the root.
pub fn page_key(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let key = path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if key.is_empty() { "index".to_string() } else { key }
}

impl SnapshotDriver {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_store(PageStore::Dir(dir.into()))
    }

    /// Pages keyed by URL path, e.g. `("explore/tags/foo/", html)`.
    pub fn from_pages<K, V>(pages: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let pages = pages
            .into_iter()
            .map(|(path, html)| (page_key(&format!("https://replay.invalid/{}", path.as_ref().trim_start_matches('/'))), html.into()))
            .collect();
        Self::with_store(PageStore::Memory(pages))
    }

    fn with_store(pages: PageStore) -> Self {
        Self {
            pages,
            state: Mutex::new(ReplayState::default()),
        }
    }

    /// Fail the next `times` navigations to `path` with `error`.
    pub fn inject_fault(&self, path: &str, times: u32, error: DriverError) {
        let key = page_key(&format!("https://replay.invalid/{}", path.trim_start_matches('/')));
        self.lock().faults.insert(key, (times, error));
    }

    /// Navigating to `from` lands on `to`, the way a login wall intercepts
    /// pages for anonymous visitors.
    pub fn redirect(&self, from: &str, to: &str) {
        let key = page_key(&format!("https://replay.invalid/{}", from.trim_start_matches('/')));
        self.lock().redirects.insert(key, to.trim_start_matches('/').to_string());
    }

    /// Cookies the replayed browser holds, as if a user had logged in.
    pub fn seed_cookies(&self, cookies: serde_json::Value) {
        self.lock().cookies = Some(cookies);
    }

    /// Every URL navigated to so far, in order.
    pub fn visits(&self) -> Vec<String> {
        self.lock().visits.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self, key: &str) -> Option<String> {
        match &self.pages {
            PageStore::Dir(dir) => std::fs::read_to_string(dir.join(format!("{}.html", key))).ok(),
            PageStore::Memory(map) => map.get(key).cloned(),
        }
    }

    fn select(html: &str, selector: &str, attrs: &[&str]) -> DriverResult<Vec<ElementSnapshot>> {
        let sel = Selector::parse(selector)
            .map_err(|e| DriverError::Other(format!("bad selector {:?}: {:?}", selector, e)))?;
        let doc = Html::parse_document(html);

        Ok(doc
            .select(&sel)
            .map(|el| {
                let captured: BTreeMap<String, String> = attrs
                    .iter()
                    .filter_map(|name| el.value().attr(name).map(|v| (name.to_string(), v.to_string())))
                    .collect();
                ElementSnapshot {
                    text: el.text().collect::<String>().trim().to_string(),
                    attrs: captured,
                }
            })
            .collect())
    }
}

#[async_trait]
impl BrowserDriver for SnapshotDriver {
    async fn goto(&self, url: &str) -> DriverResult<()> {
        let key = page_key(url);
        let mut state = self.lock();
        state.visits.push(url.to_string());

        if let Some((remaining, error)) = state.faults.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }

        let landed = match state.redirects.get(&key) {
            Some(target) => Url::parse(url)
                .and_then(|u| u.join(&format!("/{}", target)))
                .map(|u| u.to_string())
                .map_err(|e| DriverError::Other(format!("bad redirect for {}: {}", url, e)))?,
            None => url.to_string(),
        };

        let html = self
            .load(&page_key(&landed))
            .ok_or_else(|| DriverError::Unreachable(format!("no snapshot for {}", landed)))?;
        state.url = Some(landed);
        state.html = html;
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.lock()
            .url
            .clone()
            .ok_or_else(|| DriverError::State("no page loaded".into()))
    }

    async fn page_source(&self) -> DriverResult<String> {
        Ok(self.lock().html.clone())
    }

    async fn query(&self, selector: &str, attrs: &[&str]) -> DriverResult<Vec<ElementSnapshot>> {
        let html = self.lock().html.clone();
        Self::select(&html, selector, attrs)
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> DriverResult<bool> {
        let html = self.lock().html.clone();
        Ok(!Self::select(&html, selector, &[])?.is_empty())
    }

    async fn export_state(&self) -> DriverResult<serde_json::Value> {
        Ok(self.lock().cookies.clone().unwrap_or_else(|| serde_json::json!([])))
    }

    async fn import_state(&self, state: &serde_json::Value) -> DriverResult<()> {
        if !state.is_array() {
            return Err(DriverError::State("cookie blob is not a cookie list".into()));
        }
        self.lock().cookies = Some(state.clone());
        Ok(())
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        Ok(())
    }
}
