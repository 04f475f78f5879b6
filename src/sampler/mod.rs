pub mod selectors;
pub mod timestamp;

use crate::config::AppConfig;
use crate::driver::{BrowserDriver, DriverError};
use crate::models::{LookupRequest, PostSample};
use crate::ratelimit::RetryPolicy;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use self::selectors::{
    is_login_redirect, shows_no_posts, DATE_TEXT_SELECTOR, POST_LINK_SELECTORS, TIME_SELECTORS,
};
use self::timestamp::{extract, looks_like_date, RawTimestamp};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failures that stop a hashtag before any post is visited.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("redirected to the login wall ({0}); session is not authenticated")]
    Authentication(String),

    #[error("could not open hashtag listing: {0}")]
    Navigation(#[from] DriverError),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl LookupError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, LookupError::Authentication(_))
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub base_url: Url,
    pub max_posts: usize,
    pub element_wait: Duration,
    pub retry: RetryPolicy,
}

impl SamplerSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: Url::parse(&config.site.base_url)?,
            max_posts: config.search.max_posts,
            element_wait: config.search.element_wait(),
            retry: RetryPolicy::from_config(&config.search),
        })
    }

    pub fn listing_url(&self, hashtag: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(&format!("explore/tags/{}/", hashtag))
    }
}

// ── Sampler ───────────────────────────────────────────────────────────────────

/// Lazily visits up to `max_posts` posts of one hashtag, in listing order.
///
/// Listing order is not chronological, so every collected post is visited;
/// the caller reduces the samples. Once drained the sampler is spent: a
/// fresh [`PostSampler::open`] re-navigates from scratch.
pub struct PostSampler<'d> {
    driver: &'d dyn BrowserDriver,
    retry: RetryPolicy,
    pending: std::vec::IntoIter<Url>,
    total: usize,
    now: DateTime<Utc>,
}

impl<'d> PostSampler<'d> {
    /// Opens the listing and collects post links. `now` anchors relative
    /// timestamps such as "3h".
    pub async fn open(
        driver: &'d dyn BrowserDriver,
        request: &LookupRequest,
        settings: &SamplerSettings,
        now: DateTime<Utc>,
    ) -> Result<PostSampler<'d>, LookupError> {
        let url = settings.listing_url(&request.hashtag)?;
        info!("Searching for #{} ({})", request.hashtag, url);

        settings
            .retry
            .run(&format!("listing #{}", request.hashtag), || driver.goto(url.as_str()))
            .await?;

        let landed = driver.current_url().await?;
        if is_login_redirect(&landed) {
            return Err(LookupError::Authentication(landed));
        }

        let links = collect_post_links(driver, settings).await?;
        if links.is_empty() {
            info!("No posts found for #{}", request.hashtag);
        } else {
            info!("#{}: sampling {} posts", request.hashtag, links.len());
        }

        Ok(Self {
            driver,
            retry: settings.retry,
            total: links.len(),
            pending: links.into_iter(),
            now,
        })
    }

    /// Number of posts this sampler will yield in total.
    pub fn len(&self) -> usize {
        self.total
    }

    /// Visits the next post. `None` once every collected post was visited,
    /// or right after a post bounced to the login page.
    pub async fn next_sample(&mut self) -> Option<PostSample> {
        let post = self.pending.next()?;
        let sample = self.visit(post).await;
        if sample.login_wall {
            self.pending = Vec::new().into_iter();
        }
        Some(sample)
    }

    async fn visit(&self, post: Url) -> PostSample {
        let handle = post.to_string();
        let driver = self.driver;

        if let Err(e) = self.retry.run(&format!("post {}", handle), || driver.goto(post.as_str())).await {
            warn!("  Post {} never loaded: {}", handle, e);
            return PostSample::load_failure(handle, format!("detail view failed to load: {}", e));
        }

        if let Ok(landed) = driver.current_url().await {
            if is_login_redirect(&landed) {
                warn!("  Post {} redirected to the login page", handle);
                return PostSample::login_redirect(handle, &landed);
            }
        }

        let raw = match self
            .retry
            .run(&format!("time element on {}", handle), || read_timestamp(driver, self.now))
            .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!("  Could not find a date on {}", handle);
                return PostSample::unparsed(handle, None, "no time element or date-like text");
            }
            Err(e) => {
                warn!("  Could not read date on {}: {}", handle, e);
                return PostSample::unparsed(handle, None, format!("time element unreadable: {}", e));
            }
        };

        let shown = raw.shown().map(str::to_string);
        match extract(&raw, self.now) {
            Ok(instant) => {
                debug!("  {} → {} ({:?})", handle, instant, shown);
                PostSample::parsed(handle, shown.unwrap_or_else(|| instant.to_rfc3339()), instant)
            }
            Err(e) => {
                warn!("  {}: {}", handle, e);
                PostSample::unparsed(handle, shown, e.to_string())
            }
        }
    }
}

/// Distinct post URLs, in the order the listing shows them, capped at
/// `max_posts`. An empty or missing grid yields nothing.
async fn collect_post_links(
    driver: &dyn BrowserDriver,
    settings: &SamplerSettings,
) -> Result<Vec<Url>, DriverError> {
    if settings.max_posts == 0 {
        return Ok(Vec::new());
    }

    let html = driver.page_source().await?;
    if shows_no_posts(&html) {
        return Ok(Vec::new());
    }

    for selector in POST_LINK_SELECTORS {
        if !driver.wait_for(selector, settings.element_wait).await? {
            continue;
        }

        let anchors = settings
            .retry
            .run("post grid", || driver.query(selector, &["href"]))
            .await?;

        let mut seen = HashSet::new();
        let links: Vec<Url> = anchors
            .iter()
            .filter_map(|a| a.attr("href"))
            .filter_map(|href| settings.base_url.join(href).ok())
            .map(|mut u| {
                u.set_query(None);
                u.set_fragment(None);
                u
            })
            .filter(|u| seen.insert(u.path().to_string()))
            .take(settings.max_posts)
            .collect();

        if !links.is_empty() {
            debug!("Found posts using selector: {}", selector);
            return Ok(links);
        }
    }

    warn!("Listing loaded but no post links matched any selector");
    Ok(Vec::new())
}

/// The current post's time: `<time>` elements first, then any short text
/// in the article that reads as a date.
async fn read_timestamp(
    driver: &dyn BrowserDriver,
    now: DateTime<Utc>,
) -> Result<Option<RawTimestamp>, DriverError> {
    for selector in TIME_SELECTORS {
        let elements = driver.query(selector, &["datetime"]).await?;

        if let Some(el) = elements.iter().find(|el| el.attr("datetime").is_some()) {
            return Ok(Some(RawTimestamp {
                machine: el.attr("datetime").map(str::to_string),
                display: Some(el.text.clone()).filter(|t| !t.is_empty()),
            }));
        }
        if let Some(el) = elements.iter().find(|el| !el.text.is_empty()) {
            return Ok(Some(RawTimestamp::from_text(el.text.clone())));
        }
    }

    let candidates = driver.query(DATE_TEXT_SELECTOR, &[]).await?;
    Ok(candidates
        .into_iter()
        .find(|el| looks_like_date(&el.text, now))
        .map(|el| RawTimestamp::from_text(el.text)))
}
