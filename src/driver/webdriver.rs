use super::{BrowserDriver, DriverError, DriverResult, ElementSnapshot};
use crate::config::{BrowserConfig, Engine};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::Cookie;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A real browser behind a WebDriver server (chromedriver, geckodriver,
/// safaridriver).
pub struct WebDriverBrowser {
    driver: WebDriver,
    page_load_timeout: Duration,
    settle: Duration,
}

impl WebDriverBrowser {
    pub async fn launch(config: &BrowserConfig) -> DriverResult<Self> {
        let server = config.webdriver_url();
        info!("Launching {} via {}", config.engine, server);

        let window = format!("--window-size={},{}", config.window_width, config.window_height);
        let driver = match config.engine {
            Engine::Chromium => {
                let mut caps = DesiredCapabilities::chrome();
                if config.headless {
                    caps.set_headless().map_err(launch_error)?;
                }
                caps.add_arg(&window).map_err(launch_error)?;
                WebDriver::new(&server, caps).await
            }
            Engine::Firefox => {
                let mut caps = DesiredCapabilities::firefox();
                if config.headless {
                    caps.set_headless().map_err(launch_error)?;
                }
                WebDriver::new(&server, caps).await
            }
            Engine::Webkit => {
                if config.headless {
                    warn!("Safari has no headless mode, opening a visible window");
                }
                WebDriver::new(&server, DesiredCapabilities::safari()).await
            }
        }
        .map_err(launch_error)?;

        if config.engine != Engine::Chromium {
            driver
                .set_window_rect(0, 0, config.window_width, config.window_height)
                .await
                .map_err(classify)?;
        }

        Ok(Self {
            driver,
            page_load_timeout: config.page_load_timeout(),
            settle: Duration::from_millis(config.settle_ms),
        })
    }
}

fn launch_error(e: WebDriverError) -> DriverError {
    DriverError::Launch(e.to_string())
}

/// Maps WebDriver failures onto the capability taxonomy. Matching on the
/// W3C error text keeps this stable across thirtyfour's error enum changes.
fn classify(e: WebDriverError) -> DriverError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("stale element") || lower.contains("no such element") {
        DriverError::Element(msg)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        DriverError::Timeout(msg)
    } else if lower.contains("invalid session id")
        || lower.contains("no such window")
        || lower.contains("session not created")
    {
        DriverError::SessionLost(msg)
    } else if lower.contains("unknown error: net::") || lower.contains("dns") {
        DriverError::Unreachable(msg)
    } else {
        DriverError::Other(msg)
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn goto(&self, url: &str) -> DriverResult<()> {
        debug!("GET {}", url);
        timeout(self.page_load_timeout, self.driver.goto(url))
            .await
            .map_err(|_| DriverError::Timeout(format!("loading {} took over {:?}", url, self.page_load_timeout)))?
            .map_err(classify)?;
        sleep(self.settle).await;
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.driver.current_url().await.map_err(classify)?.to_string())
    }

    async fn page_source(&self) -> DriverResult<String> {
        self.driver.source().await.map_err(classify)
    }

    async fn query(&self, selector: &str, attrs: &[&str]) -> DriverResult<Vec<ElementSnapshot>> {
        let elements = self.driver.find_all(By::Css(selector)).await.map_err(classify)?;

        let mut out = Vec::with_capacity(elements.len());
        for el in elements {
            let text = el.text().await.map_err(classify)?;
            let mut captured = BTreeMap::new();
            for name in attrs {
                if let Some(value) = el.attr(*name).await.map_err(classify)? {
                    captured.insert(name.to_string(), value);
                }
            }
            out.push(ElementSnapshot { text, attrs: captured });
        }
        Ok(out)
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> DriverResult<bool> {
        self.driver
            .query(By::Css(selector))
            .wait(timeout, POLL_INTERVAL)
            .exists()
            .await
            .map_err(classify)
    }

    async fn export_state(&self) -> DriverResult<serde_json::Value> {
        let cookies = self.driver.get_all_cookies().await.map_err(classify)?;
        serde_json::to_value(&cookies).map_err(|e| DriverError::State(e.to_string()))
    }

    async fn import_state(&self, state: &serde_json::Value) -> DriverResult<()> {
        let cookies: Vec<Cookie> = serde_json::from_value(state.clone())
            .map_err(|e| DriverError::State(format!("cookie blob is not a cookie list: {}", e)))?;

        let total = cookies.len();
        let mut rejected = 0usize;
        for cookie in cookies {
            if let Err(e) = self.driver.add_cookie(cookie).await {
                debug!("Cookie rejected by browser: {}", e);
                rejected += 1;
            }
        }
        if rejected > 0 {
            warn!("{} of {} stored cookies were rejected", rejected, total);
        }

        self.driver.refresh().await.map_err(classify)?;
        sleep(self.settle).await;
        Ok(())
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        self.driver.quit().await.map_err(classify)
    }
}
