//! Spacing between hashtag lookups and bounded retries for transient
//! driver failures.

use crate::config::SearchConfig;
use crate::driver::{DriverError, DriverResult};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

// ── Pacer ─────────────────────────────────────────────────────────────────────

/// Enforces a minimum interval between the *starts* of consecutive lookups.
#[derive(Debug)]
pub struct Pacer {
    min_interval: Duration,
    jitter_ms: u64,
    last_start: Option<Instant>,
}

impl Pacer {
    pub fn new(min_interval: Duration, jitter_ms: u64) -> Self {
        Self {
            min_interval,
            jitter_ms,
            last_start: None,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.min_interval(), config.jitter_ms)
    }

    /// Sleeps until the next lookup may start, then marks it started.
    /// Returns how long it slept.
    pub async fn wait_turn(&mut self) -> Duration {
        let now = Instant::now();
        let waited = match self.last_start {
            Some(last) => {
                let ready_at = last + self.min_interval + self.jitter();
                if ready_at > now {
                    debug!("Pacing: next lookup in {:?}", ready_at - now);
                    sleep_until(ready_at).await;
                }
                ready_at.saturating_duration_since(now)
            }
            None => Duration::ZERO,
        };
        self.last_start = Some(Instant::now());
        waited
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=self.jitter_ms))
    }
}

// ── Retry ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.retry_delay_ms))
    }

    /// Runs `op` until it succeeds, fails non-transiently, or the attempt
    /// ceiling is reached. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let attempt = AtomicU32::new(0);
        let max = self.max_attempts;
        let strategy = FixedInterval::from_millis(self.delay.as_millis() as u64)
            .take(max.saturating_sub(1) as usize);

        RetryIf::spawn(
            strategy,
            || {
                let n = attempt.fetch_add(1, Ordering::Relaxed) + 1;
                let fut = op();
                async move {
                    let result = fut.await;
                    if let Err(e) = &result {
                        if e.is_transient() && n < max {
                            warn!("{} failed (attempt {}/{}): {}", what, n, max, e);
                        }
                    }
                    result
                }
            },
            |e: &DriverError| e.is_transient(),
        )
        .await
    }
}
