//! Batch orchestrator: session → per-username lookups → result file.
//!
//! ## Run shape
//!
//! 1. Launch the browser and establish the session (stored or manual login).
//!    Failures here abort the run before any verdict exists.
//! 2. For each username, strictly in input order: wait for the pacer, sample
//!    the hashtag, fold the samples into a verdict, record it. A failing
//!    username only ever affects its own verdict.
//! 3. Save the session if requested, close the browser, write the results.
//!
//! An interrupt stops the loop; verdicts produced so far are kept.

use crate::config::AppConfig;
use crate::driver::{self, BrowserDriver};
use crate::models::{LookupRequest, RecencyVerdict, ResultSet, VerdictStatus};
use crate::ratelimit::Pacer;
use crate::resolver::RecencyResolver;
use crate::sampler::{PostSampler, SamplerSettings};
use crate::session::{SessionManager, SessionSettings, SessionStore};
use crate::storage::ResultsWriter;
use anyhow::{Context, Result};
use chrono::Utc;
use std::future::Future;
use tracing::{info, warn};

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, base_hashtag: &str, usernames: &[String]) -> Result<RunSummary> {
        let driver = driver::launch(&self.config.browser)
            .await
            .context("Failed to start the browser")?;

        let interrupt = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        self.run_with_driver(driver, base_hashtag, usernames, interrupt).await
    }

    pub async fn run_with_driver(
        &self,
        driver: Box<dyn BrowserDriver>,
        base_hashtag: &str,
        usernames: &[String],
        interrupt: impl Future<Output = ()>,
    ) -> Result<RunSummary> {
        info!("Starting hashtag search");
        info!("   Base hashtag: {}", base_hashtag);
        info!("   Users to search: {}", usernames.len());
        info!("   Browser: {}", self.config.browser.engine);

        let sampling = SamplerSettings::from_config(&self.config).context("Invalid site.base_url")?;

        let mut session = SessionManager::new(
            driver,
            SessionStore::from_config(&self.config.session),
            SessionSettings::from_config(&self.config),
        );
        if let Err(e) = session.establish().await {
            session.shutdown().await;
            return Err(e).context("Could not establish a browser session");
        }
        if session.interactive_waits() > 0 && !self.config.session.persist {
            info!("Tip: pass --save-session to keep this login for the next run");
        }

        let mut writer = match ResultsWriter::create(&self.config.output.path, self.config.output.incremental) {
            Ok(writer) => writer,
            Err(e) => {
                session.shutdown().await;
                return Err(e);
            }
        };

        let mut pacer = Pacer::from_config(&self.config.search);
        let mut auth_failures = 0usize;
        let mut interrupted = false;
        tokio::pin!(interrupt);

        for (i, username) in usernames.iter().enumerate() {
            info!("[{}/{}] Processing user: {}", i + 1, usernames.len(), username);
            let request = LookupRequest::new(base_hashtag, username);

            let outcome = tokio::select! {
                biased;
                _ = &mut interrupt => None,
                outcome = lookup(&mut session, &sampling, &mut pacer, request) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                warn!("Interrupted by user, {} of {} usernames done", i, usernames.len());
                interrupted = true;
                break;
            };

            if outcome.auth_failure {
                auth_failures += 1;
            }
            writer.record(outcome.verdict);
        }

        if !interrupted {
            if let Err(e) = session.persist().await {
                warn!("{}", e);
            }
        }
        session.shutdown().await;

        let results = writer.finish()?;
        let summary = RunSummary::new(results, auth_failures, interrupted);
        summary.log();
        Ok(summary)
    }

    /// Opens the browser only to capture a fresh login into the session store.
    pub async fn capture_session(&self) -> Result<bool> {
        let driver = driver::launch(&self.config.browser)
            .await
            .context("Failed to start the browser")?;
        self.capture_with_driver(driver).await
    }

    async fn capture_with_driver(&self, driver: Box<dyn BrowserDriver>) -> Result<bool> {
        let mut settings = SessionSettings::from_config(&self.config);
        settings.persist = true;

        let mut session = SessionManager::new(driver, SessionStore::from_config(&self.config.session), settings);
        let outcome = match session.establish().await {
            Ok(()) => session.persist().await.context("Could not save the session"),
            Err(e) => Err(e).context("Could not establish a browser session"),
        };
        session.shutdown().await;
        outcome
    }
}

struct LookupOutcome {
    verdict: RecencyVerdict,
    auth_failure: bool,
}

async fn lookup(
    session: &mut SessionManager,
    sampling: &SamplerSettings,
    pacer: &mut Pacer,
    request: LookupRequest,
) -> LookupOutcome {
    pacer.wait_turn().await;

    let lease = session.lease();
    let (verdict, auth_failure) = match PostSampler::open(lease.driver(), &request, sampling, Utc::now()).await {
        Ok(sampler) => {
            let mut resolver = RecencyResolver::new(request);
            resolver.drain(sampler).await;
            let auth_failure = resolver.hit_login_wall();
            (resolver.finish(), auth_failure)
        }
        Err(e) => {
            warn!("  ❌ #{}: {}", request.hashtag, e);
            let auth_failure = e.is_authentication();
            return LookupOutcome {
                verdict: RecencyResolver::failed(request, &e),
                auth_failure,
            };
        }
    };

    match (&verdict.most_recent_instant, verdict.status) {
        (Some(instant), _) => info!(
            "  ✅ Most recent post: {} ({} of {} posts dated)",
            instant.format("%Y-%m-%d %H:%M:%S"),
            verdict.dates_found,
            verdict.posts_seen
        ),
        (None, status) => info!("  {} {}", status.icon(), status.as_str()),
    }

    LookupOutcome { verdict, auth_failure }
}

// ── Summary ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RunSummary {
    pub results: ResultSet,
    pub success: usize,
    pub partial: usize,
    pub no_posts: usize,
    pub errors: usize,
    pub auth_failures: usize,
    pub interrupted: bool,
}

impl RunSummary {
    fn new(results: ResultSet, auth_failures: usize, interrupted: bool) -> Self {
        Self {
            success: results.count(VerdictStatus::Success),
            partial: results.count(VerdictStatus::Partial),
            no_posts: results.count(VerdictStatus::NoPosts),
            errors: results.count(VerdictStatus::Error),
            results,
            auth_failures,
            interrupted,
        }
    }

    pub fn log(&self) {
        info!("─────────────────────────────────");
        info!("  SUMMARY");
        info!("─────────────────────────────────");
        for v in self.results.iter() {
            info!("{} {}", v.status.icon(), v.username);
            info!("   Hashtag: {}", v.display_hashtag());
            info!("   Posts: {} ({} dated)", v.posts_seen, v.dates_found);
            info!(
                "   Most Recent: {}",
                v.most_recent_instant
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "—".into())
            );
            match &v.error_detail {
                Some(detail) => info!("   Status: {} ({})", v.status.as_str(), detail),
                None => info!("   Status: {}", v.status.as_str()),
            }
        }
        info!(
            "Done: {} success | {} partial | {} no_posts | {} error",
            self.success, self.partial, self.no_posts, self.errors
        );
        if self.auth_failures > 0 {
            warn!(
                "{} lookups hit the login wall. The session is probably invalid; log in again with `tagscout login`",
                self.auth_failures
            );
        }
    }
}
