mod config;
mod driver;
mod loader;
mod models;
mod pipeline;
mod ratelimit;
mod resolver;
mod sampler;
mod session;
mod storage;
mod utils;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{AppConfig, Engine};
use crate::loader::collect_usernames;
use crate::pipeline::Pipeline;
use crate::session::SessionStore;

#[derive(Parser)]
#[command(
    name = "tagscout",
    about = "Find the most recent post under per-user hashtags (<base>_<username>)",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Look up #<hashtag>_<username> for every username
    Search {
        /// Base hashtag, with or without a leading '#'
        #[arg(short = 't', long)]
        hashtag: String,

        /// Usernames to search
        #[arg(short, long, num_args = 1..)]
        users: Vec<String>,

        /// File with one username per line
        #[arg(short = 'f', long)]
        users_file: Option<PathBuf>,

        #[arg(short, long, value_enum)]
        browser: Option<Engine>,

        #[arg(long)]
        headless: bool,

        /// Results file (default: hashtag_results.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds between hashtag lookups
        #[arg(long)]
        wait: Option<u64>,

        /// Seconds to allow for a manual login
        #[arg(long)]
        login_wait: Option<u64>,

        /// Posts to sample per hashtag
        #[arg(long)]
        max_posts: Option<usize>,

        /// Reuse and save the browser session between runs
        #[arg(long)]
        save_session: bool,

        /// Serve saved HTML pages from this directory instead of a browser
        #[arg(long, env = "TAGSCOUT_REPLAY_DIR")]
        replay_dir: Option<PathBuf>,
    },

    /// Log in by hand once and save the session for later runs
    Login {
        #[arg(short, long, value_enum)]
        browser: Option<Engine>,

        #[arg(long)]
        login_wait: Option<u64>,
    },

    /// Inspect or delete the saved session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    Status,
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "tagscout=info,warn",
        1 => "tagscout=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Search {
            hashtag,
            users,
            users_file,
            browser,
            headless,
            output,
            wait,
            login_wait,
            max_posts,
            save_session,
            replay_dir,
        } => {
            if let Some(engine) = browser {
                config.browser.engine = engine;
            }
            config.browser.headless |= headless;
            config.browser.replay_dir = replay_dir.or(config.browser.replay_dir);
            if let Some(path) = output {
                config.output.path = path;
            }
            if let Some(secs) = wait {
                config.search.wait_secs = secs;
            }
            if let Some(secs) = login_wait {
                config.session.login_wait_secs = secs;
            }
            if let Some(n) = max_posts {
                config.search.max_posts = n;
            }
            config.session.persist |= save_session;

            let usernames = collect_usernames(&users, users_file.as_deref())?;
            if usernames.is_empty() {
                bail!("No usernames given; use --users or --users-file");
            }
            let base = hashtag.trim().trim_start_matches('#');
            if base.is_empty() {
                bail!("--hashtag must not be empty");
            }

            let _t = utils::Timer::start("Hashtag search");
            let summary = Pipeline::new(config).run(base, &usernames).await?;
            if summary.interrupted {
                warn!("Run was interrupted; results cover {} of {} usernames", summary.results.len(), usernames.len());
            }
        }

        Command::Login { browser, login_wait } => {
            if let Some(engine) = browser {
                config.browser.engine = engine;
            }
            if let Some(secs) = login_wait {
                config.session.login_wait_secs = secs;
            }
            // A login needs a visible window.
            config.browser.headless = false;

            let path = config.session.state_path();
            if Pipeline::new(config).capture_session().await? {
                println!("Session saved to {:?}", path);
            } else {
                println!("No login detected, nothing saved.");
            }
        }

        Command::Session { action } => {
            let store = SessionStore::from_config(&config.session);
            match action {
                SessionAction::Status => match store.load()? {
                    Some(state) => {
                        println!("─────────────────────────────────");
                        println!("  Saved session");
                        println!("─────────────────────────────────");
                        println!("  Path     : {:?}", store.path());
                        println!("  Captured : {}", state.captured_at.format("%Y-%m-%d %H:%M:%S UTC"));
                        println!("─────────────────────────────────");
                    }
                    None => println!("No saved session at {:?}", store.path()),
                },
                SessionAction::Clear => {
                    let removed = store
                        .clear()
                        .with_context(|| format!("Failed to remove {:?}", store.path()))?;
                    if removed {
                        println!("Removed {:?}", store.path());
                    } else {
                        println!("No saved session at {:?}", store.path());
                    }
                }
            }
        }
    }

    Ok(())
}
