//! # sspai app spider
//!
//! Crawls sspai.com's paginated article feed for the weekly "派评" app
//! roundups inside a bounded publication-date window, extracts every app
//! recommendation from the matching articles, downloads their images, and
//! archives each recommendation as a Markdown file with YAML front matter
//! in a date-partitioned tree.
//!
//! ## Usage
//!
//! ```sh
//! # first run: crawl the last three months
//! sspai_app_spider -m 3 -o ./data
//!
//! # later runs: pick up where the archive left off
//! sspai_app_spider --update -o ./data
//! ```
//!
//! ## Architecture
//!
//! 1. **Pre-flight**: validate options, compute the crawl window from the
//!    newest date directory already on disk
//! 2. **Scan**: walk the feed in increasing offsets until a page is empty
//!    or an article falls outside the window
//! 3. **Process**: one bounded task per matched article fetches the detail,
//!    parses the app sections, and fans out image downloads through a
//!    shared image pool
//! 4. **Aggregate**: counters from every task are folded into one summary,
//!    emitted even when everything failed

use chrono::Local;
use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod crawl;
mod fetcher;
mod models;
mod parser;
mod saver;
mod utils;
mod window;

use cli::Cli;
use crawl::CrawlConfig;
use fetcher::Fetcher;
use saver::AppSaver;
use utils::date_format;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(?args, "parsed CLI arguments");

    // --- Pre-flight: nothing below may touch network or disk first ---
    if args.page_size == 0 {
        error!(
            error = %window::ConfigError::InvalidPageSize(args.page_size),
            "invalid run configuration"
        );
        return Ok(());
    }
    if let Err(e) = window::validate_retry_base_delay(args.retry_base_delay) {
        error!(error = %e, "invalid run configuration");
        return Ok(());
    }

    let latest_local = window::latest_local_date(Path::new(&args.output_dir));
    let win = match window::calculate_time_window(args.months, args.update, latest_local, Local::now())
    {
        Ok(win) => win,
        Err(e) => {
            error!(error = %e, "invalid run configuration");
            return Ok(());
        }
    };
    info!(
        start = %date_format(win.start),
        end = %date_format(win.end),
        "computed crawl window"
    );

    tokio::fs::create_dir_all(&args.output_dir).await?;

    let fetcher = Arc::new(Fetcher::new(
        Duration::from_secs(args.request_timeout),
        args.max_retries,
        Duration::from_secs_f64(args.retry_base_delay),
    )?);
    let saver = Arc::new(AppSaver::new(&args.output_dir));
    let config = CrawlConfig {
        page_size: args.page_size,
        sleep_time: args.sleep_time,
        article_concurrency: args.article_concurrency,
        image_concurrency: args.image_concurrency,
    };

    info!("starting sspai spider");
    let stats = crawl::run(&config, win, fetcher, saver).await;

    let elapsed = start_time.elapsed();
    info!(
        articles_scanned = stats.articles_scanned,
        articles_matched = stats.articles_matched,
        articles_succeeded = stats.articles_succeeded,
        articles_failed = stats.articles_failed,
        images_succeeded = stats.images_succeeded,
        images_failed = stats.images_failed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "run complete"
    );

    Ok(())
}
