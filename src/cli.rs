//! Command-line options for the spider.
//!
//! Defaults match an everyday incremental run; every option can also be set
//! through the environment.

use clap::Parser;

/// Crawl sspai.com's weekly app-recommendation roundups into a
/// date-partitioned Markdown archive.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Lookback window in 30-day units; required when not in update mode
    #[arg(short, long, env = "SPIDER_MONTHS", default_value_t = 0)]
    pub months: i64,

    /// Incremental mode: start the day after the latest local article
    #[arg(short, long, default_value_t = false)]
    pub update: bool,

    /// Root of the date-partitioned output tree
    #[arg(short, long, env = "SPIDER_OUTPUT_DIR", default_value = "data")]
    pub output_dir: String,

    /// Articles per feed page request
    #[arg(long, default_value_t = 20)]
    pub page_size: u32,

    /// Delay between feed page requests, in seconds
    #[arg(long, default_value_t = 1)]
    pub sleep_time: u64,

    /// Maximum articles processed concurrently
    #[arg(long, default_value_t = 8)]
    pub article_concurrency: usize,

    /// Maximum images downloaded concurrently, shared across all articles
    #[arg(long, default_value_t = 16)]
    pub image_concurrency: usize,

    /// Overall timeout of a single request, in seconds
    #[arg(long, default_value_t = 15)]
    pub request_timeout: u64,

    /// Total attempts per request before giving up
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Delay before the first retry, in seconds; doubles with each attempt
    #[arg(long, default_value_t = 0.5)]
    pub retry_base_delay: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["sspai_app_spider"]);
        assert_eq!(cli.months, 0);
        assert!(!cli.update);
        assert_eq!(cli.output_dir, "data");
        assert_eq!(cli.page_size, 20);
        assert_eq!(cli.sleep_time, 1);
        assert_eq!(cli.article_concurrency, 8);
        assert_eq!(cli.image_concurrency, 16);
        assert_eq!(cli.request_timeout, 15);
        assert_eq!(cli.max_retries, 3);
        assert_eq!(cli.retry_base_delay, 0.5);
    }

    #[test]
    fn test_negative_retry_delay_parses_and_needs_validation() {
        // Clap does not range-check floats; pre-flight validation in main
        // has to reject this before a Duration is built from it.
        let cli = Cli::parse_from(["sspai_app_spider", "--retry-base-delay=-1"]);
        assert_eq!(cli.retry_base_delay, -1.0);
        assert!(crate::window::validate_retry_base_delay(cli.retry_base_delay).is_err());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "sspai_app_spider",
            "-m",
            "3",
            "--update",
            "-o",
            "/tmp/picks",
            "--page-size",
            "50",
            "--retry-base-delay",
            "2",
        ]);
        assert_eq!(cli.months, 3);
        assert!(cli.update);
        assert_eq!(cli.output_dir, "/tmp/picks");
        assert_eq!(cli.page_size, 50);
        assert_eq!(cli.retry_base_delay, 2.0);
    }
}
