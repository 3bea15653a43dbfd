//! Data models shared across the spider.
//!
//! - [`FeedArticle`]: one entry of a paginated feed page
//! - [`ArticleMeta`]: the source-article reference carried by every pick
//! - [`AppData`]: one extracted app recommendation, ready to persist
//! - [`AppFrontmatter`]: the YAML front-matter block of a saved file
//! - [`TimeWindow`]: the inclusive publication-date range of one run
//! - [`RunStats`]: the end-of-run counters

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One article summary from the feed endpoint.
///
/// Only the fields the scanner needs are kept; the feed returns many more,
/// which serde ignores.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedArticle {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    /// Publication time as a unix timestamp in seconds.
    #[serde(default)]
    pub released_time: i64,
}

/// The source article a recommendation was extracted from.
#[derive(Debug, Clone)]
pub struct ArticleMeta {
    pub title: String,
    pub url: String,
    pub id: u64,
    /// `YYYY-MM-DD HH:MM:SS` publication time.
    pub release_time: String,
    /// `YYYY-MM-DD` date-partition directory name.
    pub released_date: String,
}

/// One app recommendation extracted from an article body.
///
/// `content` is the full Markdown file text (front matter included);
/// `image_urls` are downloaded separately into the date partition's
/// `images/` subdirectory.
#[derive(Debug, Clone)]
pub struct AppData {
    pub article: ArticleMeta,
    pub file_title: String,
    pub platforms: Vec<String>,
    pub content: String,
    pub image_urls: Vec<String>,
}

/// YAML front matter written at the top of every saved recommendation.
#[derive(Debug, Serialize)]
pub struct AppFrontmatter {
    pub title: String,
    pub app_name: String,
    pub platforms: Vec<String>,
    pub keywords: Vec<String>,
    pub article_title: String,
    pub article_id: u64,
    pub article_url: String,
    pub released_time: String,
}

impl AppFrontmatter {
    /// Render the `---` delimited front-matter block.
    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        let yaml = serde_yaml::to_string(self)?;
        Ok(format!("---\n{yaml}---"))
    }
}

/// The inclusive publication-date range eligible for one run.
///
/// Computed once before scanning begins and frozen for the run.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
}

impl TimeWindow {
    /// Inclusive on both ends: an article released exactly at `end` is in,
    /// one second past it is out.
    pub fn contains(&self, t: DateTime<Local>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// End-of-run counters, owned by the orchestrator.
///
/// Mutated only after a task resolves, so no synchronization is needed.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct RunStats {
    pub articles_scanned: u64,
    pub articles_matched: u64,
    pub articles_succeeded: u64,
    pub articles_failed: u64,
    pub images_succeeded: u64,
    pub images_failed: u64,
}
