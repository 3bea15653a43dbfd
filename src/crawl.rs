//! Crawl orchestration: time-windowed feed scan, bounded per-article
//! processing, and order-independent result aggregation.
//!
//! The scanner walks the feed in strictly increasing offsets and stops on
//! the first empty page or the first article released outside the window
//! (the feed is ordered newest-first). Every matched article is processed
//! by its own task, admitted through the article semaphore; image downloads
//! from all articles share a second, independent semaphore. Already-spawned
//! tasks always run to completion and are drained before the run reports
//! its stats.

use chrono::{DateTime, Local};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::fetcher::Fetcher;
use crate::models::{RunStats, TimeWindow};
use crate::parser;
use crate::saver::AppSaver;
use crate::utils::date_format;

/// Both substrings must appear in a title for the article to qualify as a
/// weekly roundup. Policy constants, deliberately not configurable.
const TITLE_MARKER: &str = "派评";
const TITLE_QUALIFIER: &str = "近期值得关注";

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub page_size: u32,
    /// Cooperative delay between feed page requests, in seconds.
    pub sleep_time: u64,
    pub article_concurrency: usize,
    pub image_concurrency: usize,
}

pub fn title_matches(title: &str) -> bool {
    title.contains(TITLE_MARKER) && title.contains(TITLE_QUALIFIER)
}

/// Per-article task result: `(app_count, images_succeeded, images_failed, ok)`.
type ArticleResult = (usize, u64, u64, bool);

/// Run one crawl over the configured window and return the final counters.
///
/// Always returns stats, even if every article failed; only the
/// pre-flight configuration checks in `main` can abort a run.
pub async fn run(
    config: &CrawlConfig,
    window: TimeWindow,
    fetcher: Arc<Fetcher>,
    saver: Arc<AppSaver>,
) -> RunStats {
    let article_semaphore = Arc::new(Semaphore::new(config.article_concurrency));
    let image_semaphore = Arc::new(Semaphore::new(config.image_concurrency));
    let mut stats = RunStats::default();
    let mut tasks: Vec<JoinHandle<ArticleResult>> = Vec::new();
    let mut offset = 0u32;
    let mut keep_going = true;

    while keep_going {
        let articles = fetcher.fetch_feed_page(config.page_size, offset).await;
        if articles.is_empty() {
            info!(offset, "no more articles, stopping the scan");
            break;
        }

        for article in articles {
            stats.articles_scanned += 1;
            let Some(released) = local_release_time(article.released_time) else {
                warn!(
                    id = article.id,
                    released_time = article.released_time,
                    "article has an invalid release timestamp, stopping the scan"
                );
                keep_going = false;
                break;
            };
            if !window.contains(released) {
                info!(
                    id = article.id,
                    date = %date_format(released),
                    "article released outside the window, stopping the scan"
                );
                keep_going = false;
                break;
            }
            if !title_matches(&article.title) {
                continue;
            }

            stats.articles_matched += 1;
            info!(
                id = article.id,
                title = %article.title,
                date = %date_format(released),
                "queueing roundup article"
            );
            tasks.push(tokio::spawn(process_article(
                article.id,
                Arc::clone(&fetcher),
                Arc::clone(&saver),
                Arc::clone(&article_semaphore),
                Arc::clone(&image_semaphore),
            )));
        }

        offset += config.page_size;
        if keep_going && config.sleep_time > 0 {
            sleep(Duration::from_secs(config.sleep_time)).await;
        }
    }

    drain_tasks(tasks, &mut stats).await;
    stats
}

/// Drain every spawned task; completion order is unrelated to spawn order,
/// so aggregation is commutative counter addition only. A panicked task
/// counts one failed article with zero image contribution and never affects
/// its siblings.
async fn drain_tasks(tasks: Vec<JoinHandle<ArticleResult>>, stats: &mut RunStats) {
    for result in join_all(tasks).await {
        match result {
            Ok((app_count, images_succeeded, images_failed, ok)) => {
                if ok {
                    stats.articles_succeeded += 1;
                } else {
                    stats.articles_failed += 1;
                }
                stats.images_succeeded += images_succeeded;
                stats.images_failed += images_failed;
                info!(app_count, "article task finished");
            }
            Err(e) => {
                stats.articles_failed += 1;
                error!(error = %e, "article task panicked");
            }
        }
    }
}

/// Process one matched article end to end.
///
/// Detail-fetch and parse faults make the article fail; image failures do
/// not. An article whose parse succeeded counts as succeeded even when some
/// of its images could not be materialized; only the image counters are
/// penalized. That asymmetry is intentional.
async fn process_article(
    article_id: u64,
    fetcher: Arc<Fetcher>,
    saver: Arc<AppSaver>,
    article_semaphore: Arc<Semaphore>,
    image_semaphore: Arc<Semaphore>,
) -> ArticleResult {
    // Permit held for the whole article; dropped on every exit path.
    let Ok(_permit) = article_semaphore.acquire_owned().await else {
        return (0, 0, 0, false);
    };

    let Some(detail) = fetcher.fetch_article_detail(article_id).await else {
        error!(article_id, "failed to fetch article detail");
        return (0, 0, 0, false);
    };

    let apps = match parser::parse_apps(&detail) {
        Ok(apps) => apps,
        Err(e) => {
            error!(article_id, error = %e, "failed to parse article");
            return (0, 0, 0, false);
        }
    };
    if apps.is_empty() {
        return (0, 0, 0, true);
    }

    let app_count = apps.len();
    let saves: Vec<JoinHandle<_>> = apps
        .into_iter()
        .map(|app| {
            let saver = Arc::clone(&saver);
            let fetcher = Arc::clone(&fetcher);
            let image_semaphore = Arc::clone(&image_semaphore);
            tokio::spawn(async move { saver.save_app(&app, &fetcher, image_semaphore).await })
        })
        .collect();

    let mut images_succeeded = 0;
    let mut images_failed = 0;
    let mut ok = true;
    for result in join_all(saves).await {
        match result {
            Ok(Ok((succeeded, failed))) => {
                images_succeeded += succeeded;
                images_failed += failed;
            }
            Ok(Err(e)) => {
                error!(article_id, error = %e, "save task failed");
                ok = false;
            }
            Err(e) => {
                error!(article_id, error = %e, "save task panicked");
                ok = false;
            }
        }
    }

    (app_count, images_succeeded, images_failed, ok)
}

fn local_release_time(released_time: i64) -> Option<DateTime<Local>> {
    DateTime::from_timestamp(released_time, 0).map(|t| t.with_timezone(&Local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MATCHING_TITLE: &str = "派评 003 期：这些近期值得关注的开发者新作";

    fn test_config() -> CrawlConfig {
        CrawlConfig {
            page_size: 20,
            sleep_time: 0,
            article_concurrency: 4,
            image_concurrency: 8,
        }
    }

    fn recent_window() -> TimeWindow {
        let now = Local::now();
        TimeWindow {
            start: now - ChronoDuration::days(30),
            end: now,
        }
    }

    fn test_fetcher(base_url: &str, max_retries: u32) -> Arc<Fetcher> {
        Arc::new(
            Fetcher::with_base_url(
                base_url,
                std::time::Duration::from_secs(5),
                max_retries,
                std::time::Duration::from_millis(1),
            )
            .unwrap(),
        )
    }

    fn feed_entry(id: u64, title: &str, released_time: i64) -> serde_json::Value {
        serde_json::json!({"id": id, "title": title, "released_time": released_time})
    }

    fn detail_body(id: u64, released_time: i64, body: &str) -> serde_json::Value {
        serde_json::json!({
            "error": 0,
            "data": {
                "id": id,
                "title": MATCHING_TITLE,
                "released_time": released_time,
                "body": body,
            }
        })
    }

    async fn mount_feed_page(server: &MockServer, offset: u32, entries: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/article/index/page/get"))
            .and(query_param("offset", offset.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"error": 0, "data": entries})),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn test_title_needs_both_substrings() {
        assert!(title_matches(MATCHING_TITLE));
        assert!(!title_matches("派评 | App 推荐精选"));
        assert!(!title_matches("近期值得关注的新作"));
        assert!(!title_matches("本周看什么"));
    }

    #[tokio::test]
    async fn test_scanner_stops_on_empty_page_and_counts_matches() {
        let server = MockServer::start().await;
        let ts = (Local::now() - ChronoDuration::hours(1)).timestamp();
        mount_feed_page(
            &server,
            0,
            serde_json::json!([
                feed_entry(1, MATCHING_TITLE, ts),
                feed_entry(2, "本周看什么", ts),
                feed_entry(3, "派评 004 期：这些近期值得关注的 App", ts),
            ]),
        )
        .await;
        mount_feed_page(&server, 20, serde_json::json!([])).await;
        Mock::given(method("GET"))
            .and(path("/article/info/get"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(detail_body(1, ts, "<p>无小节</p>")),
            )
            .expect(2)
            .mount(&server)
            .await;

        let out = tempfile::tempdir().unwrap();
        let stats = run(
            &test_config(),
            recent_window(),
            test_fetcher(&server.uri(), 2),
            Arc::new(AppSaver::new(out.path())),
        )
        .await;

        assert_eq!(stats.articles_scanned, 3);
        assert_eq!(stats.articles_matched, 2);
        assert_eq!(stats.articles_succeeded, 2);
        assert_eq!(stats.articles_failed, 0);
    }

    #[tokio::test]
    async fn test_offset_increases_by_page_size() {
        let server = MockServer::start().await;
        let ts = (Local::now() - ChronoDuration::hours(1)).timestamp();
        // Each offset is requested exactly once; the expect(1) on every
        // mock asserts the strict offset progression.
        mount_feed_page(&server, 0, serde_json::json!([feed_entry(1, "其他", ts)])).await;
        mount_feed_page(&server, 20, serde_json::json!([feed_entry(2, "其他", ts)])).await;
        mount_feed_page(&server, 40, serde_json::json!([])).await;

        let out = tempfile::tempdir().unwrap();
        let stats = run(
            &test_config(),
            recent_window(),
            test_fetcher(&server.uri(), 2),
            Arc::new(AppSaver::new(out.path())),
        )
        .await;
        assert_eq!(stats.articles_scanned, 2);
        assert_eq!(stats.articles_matched, 0);
    }

    #[tokio::test]
    async fn test_window_boundary_stops_scan_within_page() {
        let server = MockServer::start().await;
        let now = Local::now();
        let inside = (now - ChronoDuration::hours(1)).timestamp();
        let outside = (now - ChronoDuration::days(40)).timestamp();
        // No page at offset 20 is mounted: crossing the boundary must stop
        // the scan without requesting further pages.
        mount_feed_page(
            &server,
            0,
            serde_json::json!([
                feed_entry(1, "其他", inside),
                feed_entry(2, MATCHING_TITLE, outside),
                feed_entry(3, MATCHING_TITLE, inside),
            ]),
        )
        .await;

        let out = tempfile::tempdir().unwrap();
        let stats = run(
            &test_config(),
            recent_window(),
            test_fetcher(&server.uri(), 2),
            Arc::new(AppSaver::new(out.path())),
        )
        .await;

        // Article 2 crossed the boundary; article 3 is never inspected.
        assert_eq!(stats.articles_scanned, 2);
        assert_eq!(stats.articles_matched, 0);
    }

    #[tokio::test]
    async fn test_panicked_task_fails_alone_while_siblings_count() {
        let mut stats = RunStats::default();
        let tasks = vec![
            tokio::spawn(async { (2, 3, 1, true) }),
            tokio::spawn(async { panic!("boom") }),
            tokio::spawn(async { (0, 0, 0, false) }),
        ];
        drain_tasks(tasks, &mut stats).await;

        assert_eq!(stats.articles_succeeded, 1);
        assert_eq!(stats.articles_failed, 2);
        assert_eq!(stats.images_succeeded, 3);
        assert_eq!(stats.images_failed, 1);
    }

    #[tokio::test]
    async fn test_article_pool_bounds_concurrent_processing() {
        let server = MockServer::start().await;
        let ts = (Local::now() - ChronoDuration::hours(1)).timestamp();
        mount_feed_page(
            &server,
            0,
            serde_json::json!([
                feed_entry(1, MATCHING_TITLE, ts),
                feed_entry(2, MATCHING_TITLE, ts),
                feed_entry(3, MATCHING_TITLE, ts),
            ]),
        )
        .await;
        mount_feed_page(&server, 20, serde_json::json!([])).await;
        Mock::given(method("GET"))
            .and(path("/article/info/get"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(detail_body(1, ts, "<p>无小节</p>"))
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(3)
            .mount(&server)
            .await;

        // With a single article permit, the three detail fetches must run
        // one after another: total time is at least three response delays.
        let config = CrawlConfig {
            article_concurrency: 1,
            ..test_config()
        };
        let out = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let stats = run(
            &config,
            recent_window(),
            test_fetcher(&server.uri(), 2),
            Arc::new(AppSaver::new(out.path())),
        )
        .await;

        assert_eq!(stats.articles_succeeded, 3);
        assert!(started.elapsed() >= std::time::Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_failed_detail_counts_article_failed_and_writes_nothing() {
        let server = MockServer::start().await;
        let ts = (Local::now() - ChronoDuration::hours(1)).timestamp();
        mount_feed_page(&server, 0, serde_json::json!([feed_entry(1, MATCHING_TITLE, ts)])).await;
        mount_feed_page(&server, 20, serde_json::json!([])).await;
        Mock::given(method("GET"))
            .and(path("/article/info/get"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let out = tempfile::tempdir().unwrap();
        let stats = run(
            &test_config(),
            recent_window(),
            test_fetcher(&server.uri(), 2),
            Arc::new(AppSaver::new(out.path())),
        )
        .await;

        assert_eq!(stats.articles_matched, 1);
        assert_eq!(stats.articles_failed, 1);
        assert_eq!(stats.articles_succeeded, 0);
        assert_eq!(stats.images_succeeded + stats.images_failed, 0);
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_partial_image_failure_keeps_article_succeeded() {
        let server = MockServer::start().await;
        let ts = (Local::now() - ChronoDuration::hours(1)).timestamp();
        mount_feed_page(&server, 0, serde_json::json!([feed_entry(1, MATCHING_TITLE, ts)])).await;
        mount_feed_page(&server, 20, serde_json::json!([])).await;

        let body = format!(
            r#"<h2>Raycast：启动器</h2>
               <p>平台：macOS</p>
               <img src="{uri}/img/a.png">
               <img src="{uri}/img/b.png">
               <img src="{uri}/img/c.png">"#,
            uri = server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/article/info/get"))
            .and(query_param("id", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(detail_body(1, ts, &body)))
            .mount(&server)
            .await;
        for name in ["a.png", "b.png"] {
            Mock::given(method("GET"))
                .and(path(format!("/img/{name}")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(b"X".to_vec()))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/img/c.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let out = tempfile::tempdir().unwrap();
        let stats = run(
            &test_config(),
            recent_window(),
            test_fetcher(&server.uri(), 2),
            Arc::new(AppSaver::new(out.path())),
        )
        .await;

        assert_eq!(stats.articles_succeeded, 1);
        assert_eq!(stats.articles_failed, 0);
        assert_eq!(stats.images_succeeded, 2);
        assert_eq!(stats.images_failed, 1);

        let date_dir = out.path().join(crate::utils::date_partition(
            DateTime::from_timestamp(ts, 0).unwrap().with_timezone(&Local),
        ));
        assert!(date_dir.join("Raycast-[macOS].md").exists());
        assert!(date_dir.join("images/a.png").exists());
        assert!(!date_dir.join("images/c.png").exists());
    }
}
