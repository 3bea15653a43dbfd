//! Extraction collaborator: article detail → app recommendations.
//!
//! The weekly roundup body is one HTML document where every `<h2>` opens an
//! app section. Each section becomes one [`AppData`]: the heading yields the
//! app name, a `平台：…` line yields the platforms, images are collected for
//! download, and the section text becomes the Markdown body under a YAML
//! front-matter block.
//!
//! A fault here is caught per article by the processor; it never aborts
//! sibling articles or the run.

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::{AppData, AppFrontmatter, ArticleMeta};
use crate::utils::{date_format, date_partition, image_basename};

static H2_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").unwrap());
static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

const ARTICLE_URL_PREFIX: &str = "https://sspai.com/post/";
const KEYWORDS: [&str; 2] = ["派评", "App 推荐"];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("article detail is missing field `{0}`")]
    MissingField(&'static str),
    #[error("article has an invalid release timestamp {0}")]
    InvalidTimestamp(i64),
    #[error("failed to render front matter: {0}")]
    Frontmatter(#[from] serde_yaml::Error),
}

/// Extract every app recommendation from one article detail payload.
///
/// Zero sections is a legitimate outcome (an article with nothing to
/// extract), not an error.
pub fn parse_apps(detail: &Value) -> Result<Vec<AppData>, ParseError> {
    let title = str_field(detail, "title")?;
    let id = detail
        .get("id")
        .and_then(Value::as_u64)
        .ok_or(ParseError::MissingField("id"))?;
    let released_time = detail
        .get("released_time")
        .and_then(Value::as_i64)
        .ok_or(ParseError::MissingField("released_time"))?;
    let body = str_field(detail, "body")?;

    let released = DateTime::from_timestamp(released_time, 0)
        .ok_or(ParseError::InvalidTimestamp(released_time))?
        .with_timezone(&Local);

    let meta = ArticleMeta {
        title: title.to_string(),
        url: format!("{ARTICLE_URL_PREFIX}{id}"),
        id,
        release_time: date_format(released),
        released_date: date_partition(released),
    };

    let document = Html::parse_document(body);
    let mut apps = Vec::new();
    for heading in document.select(&H2_SELECTOR) {
        let raw_title = element_text(heading);
        if raw_title.is_empty() {
            continue;
        }
        let section = collect_section(heading);
        apps.push(build_app(&meta, &raw_title, section)?);
    }
    debug!(article_id = id, apps = apps.len(), "parsed article body");
    Ok(apps)
}

/// Text paragraphs and image URLs of one section, in document order.
struct Section {
    paragraphs: Vec<String>,
    image_urls: Vec<String>,
}

/// Walk the siblings following a section heading until the next `<h2>`.
fn collect_section(heading: ElementRef<'_>) -> Section {
    let mut paragraphs = Vec::new();
    let mut image_urls = Vec::new();

    for sibling in heading.next_siblings() {
        let Some(element) = ElementRef::wrap(sibling) else {
            continue;
        };
        if element.value().name() == "h2" {
            break;
        }

        let text = element_text(element);
        if !text.is_empty() {
            paragraphs.push(text);
        }
        if element.value().name() == "img" {
            if let Some(src) = image_src(element) {
                image_urls.push(src);
            }
        }
        for img in element.select(&IMG_SELECTOR) {
            if let Some(src) = image_src(img) {
                image_urls.push(src);
            }
        }
    }

    Section {
        paragraphs,
        image_urls,
    }
}

fn build_app(meta: &ArticleMeta, raw_title: &str, section: Section) -> Result<AppData, ParseError> {
    let app_name = raw_title
        .split(['：', ':'])
        .next()
        .unwrap_or(raw_title)
        .trim()
        .to_string();
    let platforms = section
        .paragraphs
        .iter()
        .find(|p| p.trim_start().starts_with("平台"))
        .map(|p| parse_platforms(p))
        .unwrap_or_default();

    let frontmatter = AppFrontmatter {
        title: raw_title.to_string(),
        app_name: app_name.clone(),
        platforms: platforms.clone(),
        keywords: KEYWORDS.iter().map(|k| k.to_string()).collect(),
        article_title: meta.title.clone(),
        article_id: meta.id,
        article_url: meta.url.clone(),
        released_time: meta.release_time.clone(),
    };

    let mut content = frontmatter.render()?;
    content.push_str(&format!("\n\n# {raw_title}\n"));
    for paragraph in &section.paragraphs {
        content.push_str(&format!("\n{paragraph}\n"));
    }
    for url in &section.image_urls {
        content.push_str(&format!("\n![](images/{})\n", image_basename(url)));
    }

    Ok(AppData {
        article: meta.clone(),
        file_title: app_name,
        platforms,
        content,
        image_urls: section.image_urls,
    })
}

/// `平台：iOS / Android` → `["iOS", "Android"]`.
fn parse_platforms(line: &str) -> Vec<String> {
    let rest = line.splitn(2, ['：', ':']).nth(1).unwrap_or("");
    rest.split(['/', '、', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn image_src(img: ElementRef<'_>) -> Option<String> {
    img.value()
        .attr("src")
        .or_else(|| img.value().attr("data-original"))
        .map(str::to_string)
}

fn str_field<'a>(detail: &'a Value, field: &'static str) -> Result<&'a str, ParseError> {
    detail
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail_with_body(body: &str) -> Value {
        serde_json::json!({
            "id": 93001,
            "title": "派评 003 期：这些近期值得关注的 App",
            "released_time": 1714368000,
            "body": body,
        })
    }

    #[test]
    fn test_parse_two_sections() {
        let body = r#"
            <p>本周的 App 速递。</p>
            <h2>Raycast：更快的启动器</h2>
            <ul><li>平台：macOS / Windows</li></ul>
            <p>一款键盘优先的启动器。</p>
            <figure><img src="https://cdn.sspai.com/a/raycast.png?imageMogr2/quality/95"></figure>
            <h2>熊掌记</h2>
            <p>平台：iOS、iPadOS</p>
            <p>优雅的写作应用。</p>
        "#;
        let apps = parse_apps(&detail_with_body(body)).unwrap();
        assert_eq!(apps.len(), 2);

        let raycast = &apps[0];
        assert_eq!(raycast.file_title, "Raycast");
        assert_eq!(raycast.platforms, vec!["macOS", "Windows"]);
        assert_eq!(
            raycast.image_urls,
            vec!["https://cdn.sspai.com/a/raycast.png?imageMogr2/quality/95"]
        );
        assert!(raycast.content.starts_with("---\n"));
        assert!(raycast.content.contains("# Raycast：更快的启动器"));
        assert!(raycast.content.contains("![](images/raycast.png)"));
        assert_eq!(raycast.article.url, "https://sspai.com/post/93001");
        assert_eq!(raycast.article.id, 93001);

        let bear = &apps[1];
        assert_eq!(bear.file_title, "熊掌记");
        assert_eq!(bear.platforms, vec!["iOS", "iPadOS"]);
        assert!(bear.image_urls.is_empty());
    }

    #[test]
    fn test_zero_sections_is_not_an_error() {
        let apps = parse_apps(&detail_with_body("<p>没有任何 App 小节。</p>")).unwrap();
        assert!(apps.is_empty());
    }

    #[test]
    fn test_missing_fields_are_errors() {
        let detail = serde_json::json!({"id": 1, "title": "t", "released_time": 1714368000});
        let err = parse_apps(&detail).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("body")));

        let detail = serde_json::json!({"id": 1, "released_time": 0, "body": ""});
        let err = parse_apps(&detail).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("title")));
    }

    #[test]
    fn test_section_without_platform_line() {
        let body = r#"<h2>某个 App</h2><p>介绍文字。</p>"#;
        let apps = parse_apps(&detail_with_body(body)).unwrap();
        assert_eq!(apps.len(), 1);
        assert!(apps[0].platforms.is_empty());
    }

    #[test]
    fn test_parse_platforms_variants() {
        assert_eq!(parse_platforms("平台：iOS / Android"), vec!["iOS", "Android"]);
        assert_eq!(parse_platforms("平台: macOS"), vec!["macOS"]);
        assert!(parse_platforms("平台：").is_empty());
    }
}
