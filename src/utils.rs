//! Small helpers for filenames, image URLs, and timestamp formatting.

use chrono::{DateTime, Local};
use url::Url;

/// Replace path separators in a filename so it stays inside its date
/// directory. Separators are replaced with `-`, never rejected.
pub fn sanitize_filename(name: &str) -> String {
    name.replace(['/', '\\'], "-")
}

/// Derive the local filename for an image URL: drop any query string and
/// keep the final path segment.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(image_basename("https://cdn.sspai.com/a/b/pic.png?imageMogr2/quality/95"), "pic.png");
/// ```
pub fn image_basename(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(segments) = parsed.path_segments() {
            if let Some(last) = segments.filter(|s| !s.is_empty()).last() {
                return last.to_string();
            }
        }
    }
    // Relative or otherwise unparseable URL: plain string ops.
    let without_query = url.split('?').next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .unwrap_or(without_query)
        .to_string()
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS` for front matter and logs.
pub fn date_format(dt: DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a timestamp as the `YYYY-MM-DD` date-partition directory name.
pub fn date_partition(dt: DateTime<Local>) -> String {
    dt.format("%Y-%m-%d").to_string()
}
