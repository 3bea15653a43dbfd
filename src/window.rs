//! Local-history scan and time-window computation.
//!
//! The crawl window is computed once, before any network activity, from the
//! newest `YYYY-MM-DD` directory already on disk and the `months`/`update`
//! options. Everything here is pure in `now` so the branches are testable.

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, TimeZone};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::TimeWindow;
use crate::utils::date_format;

/// Invalid run options. The only error category allowed to end the run,
/// and it fires before any network or filesystem side effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("months={0} is not a valid lookback window")]
    InvalidMonths(i64),
    #[error("page_size={0} must be positive")]
    InvalidPageSize(u32),
    #[error("retry_base_delay={0} must be a finite, non-negative number of seconds")]
    InvalidRetryDelay(f64),
}

/// Clap accepts any f64 for the retry delay; reject the values that would
/// not form a valid `Duration` before anything else runs.
pub fn validate_retry_base_delay(seconds: f64) -> Result<(), ConfigError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ConfigError::InvalidRetryDelay(seconds));
    }
    Ok(())
}

/// Newest date-partition directory under `output_dir`, if any.
///
/// Non-directory entries and names that are not `YYYY-MM-DD` are ignored;
/// a missing output directory means no history.
pub fn latest_local_date(output_dir: &Path) -> Option<NaiveDate> {
    let entries = std::fs::read_dir(output_dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| NaiveDate::parse_from_str(name, "%Y-%m-%d").ok())
        })
        .max()
}

/// Compute the inclusive crawl window for this run.
///
/// - No local history: `update` has no effect (warned); `months` must be
///   positive; the window reaches back `30 * months` days from `now`.
/// - History + `update`: incremental mode, the window starts the day after
///   the newest local article; a positive `months` is warned as ignored.
/// - History without `update`: like the no-history case, but overlap with
///   existing local data is warned as an overwrite.
pub fn calculate_time_window(
    months: i64,
    update: bool,
    latest_local: Option<NaiveDate>,
    now: DateTime<Local>,
) -> Result<TimeWindow, ConfigError> {
    let Some(latest) = latest_local else {
        info!("no local articles found, using the months lookback");
        if update {
            warn!("update mode has no effect without local history");
        }
        if months <= 0 {
            return Err(ConfigError::InvalidMonths(months));
        }
        let start = now - Duration::days(30 * months);
        return Ok(TimeWindow { start, end: now });
    };

    if update {
        info!(latest = %latest, "local articles found, crawling incrementally");
        if months > 0 {
            warn!(months, "months has no effect in update mode");
        }
        let start = local_midnight(latest + Duration::days(1), now);
        if start > now {
            warn!(latest = %latest, "local archive is already up to date, the window is empty");
            return Ok(TimeWindow { start: now, end: now });
        }
        return Ok(TimeWindow { start, end: now });
    }

    if months <= 0 {
        return Err(ConfigError::InvalidMonths(months));
    }
    let start = now - Duration::days(30 * months);
    if latest >= start.date_naive() {
        warn!(
            from = %date_format(start),
            to = %latest,
            "local articles in this range will be overwritten"
        );
    }
    Ok(TimeWindow { start, end: now })
}

fn local_midnight(date: NaiveDate, fallback: DateTime<Local>) -> DateTime<Local> {
    match Local.from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap()) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t,
        LocalResult::None => fallback,
    }
}
