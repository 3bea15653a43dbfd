//! Persistence writer and idempotent image downloader.
//!
//! Every recommendation becomes one Markdown file under
//! `output_dir/<released-date>/`, with its images materialized next to it in
//! an `images/` subdirectory:
//!
//! ```text
//! output_dir/
//! └── 2024-04-29/
//!     ├── Raycast-[macOS,Windows].md
//!     └── images/
//!         └── raycast.png
//! ```
//!
//! Image and text-write faults are absorbed here and surfaced only as
//! counters; the one fault that escapes is a failure to create the date
//! directories, which fails the whole save.

use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::fetcher::Fetcher;
use crate::models::AppData;
use crate::utils::{image_basename, sanitize_filename};

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("failed to create output directories: {0}")]
    CreateDirs(#[from] std::io::Error),
}

pub struct AppSaver {
    output_dir: PathBuf,
}

impl AppSaver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Persist one recommendation: download its images through the shared
    /// image pool, then write the Markdown file. Returns the
    /// `(succeeded, failed)` image counts.
    ///
    /// An already-existing Markdown file is overwritten; that is logged,
    /// not treated as an error.
    pub async fn save_app(
        &self,
        app: &AppData,
        fetcher: &Fetcher,
        image_semaphore: Arc<Semaphore>,
    ) -> Result<(u64, u64), SaveError> {
        let filename = sanitize_filename(&format!(
            "{}-[{}].md",
            app.file_title,
            app.platforms.join(",")
        ));
        let date_dir = self.output_dir.join(&app.article.released_date);
        let image_dir = date_dir.join("images");
        tokio::fs::create_dir_all(&image_dir).await?;

        let downloads = app
            .image_urls
            .iter()
            .map(|url| download_image(url, &image_dir, fetcher, image_semaphore.clone()));
        let results = join_all(downloads).await;
        let succeeded = results.iter().filter(|ok| **ok).count() as u64;
        let failed = results.len() as u64 - succeeded;

        let filepath = date_dir.join(&filename);
        if matches!(tokio::fs::try_exists(&filepath).await, Ok(true)) {
            info!(path = %filepath.display(), "existing file will be overwritten");
        }
        match tokio::fs::write(&filepath, app.content.as_bytes()).await {
            Ok(()) => info!(file = %filename, "saved recommendation"),
            Err(e) => error!(file = %filename, error = %e, "failed to save recommendation"),
        }

        Ok((succeeded, failed))
    }
}

/// Fetch one image into `image_dir`, skipping the request entirely when the
/// file already exists. Never propagates an error.
///
/// The existence check and the write are not atomic: two recommendations
/// referencing the same URL may both download it. The bytes are identical,
/// so the duplicate write is harmless.
async fn download_image(
    url: &str,
    image_dir: &Path,
    fetcher: &Fetcher,
    image_semaphore: Arc<Semaphore>,
) -> bool {
    let filename = image_basename(url);
    let local_path = image_dir.join(&filename);

    if matches!(tokio::fs::try_exists(&local_path).await, Ok(true)) {
        info!(file = %filename, "image already present, skipping download");
        return true;
    }

    let Ok(_permit) = image_semaphore.acquire_owned().await else {
        return false;
    };
    match fetcher.fetch_image_bytes(url).await {
        Ok(bytes) => match tokio::fs::write(&local_path, &bytes).await {
            Ok(()) => {
                info!(url, "downloaded image");
                true
            }
            Err(e) => {
                error!(url, error = %e, "failed to write image");
                false
            }
        },
        Err(e) => {
            error!(url, error = %e, "failed to download image");
            false
        }
    }
}
