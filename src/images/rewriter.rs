//! Download pass and file relocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use super::scan::scan_markdown;
use crate::config::ExportConfig;
use crate::constants::{MAX_IMAGE_WORKERS, MIN_IMAGE_WORKERS};
use crate::error::ExportError;
use crate::export::{ExportObserver, NoopObserver, paths_for_markdown_file};
use crate::model::{ImageTask, RenameMode};
use crate::transport::ApiClient;

/// Result of rewriting one Markdown file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRewrite {
    /// Images found by the scan pass.
    pub image_count: usize,
    /// Images written to disk.
    pub downloaded: usize,
    /// Images that could not be downloaded.
    pub failed: usize,
    /// Where the Markdown lives afterwards.
    pub output_path: PathBuf,
    /// Downloads were cut short; the file was left untouched.
    pub interrupted: bool,
}

#[derive(Debug, Default)]
struct Progress {
    downloaded: usize,
    failed: usize,
}

/// Downloads the images referenced by Markdown files with a bounded worker pool.
pub struct ImageRewriter {
    client: ApiClient,
    workers: usize,
    rename_mode: RenameMode,
    file_prefix: String,
    url_prefix: String,
    cdn_domain: String,
    observer: Arc<dyn ExportObserver>,
    interrupted: Arc<AtomicBool>,
}

impl ImageRewriter {
    /// Creates a rewriter using the image settings of `config`.
    ///
    /// The worker count is clamped to 1..=30.
    #[must_use]
    pub fn new(client: ApiClient, config: &ExportConfig) -> Self {
        Self {
            client,
            workers: config.image_workers.clamp(MIN_IMAGE_WORKERS, MAX_IMAGE_WORKERS),
            rename_mode: config.image_rename_mode,
            file_prefix: config.image_file_prefix.clone(),
            url_prefix: config.image_url_prefix.clone(),
            cdn_domain: config.cdn_domain.clone(),
            observer: Arc::new(NoopObserver),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reports image progress to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExportObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Stops submitting downloads once `flag` is set.
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Size of the worker pool.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Scans `path`, downloads its images, and writes the rewritten Markdown
    /// next to them.
    ///
    /// A top-level `<dir>/<title>.md` moves to `<dir>/<title>/<title>.md`; a
    /// file already in its same-named directory is rewritten in place. Failed
    /// images are counted and logged, never fatal. Files without an `.md`
    /// extension are left alone.
    ///
    /// # Errors
    ///
    /// [`ExportError::Filesystem`] when the file cannot be read, the image
    /// directory cannot be created, or the rewritten file cannot be written.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn process_file(&self, path: &Path) -> Result<FileRewrite, ExportError> {
        let unchanged = |interrupted| FileRewrite {
            image_count: 0,
            downloaded: 0,
            failed: 0,
            output_path: path.to_path_buf(),
            interrupted,
        };

        if path.extension().is_none_or(|ext| ext != "md") {
            info!("not a Markdown file; skipping");
            return Ok(unchanged(false));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExportError::filesystem(path, e))?;
        let markdown = String::from_utf8_lossy(&bytes);

        let layout = paths_for_markdown_file(path);
        let scan = scan_markdown(
            &markdown,
            &layout.asset_dir,
            self.rename_mode,
            &self.file_prefix,
            &self.url_prefix,
        );

        tokio::fs::create_dir_all(&layout.asset_dir)
            .await
            .map_err(|e| ExportError::filesystem(&layout.asset_dir, e))?;

        let image_count = scan.tasks.len();
        let off_cdn = scan
            .tasks
            .iter()
            .filter(|task| !task.url.contains(&self.cdn_domain))
            .count();
        if off_cdn > 0 {
            debug!(off_cdn, cdn = %self.cdn_domain, "images hosted outside the CDN");
        }

        let progress = self.download_all(scan.tasks).await;
        if progress.interrupted {
            warn!("image downloads interrupted; leaving file untouched");
            return Ok(FileRewrite {
                image_count,
                downloaded: progress.downloaded,
                failed: progress.failed,
                ..unchanged(true)
            });
        }

        tokio::fs::write(&layout.relocated, scan.rewritten.as_bytes())
            .await
            .map_err(|e| ExportError::filesystem(&layout.relocated, e))?;
        if layout.relocated != layout.primary {
            tokio::fs::remove_file(&layout.primary)
                .await
                .map_err(|e| ExportError::filesystem(&layout.primary, e))?;
        }

        info!(
            images = image_count,
            downloaded = progress.downloaded,
            failed = progress.failed,
            output = %layout.relocated.display(),
            "markdown rewritten"
        );
        Ok(FileRewrite {
            image_count,
            downloaded: progress.downloaded,
            failed: progress.failed,
            output_path: layout.relocated,
            interrupted: false,
        })
    }

    async fn download_all(&self, tasks: Vec<ImageTask>) -> PassOutcome {
        let total = tasks.len();
        if total == 0 {
            return PassOutcome::default();
        }
        info!(total, workers = self.workers, "downloading images");

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let progress = Arc::new(Mutex::new(Progress::default()));
        let mut handles = Vec::with_capacity(total);
        let mut interrupted = false;

        for task in tasks {
            if self.interrupted.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let client = self.client.clone();
            let progress = Arc::clone(&progress);
            let observer = Arc::clone(&self.observer);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let target = task.target_path();
                let ok = match client.download_to_file(&task.url, &target, |_| {}).await {
                    Ok(true) => true,
                    Ok(false) => false,
                    Err(error) => {
                        warn!(url = %task.url, %error, "image download failed");
                        false
                    }
                };

                let mut progress = progress.lock().await;
                if ok {
                    progress.downloaded += 1;
                    debug!(file = %target.display(), "image saved");
                } else {
                    progress.failed += 1;
                }
                observer.image_progress(progress.downloaded, total);
            }));
        }

        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "image task panicked");
                progress.lock().await.failed += 1;
            }
        }

        let progress = progress.lock().await;
        PassOutcome {
            downloaded: progress.downloaded,
            failed: progress.failed,
            interrupted,
        }
    }
}

#[derive(Debug, Default)]
struct PassOutcome {
    downloaded: usize,
    failed: usize,
    interrupted: bool,
}

/// Every `.md` file under `dir`, sorted.
///
/// # Errors
///
/// [`ExportError::Filesystem`] if a directory cannot be listed.
pub fn markdown_files_under(dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| ExportError::filesystem(&current, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ExportError::filesystem(&current, e))?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "md") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
