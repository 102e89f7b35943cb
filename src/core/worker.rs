use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::config::PipelineConfig;
use crate::uploaders::upload_artifact;
use crate::utils::{with_cancel, RetryBuilder, RetryStrategy};
use super::errors::{Error, Result};
use super::store::MovieStore;
use super::traits::{MediaProber, ScreenshotGenerator, ThumbnailGridGenerator, UploadClient};
use super::types::{HostUploads, MediaInfo, MovieId, MovieState};

/// Evenly spaced seek positions: `duration / (count + 1) * i` for `i = 1..=count`.
///
/// Every value lies strictly inside `(0, duration)`. An unknown duration yields
/// no timestamps.
pub fn screenshot_timestamps(duration: f64, count: usize) -> Vec<f64> {
    if !duration.is_finite() || duration <= 0.0 || count == 0 {
        return Vec::new();
    }

    let step = duration / (count + 1) as f64;
    (1..=count).map(|i| step * i as f64).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactKind {
    Thumbnail,
    Screenshot,
}

#[derive(Debug)]
struct Artifact {
    kind: ArtifactKind,
    path: PathBuf,
}

/// Everything shared by the workers of one run
pub(crate) struct RunContext {
    pub store: Arc<MovieStore>,
    pub prober: Arc<dyn MediaProber>,
    pub screenshotter: Arc<dyn ScreenshotGenerator>,
    pub grid: Arc<dyn ThumbnailGridGenerator>,
    pub client: Arc<dyn UploadClient>,
    pub config: PipelineConfig,
    pub screenshot_slots: Arc<Semaphore>,
    pub upload_slots: Arc<Semaphore>,
    pub cancel: CancellationToken,
    /// Flipped the first time the grid tool turns out to be absent
    pub tool_missing_logged: Arc<AtomicBool>,
}

/// Drives one movie from `pending` to a terminal state.
pub(crate) struct MovieWorker {
    id: MovieId,
    ctx: Arc<RunContext>,
}

impl MovieWorker {
    pub fn new(id: MovieId, ctx: Arc<RunContext>) -> Self {
        Self { id, ctx }
    }

    pub async fn run(self) {
        let scratch = self.ctx.config.work_dir.join(self.id.to_string());
        // Slot of the stage the movie is in; released only once the store shows
        // the movie in a later state.
        let mut slot = None;

        match self.process(&scratch, &mut slot).await {
            Ok(uploads) => self.finish(uploads).await,
            Err(err) if err.is_cancelled() => {
                debug!(movie_id = %self.id, "Processing cancelled");
            }
            Err(err) => {
                warn!(movie_id = %self.id, error = %err, "Processing failed");
                self.ctx.store.update_by_id(self.id, |movie| {
                    movie.fail(err.to_string());
                }).await;
            }
        }
        drop(slot);

        if !self.ctx.config.keep_artifacts {
            if let Err(err) = tokio::fs::remove_dir_all(&scratch).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    debug!(movie_id = %self.id, error = %err, "Failed to remove scratch directory");
                }
            }
        }
    }

    async fn process(&self, scratch: &Path, slot: &mut Option<OwnedSemaphorePermit>) -> Result<HostUploads> {
        if self.ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (path, media) = self.analyze().await?;
        let artifacts = self.generate(&path, &media, scratch, slot).await?;
        self.upload(artifacts, slot).await
    }

    async fn analyze(&self) -> Result<(PathBuf, MediaInfo)> {
        self.advance(MovieState::AnalyzingMedia).await?;

        let movie = self.ctx.store.get(self.id).await
            .ok_or_else(|| Error::internal(format!("movie {} left the store", self.id)))?;
        let probe = with_cancel(&self.ctx.cancel, self.ctx.prober.probe(&movie.path)).await?;
        let media = MediaInfo::from_probe(&probe);

        debug!(
            movie_id = %self.id,
            duration = media.duration,
            width = media.width,
            height = media.height,
            "Media analyzed"
        );

        let stored = media.clone();
        self.ctx.store.update_by_id(self.id, |movie| movie.media = Some(stored)).await;
        Ok((movie.path, media))
    }

    async fn generate(
        &self,
        path: &Path,
        media: &MediaInfo,
        scratch: &Path,
        slot: &mut Option<OwnedSemaphorePermit>,
    ) -> Result<Vec<Artifact>> {
        self.advance(MovieState::WaitingForScreenshotSlot).await?;
        *slot = Some(self.acquire(&self.ctx.screenshot_slots).await?);
        self.advance(MovieState::GeneratingScreenshots).await?;

        tokio::fs::create_dir_all(scratch).await?;
        let mut artifacts = Vec::new();

        if self.ctx.config.generate_thumbnail {
            match with_cancel(&self.ctx.cancel, self.ctx.grid.generate(path, scratch)).await {
                Ok(sheet) => artifacts.push(Artifact { kind: ArtifactKind::Thumbnail, path: sheet }),
                Err(Error::ToolMissing(tool)) => {
                    if !self.ctx.tool_missing_logged.swap(true, Ordering::SeqCst) {
                        warn!(tool = %tool, "Thumbnail tool not installed, skipping thumbnail grids");
                    }
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => self.record_artifact_error(format!("thumbnail grid: {}", err)).await,
            }
        }

        let quality = self.ctx.config.screenshot_quality;
        for (index, timestamp) in screenshot_timestamps(media.duration, self.ctx.config.screenshot_count)
            .into_iter()
            .enumerate()
        {
            let output = scratch.join(format!("screenshot_{:02}.jpg", index + 1));
            let capture = self.ctx.screenshotter.capture(path, &output, timestamp, quality);
            match with_cancel(&self.ctx.cancel, capture).await {
                Ok(()) => artifacts.push(Artifact { kind: ArtifactKind::Screenshot, path: output }),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    self.record_artifact_error(format!("screenshot {} at {:.3}s: {}", index + 1, timestamp, err)).await;
                }
            }
        }

        if artifacts.is_empty() {
            return Err(Error::Generation("no thumbnail or screenshot could be generated".to_string()));
        }

        debug!(movie_id = %self.id, count = artifacts.len(), "Artifacts generated");
        Ok(artifacts)
    }

    async fn upload(&self, artifacts: Vec<Artifact>, slot: &mut Option<OwnedSemaphorePermit>) -> Result<HostUploads> {
        self.advance(MovieState::WaitingForUploadSlot).await?;
        // The generation slot is not carried into the upload queue
        *slot = None;
        *slot = Some(self.acquire(&self.ctx.upload_slots).await?);
        self.advance(MovieState::UploadingScreenshots).await?;

        let client = self.ctx.client.as_ref();
        let cancel = &self.ctx.cancel;
        client.ensure_session(cancel).await?;

        let mut uploads = HostUploads::default();
        for artifact in &artifacts {
            let file = artifact.path.as_path();
            let result = RetryBuilder::new()
                .max_attempts(self.ctx.config.upload_retries.saturating_add(1))
                .strategy(RetryStrategy::Exponential {
                    initial: std::time::Duration::from_millis(500),
                    multiplier: 2.0,
                    max_delay: std::time::Duration::from_secs(10),
                })
                .run(cancel, || upload_artifact(client, cancel, file))
                .await;

            match result {
                Ok(uploaded) => match artifact.kind {
                    ArtifactKind::Thumbnail => uploads.thumbnail = Some(uploaded),
                    ArtifactKind::Screenshot => uploads.screenshots.push(uploaded),
                },
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(movie_id = %self.id, host = %client.host(), file = %file.display(), error = %err, "Upload failed");
                    let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                    self.record_artifact_error(format!("upload {}: {}", name, err)).await;
                }
            }
        }

        uploads.album_url = client.album_url();
        Ok(uploads)
    }

    async fn finish(&self, uploads: HostUploads) {
        let host = self.ctx.client.host();

        if uploads.is_empty() {
            warn!(movie_id = %self.id, host = %host, "No artifact could be uploaded");
            self.ctx.store.update_by_id(self.id, |movie| {
                movie.fail(format!("no artifact could be uploaded to {}", host));
            }).await;
            return;
        }

        let screenshots = uploads.screenshots.len();
        let has_thumbnail = uploads.thumbnail.is_some();
        self.ctx.store.update_by_id(self.id, |movie| {
            movie.uploads.insert(host, uploads);
            movie.uploaded_to = Some(host);
            movie.transition(MovieState::Completed);
        }).await;

        info!(movie_id = %self.id, host = %host, screenshots, has_thumbnail, "Movie completed");
    }

    async fn acquire(&self, slots: &Arc<Semaphore>) -> Result<OwnedSemaphorePermit> {
        let slots = slots.clone();
        with_cancel(&self.ctx.cancel, async move {
            slots.acquire_owned().await.map_err(|_| Error::internal("slot semaphore closed"))
        })
        .await
    }

    async fn advance(&self, to: MovieState) -> Result<()> {
        let mut moved = false;
        let found = self.ctx.store.update_by_id(self.id, |movie| moved = movie.transition(to)).await;

        if !found {
            return Err(Error::internal(format!("movie {} left the store", self.id)));
        }
        if !moved {
            return Err(Error::internal(format!("movie {} cannot move to {}", self.id, to)));
        }
        debug!(movie_id = %self.id, state = %to, "State changed");
        Ok(())
    }

    async fn record_artifact_error(&self, message: String) {
        debug!(movie_id = %self.id, error = %message, "Artifact failed");
        self.ctx.store.update_by_id(self.id, |movie| movie.artifact_errors.push(message)).await;
    }
}
