use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use futures::future::join_all;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use crate::config::{HostsConfig, PipelineConfig};
use crate::uploaders::build_client;
use super::errors::{Error, Result};
use super::store::MovieStore;
use super::traits::{MediaProber, ScreenshotGenerator, ThumbnailGridGenerator, UploadClient};
use super::types::MovieState;
use super::worker::{MovieWorker, RunContext};

/// Builds the upload client for a run
pub type ClientFactory = Arc<dyn Fn(&PipelineConfig) -> Result<Arc<dyn UploadClient>> + Send + Sync>;

#[derive(Default)]
struct RunState {
    cancel: Option<CancellationToken>,
}

/// Runs pending movies through analysis, generation and upload.
///
/// One run processes every movie that was `pending` when it started. Generation
/// and upload are admitted through two independent semaphores; the run ends when
/// every movie task has finished, at which point anything short of a terminal
/// state is put back to `pending`.
pub struct Pipeline {
    store: Arc<MovieStore>,
    prober: Arc<dyn MediaProber>,
    screenshotter: Arc<dyn ScreenshotGenerator>,
    grid: Arc<dyn ThumbnailGridGenerator>,
    client_factory: ClientFactory,
    running: Arc<watch::Sender<bool>>,
    tool_missing_logged: Arc<AtomicBool>,
    run: Mutex<RunState>,
}

impl Pipeline {
    /// Upload clients are built from `hosts` for the host each run selects.
    pub fn new(
        store: Arc<MovieStore>,
        prober: Arc<dyn MediaProber>,
        screenshotter: Arc<dyn ScreenshotGenerator>,
        grid: Arc<dyn ThumbnailGridGenerator>,
        hosts: HostsConfig,
    ) -> Self {
        let factory: ClientFactory = Arc::new(move |config: &PipelineConfig| {
            build_client(config.host, &hosts, config.request_timeout())
        });
        Self::with_client_factory(store, prober, screenshotter, grid, factory)
    }

    pub fn with_client_factory(
        store: Arc<MovieStore>,
        prober: Arc<dyn MediaProber>,
        screenshotter: Arc<dyn ScreenshotGenerator>,
        grid: Arc<dyn ThumbnailGridGenerator>,
        client_factory: ClientFactory,
    ) -> Self {
        Self {
            store,
            prober,
            screenshotter,
            grid,
            client_factory,
            running: Arc::new(watch::Sender::new(false)),
            tool_missing_logged: Arc::new(AtomicBool::new(false)),
            run: Mutex::new(RunState::default()),
        }
    }

    pub fn store(&self) -> &Arc<MovieStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Starts a run over the currently pending movies and returns immediately.
    pub async fn start_processing(&self, config: PipelineConfig) -> Result<()> {
        let mut run = self.run.lock().await;
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        let pending = self.store.ids_in_state(MovieState::Pending).await;
        if pending.is_empty() {
            return Err(Error::NothingPending);
        }

        config.validate()?;
        let client = (self.client_factory)(&config)?;

        self.running.send_replace(true);
        self.store.set_processing(true).await;

        let cancel = CancellationToken::new();
        info!(
            movies = pending.len(),
            host = %client.host(),
            screenshot_slots = config.max_concurrent_screenshots,
            upload_slots = config.max_concurrent_uploads,
            "Starting processing run"
        );

        let ctx = Arc::new(RunContext {
            store: self.store.clone(),
            prober: self.prober.clone(),
            screenshotter: self.screenshotter.clone(),
            grid: self.grid.clone(),
            client,
            screenshot_slots: Arc::new(Semaphore::new(config.max_concurrent_screenshots)),
            upload_slots: Arc::new(Semaphore::new(config.max_concurrent_uploads)),
            config,
            cancel: cancel.clone(),
            tool_missing_logged: self.tool_missing_logged.clone(),
        });

        let workers: Vec<JoinHandle<()>> = pending
            .iter()
            .map(|id| tokio::spawn(MovieWorker::new(*id, ctx.clone()).run()))
            .collect();

        let store = self.store.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            let outcomes = join_all(workers).await;
            for (id, outcome) in pending.into_iter().zip(outcomes) {
                if let Err(err) = outcome {
                    error!(movie_id = %id, error = %err, "Movie task aborted");
                    let message = format!("processing task aborted: {}", err);
                    store.update_by_id(id, |movie| {
                        movie.fail(message);
                    }).await;
                }
            }
            drop(ctx);

            let reset = store.reset_unfinished().await;
            if reset > 0 {
                debug!(reset, "Returned unfinished movies to pending");
            }
            store.set_processing(false).await;
            running.send_replace(false);
            info!("Processing run finished");
        });

        run.cancel = Some(cancel);
        Ok(())
    }

    /// Cancels the active run, if any. Returns without waiting for it to unwind.
    pub async fn cancel(&self) {
        let run = self.run.lock().await;
        if let Some(cancel) = &run.cancel {
            info!("Cancelling processing run");
            cancel.cancel();
        }
    }

    /// Waits until the current run, if any, has fully finished and unfinished
    /// movies are back to `pending`.
    pub async fn wait(&self) {
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }
}
