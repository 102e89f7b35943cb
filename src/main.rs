use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context};
use reelshot::core::MovieState;
use reelshot::logging::init_logging;
use reelshot::media::{FfmpegScreenshotter, FfprobeProber, MtnGridGenerator};
use reelshot::{render, AppConfig, MovieStore, Pipeline};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args_os().skip(1);
    let Some(config_path) = args.next().map(PathBuf::from) else {
        bail!("usage: reelshot <config.toml> <video or directory>...");
    };
    let inputs: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if inputs.is_empty() {
        bail!("no video files or directories given");
    }

    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    init_logging(config.log_level.as_deref().unwrap_or("info"));

    let store = Arc::new(MovieStore::new());
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(FfprobeProber::new().context("ffprobe is required")?),
        Arc::new(FfmpegScreenshotter::new().context("ffmpeg is required")?),
        Arc::new(MtnGridGenerator::new()),
        config.hosts.clone(),
    );

    let added = store.add(inputs.as_slice()).await;
    info!(count = added.len(), "Movies added");
    if added.is_empty() {
        bail!("no video files found");
    }

    pipeline
        .start_processing(config.pipeline.clone())
        .await
        .context("starting processing")?;

    tokio::select! {
        _ = pipeline.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling");
            pipeline.cancel().await;
            pipeline.wait().await;
        }
    }

    for movie in store.movies().await {
        match movie.state {
            MovieState::Completed => {
                for error in &movie.artifact_errors {
                    warn!(movie = %movie.name, error = %error, "Partial failure");
                }
                println!("{}", render(config.template(), &movie));
            }
            MovieState::Error => {
                warn!(movie = %movie.name, error = movie.error.as_deref().unwrap_or(""), "Movie failed");
            }
            _ => {}
        }
    }

    Ok(())
}
