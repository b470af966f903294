use anyhow::{Context, Result};
use clap::Parser;
use facereg_core::{CancelFlag, DistanceMetric, FileGalleryStore, GalleryStore, ThresholdMatcher};
use facereg_store::SqliteStore;
use faceregd::config::{check_threshold, Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod dialog;
mod display;
mod feed;
mod session;
mod voice;

use session::{Collaborators, Session, SessionError, SessionOptions, SessionReport};

/// How long to wait for the session thread after Ctrl-C before exiting anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "faceregd", about = "Recognize faces from a frame feed and enroll strangers")]
struct Args {
    /// TOML config file (default: <data_dir>/faceregd.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Frame feed written by the detector sidecar; followed as it grows
    #[arg(long)]
    feed: Option<PathBuf>,
    /// Match threshold (overrides config)
    #[arg(long)]
    threshold: Option<f32>,
    /// Distance metric: euclidean or cosine (overrides config)
    #[arg(long)]
    metric: Option<DistanceMetric>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(feed) = args.feed {
        config.feed_path = feed;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = check_threshold(threshold)?;
    }
    if let Some(metric) = args.metric {
        config.metric = metric;
    }

    tracing::info!(
        data_dir = %config.data_dir.display(),
        gallery = %config.gallery_path.display(),
        db = %config.db_path.display(),
        feed = %config.feed_path.display(),
        metric = %config.metric,
        threshold = config.threshold,
        "faceregd starting"
    );

    let gallery_store = FileGalleryStore::new(&config.gallery_path);
    let gallery = gallery_store.load();

    // Profiles and images share one database file but use separate connections.
    let profiles = SqliteStore::open(&config.db_path).context("opening profile store")?;
    let blobs = SqliteStore::open(&config.db_path).context("opening image store")?;

    let stop = CancelFlag::new();
    let (frames, encoder) = feed::open(&config.feed_path)?;
    let frames = frames.follow(feed::FOLLOW_POLL, stop.clone());

    let session = Session::new(
        gallery,
        ThresholdMatcher::new(config.metric, config.threshold),
        Collaborators {
            profiles: Box::new(profiles),
            blobs: Box::new(blobs),
            voice: voice::from_config(config.voice_command.as_deref()),
            gallery_store: Box::new(gallery_store),
            dialog: Arc::new(dialog::TerminalDialog::stdio().context("starting terminal input")?),
            display: Box::new(display::ConsoleDisplay::stdout()),
        },
        SessionOptions {
            cancel_after_absent_frames: config.cancel_after_absent_frames,
            confirmation: config.confirmation.clone(),
        },
    );

    let mut handle = session::spawn_session(session, frames, encoder, stop)?;
    tracing::info!("faceregd ready");

    let finished = tokio::select! {
        res = &mut handle.done => Some(res),
        _ = tokio::signal::ctrl_c() => None,
    };

    let res = match finished {
        Some(res) => res,
        None => {
            tracing::info!("quit requested; stopping session");
            handle.stop();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle.done).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::warn!("session still blocked on the feed; exiting without it");
                    return Ok(());
                }
            }
        }
    };

    let report = res.map_err(|_| SessionError::ChannelClosed)??;
    log_report(&report);
    tracing::info!("faceregd shutting down");
    Ok(())
}

fn log_report(report: &SessionReport) {
    tracing::info!(
        frames = report.frames,
        faces = report.faces,
        recognized = report.recognized,
        enrolled = report.enrolled,
        cancelled = report.cancelled,
        skipped = report.skipped,
        failed = report.failed,
        "session finished"
    );
}
