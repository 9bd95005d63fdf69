use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use background::BackgroundReconciler;
use storage::task_storage::{TaskStorage, TaskStorageImpl};
use ticker::ForegroundTicker;
use tokio_util::sync::CancellationToken;
use tracing::error;
use wake::ClockWakeScheduler;

use crate::{
    status_api::{FileStatusSink, StatusSink},
    utils::clock::{Clock, DefaultClock},
};

pub mod args;
pub mod background;
pub mod shutdown;
pub mod storage;
pub mod ticker;
pub mod wake;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// The host scheduler promises nothing tighter than roughly-every-15-minutes. Anchor based
/// reconciliation doesn't need it to be tighter, or even regular.
const DEFAULT_WAKE_INTERVAL: Duration = Duration::from_secs(15 * 60);

const STATUS_FILE: &str = "status.json";

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf) -> Result<()> {
    std::env::set_current_dir("/")?;

    let storage = Arc::new(TaskStorageImpl::new(dir.clone())?);

    let shutdown_token = CancellationToken::new();

    let ticker = create_ticker(
        storage.clone(),
        status_sink(&dir),
        &shutdown_token,
        DefaultClock,
    );

    let background = create_background(storage, status_sink(&dir), &shutdown_token, DefaultClock);

    let (_, ticker_result, background_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        ticker.run(),
        background.run(),
    );

    if let Err(ticker_result) = ticker_result {
        error!("Ticker module got an error {:?}", ticker_result);
    }

    if let Err(background_result) = background_result {
        error!("Background module got an error {:?}", background_result);
    }

    Ok(())
}

fn status_sink(dir: &Path) -> Box<dyn StatusSink> {
    Box::new(FileStatusSink::new(
        dir.join(STATUS_FILE),
        Box::new(DefaultClock),
    ))
}

fn create_ticker<S: TaskStorage>(
    storage: S,
    sink: Box<dyn StatusSink>,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
) -> ForegroundTicker<S> {
    ForegroundTicker::new(
        storage,
        sink,
        shutdown_token.clone(),
        DEFAULT_TICK_INTERVAL,
        Box::new(clock),
    )
}

fn create_background<S: TaskStorage>(
    storage: S,
    sink: Box<dyn StatusSink>,
    shutdown_token: &CancellationToken,
    clock: impl Clock + Clone,
) -> BackgroundReconciler<S> {
    BackgroundReconciler::new(
        storage,
        Box::new(ClockWakeScheduler::new(Box::new(clock.clone()))),
        sink,
        DEFAULT_WAKE_INTERVAL,
        shutdown_token.clone(),
        Box::new(clock),
    )
}
