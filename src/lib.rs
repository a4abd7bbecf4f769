pub mod activity;
pub mod combat_log;
pub mod encounter;
pub mod error;
pub mod recording;
pub mod service;
pub mod settings;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

use crate::combat_log::{spawn_tailer, LogFilePattern, LogTailer};
use crate::error::EngineError;
use crate::recording::{JsonSidecarQueue, NoCaptureRecorder};
use crate::service::{spawn_service, ServiceHandle};
use crate::settings::{JsonSettingsStore, SettingsStore};

/// Where settings live and where recordings and their sidecars are written.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub settings_path: PathBuf,
    pub output_directory: PathBuf,
}

fn start_service(
    options: &RunOptions,
) -> Result<(Arc<dyn SettingsStore>, ServiceHandle, tokio::task::JoinHandle<()>), EngineError> {
    let settings_store = JsonSettingsStore::open(&options.settings_path)?;
    tracing::info!(settings_path = %settings_store.path().display(), "Loaded settings");
    let settings: Arc<dyn SettingsStore> = Arc::new(settings_store);
    let recorder = Arc::new(NoCaptureRecorder::new(&options.output_directory));
    let queue = Arc::new(JsonSidecarQueue::new());
    let (handle, task) = spawn_service(settings.clone(), recorder, queue);
    Ok((settings, handle, task))
}

async fn shutdown(handle: ServiceHandle, task: tokio::task::JoinHandle<()>) {
    drop(handle);
    if let Err(error) = task.await {
        tracing::error!(join_error = %error, "Encounter service ended abnormally");
    }
}

/// Tails the log directory until interrupted.
pub async fn watch(log_directory: &Path, options: &RunOptions) -> Result<(), EngineError> {
    let (settings, handle, task) = start_service(options)?;
    let snapshot = settings.settings();

    let tailer = LogTailer::new(log_directory, LogFilePattern::from_settings(&snapshot));
    let tailer_handle = spawn_tailer(
        tailer,
        snapshot.poll_interval(),
        snapshot.idle_timeout(),
        handle.sender(),
    )?;

    tracing::info!(directory = %log_directory.display(), "Watching combat logs");
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(signal_error = %error, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutting down");
    tailer_handle.stop();
    if let Err(error) = handle.request_stop() {
        tracing::debug!(stop_error = %error, "Encounter service already gone");
    }
    shutdown(handle, task).await;
    Ok(())
}

/// Feeds a finished log file through the engine from the first line.
pub async fn replay(log_path: &Path, options: &RunOptions) -> Result<(), EngineError> {
    let (_settings, handle, task) = start_service(options)?;

    let file = File::open(log_path).map_err(|error| EngineError::io(log_path, error))?;
    let reader = BufReader::new(file);

    let mut line_count = 0_u64;
    for line_result in reader.lines() {
        let line = line_result.map_err(|error| EngineError::io(log_path, error))?;
        if line.trim().is_empty() {
            continue;
        }
        handle.send_line(line)?;
        line_count += 1;
    }

    tracing::info!(path = %log_path.display(), line_count, "Replayed combat log");
    shutdown(handle, task).await;
    Ok(())
}

/// Reads overlay feed messages, one JSON document per line, from stdin.
pub async fn feed(options: &RunOptions) -> Result<(), EngineError> {
    let (_settings, handle, task) = start_service(options)?;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let raw_message = match lines.next_line().await {
            Ok(Some(raw_message)) => raw_message,
            Ok(None) => break,
            Err(error) => return Err(EngineError::io("<stdin>", error)),
        };

        if raw_message.trim().is_empty() {
            continue;
        }

        if let Err(error) = handle.send_feed_message(&raw_message) {
            tracing::warn!(feed_error = %error, "Dropping feed message");
        }
    }

    shutdown(handle, task).await;
    Ok(())
}
