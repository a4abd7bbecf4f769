pub(crate) mod metadata;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::EngineError;

pub use metadata::{Metadata, VideoQueueItem};

/// Identifies one `start`/`stop` pair on a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingSession(pub u64);

/// The file a recorder produced and when its buffer started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSource {
    pub file: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait Recorder: Send + Sync {
    /// Begins a recording session. Sessions may overlap when an encounter
    /// starts while an earlier one is still finishing.
    async fn start(&self) -> Result<RecordingSession, EngineError>;

    /// Ends `session` only. Other open sessions keep recording.
    async fn stop(&self, session: RecordingSession) -> Result<RecordingSource, EngineError>;
}

#[async_trait]
pub trait VideoQueue: Send + Sync {
    async fn queue_video(&self, item: VideoQueueItem) -> Result<(), EngineError>;
}

/// Writes `bytes` to a sibling temporary file and renames it over `path`.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let temp_path = temporary_path(path);
    std::fs::write(&temp_path, bytes).map_err(|error| EngineError::io(&temp_path, error))?;

    if path.exists() {
        std::fs::remove_file(path).map_err(|error| EngineError::io(path, error))?;
    }

    if let Err(error) = std::fs::rename(&temp_path, path) {
        if let Err(cleanup_error) = std::fs::remove_file(&temp_path) {
            tracing::warn!(
                temp_path = %temp_path.display(),
                cleanup_error = %cleanup_error,
                "Failed to clean up temporary file"
            );
        }
        return Err(EngineError::io(path, error));
    }

    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let Some(file_name) = path.file_name().and_then(|value| value.to_str()) else {
        return path.with_extension("tmp");
    };

    path.with_file_name(format!("{file_name}.tmp"))
}

/// Queue that persists each item as a JSON sidecar next to its source file,
/// for a downstream processor to pick up.
#[derive(Debug, Default)]
pub struct JsonSidecarQueue;

impl JsonSidecarQueue {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VideoQueue for JsonSidecarQueue {
    async fn queue_video(&self, item: VideoQueueItem) -> Result<(), EngineError> {
        let sidecar_path = metadata::write_queue_item(&item)?;
        tracing::info!(
            sidecar_path = %sidecar_path.display(),
            suffix = %item.suffix,
            duration_seconds = item.duration,
            "Queued video"
        );
        Ok(())
    }
}

/// Recorder for running without a capture backend. Tracks the buffer
/// window and names the file a capture would have produced.
///
/// The buffer runs while at least one session is open, so a session started
/// during another's overrun shares its buffer start.
#[derive(Debug)]
pub struct NoCaptureRecorder {
    output_directory: PathBuf,
    state: Mutex<BufferState>,
}

#[derive(Debug, Default)]
struct BufferState {
    buffer_started_at: Option<DateTime<Utc>>,
    sessions: HashMap<RecordingSession, DateTime<Utc>>,
    next_session: u64,
}

impl NoCaptureRecorder {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
            state: Mutex::new(BufferState::default()),
        }
    }
}

#[async_trait]
impl Recorder for NoCaptureRecorder {
    async fn start(&self) -> Result<RecordingSession, EngineError> {
        let mut state = self.state.lock().await;
        let buffer_started_at = *state.buffer_started_at.get_or_insert_with(Utc::now);

        state.next_session += 1;
        let session = RecordingSession(state.next_session);
        state.sessions.insert(session, buffer_started_at);
        tracing::debug!(
            session = session.0,
            open_sessions = state.sessions.len(),
            "Recording session started"
        );
        Ok(session)
    }

    async fn stop(&self, session: RecordingSession) -> Result<RecordingSource, EngineError> {
        let mut state = self.state.lock().await;
        let Some(started_at) = state.sessions.remove(&session) else {
            return Err(EngineError::Collaborator(format!(
                "Recording session {} is not open",
                session.0
            )));
        };

        if state.sessions.is_empty() {
            state.buffer_started_at = None;
        }

        let timestamp = started_at.format("%Y%m%d_%H%M%S");
        Ok(RecordingSource {
            file: self
                .output_directory
                .join(format!("recording_{timestamp}_{}.mp4", session.0)),
            started_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{write_atomically, NoCaptureRecorder, Recorder, RecordingSession};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_directory() -> std::path::PathBuf {
        let timestamp_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let process_id = std::process::id();
        std::env::temp_dir().join(format!(
            "xivpov_recording_test_{process_id}_{timestamp_nanos}"
        ))
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let temp_directory = unique_temp_directory();
        std::fs::create_dir_all(&temp_directory)
            .expect("Failed to create temporary recording test directory");
        let path = temp_directory.join("settings.json");

        write_atomically(&path, b"first").expect("Expected first write to succeed");
        write_atomically(&path, b"second").expect("Expected second write to succeed");

        let content = std::fs::read_to_string(&path).expect("Expected file to be readable");
        assert_eq!(content, "second");
        assert!(!temp_directory.join("settings.json.tmp").exists());

        std::fs::remove_dir_all(&temp_directory)
            .expect("Failed to remove temporary recording test directory");
    }

    #[tokio::test]
    async fn no_capture_recorder_requires_start_before_stop() {
        let recorder = NoCaptureRecorder::new("recordings");
        assert!(recorder.stop(RecordingSession(1)).await.is_err());

        let session = recorder.start().await.expect("Expected start to succeed");
        let source = recorder.stop(session).await.expect("Expected stop to succeed");
        assert!(source.file.starts_with("recordings"));
        assert!(recorder.stop(session).await.is_err());
    }

    #[tokio::test]
    async fn stopping_one_session_leaves_overlapping_session_open() {
        let recorder = NoCaptureRecorder::new("recordings");
        let first = recorder.start().await.expect("Expected first start to succeed");
        let second = recorder.start().await.expect("Expected second start to succeed");
        assert_ne!(first, second);

        let first_source = recorder.stop(first).await.expect("Expected first stop to succeed");
        let second_source = recorder
            .stop(second)
            .await
            .expect("Expected second session to still be open");

        assert_eq!(first_source.started_at, second_source.started_at);
        assert_ne!(first_source.file, second_source.file);
    }
}
