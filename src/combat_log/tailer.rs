use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::EngineError;
use crate::service::EngineMessage;
use crate::settings::RecorderSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilePattern {
    prefix: String,
    extension: String,
}

impl LogFilePattern {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().to_ascii_lowercase(),
            extension: extension
                .into()
                .trim_start_matches('.')
                .to_ascii_lowercase(),
        }
    }

    pub fn from_settings(settings: &RecorderSettings) -> Self {
        Self::new(&settings.log_file_prefix, &settings.log_file_extension)
    }

    pub fn matches(&self, file_name: &str) -> bool {
        let lower_file_name = file_name.to_ascii_lowercase();
        lower_file_name.starts_with(&self.prefix)
            && lower_file_name.ends_with(&format!(".{}", self.extension))
    }

    fn matches_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| self.matches(name))
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct TrackedFile {
    size: u64,
    pending_fragment: Vec<u8>,
}

/// Tracks the read position of every log file in a directory and hands out
/// each appended line exactly once.
#[derive(Debug)]
pub struct LogTailer {
    directory: PathBuf,
    pattern: LogFilePattern,
    files: HashMap<PathBuf, TrackedFile>,
    current: Option<PathBuf>,
}

impl LogTailer {
    pub fn new(directory: impl Into<PathBuf>, pattern: LogFilePattern) -> Self {
        Self {
            directory: directory.into(),
            pattern,
            files: HashMap::new(),
            current: None,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn tracked_size(&self, path: &Path) -> Option<u64> {
        self.files.get(path).map(|tracked| tracked.size)
    }

    /// Records the size of every existing log file so only later writes are read.
    pub fn baseline(&mut self) -> Result<(), EngineError> {
        let directory_entries = std::fs::read_dir(&self.directory)
            .map_err(|error| EngineError::io(&self.directory, error))?;

        let mut latest_match: Option<(SystemTime, PathBuf)> = None;

        for entry_result in directory_entries {
            let entry = entry_result.map_err(|error| EngineError::io(&self.directory, error))?;
            let path = entry.path();
            if !path.is_file() || !self.pattern.matches_path(&path) {
                continue;
            }

            let metadata = entry
                .metadata()
                .map_err(|error| EngineError::io(&path, error))?;
            let modified_time = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

            self.files.insert(
                path.clone(),
                TrackedFile {
                    size: metadata.len(),
                    pending_fragment: Vec::new(),
                },
            );

            if latest_match
                .as_ref()
                .map(|(latest_time, _)| modified_time > *latest_time)
                .unwrap_or(true)
            {
                latest_match = Some((modified_time, path));
            }
        }

        self.current = latest_match.map(|(_, path)| path);
        tracing::info!(
            directory = %self.directory.display(),
            tracked_files = self.files.len(),
            current = ?self.current,
            "Baselined combat log directory"
        );
        Ok(())
    }

    /// A newly created file is read from the start.
    pub fn on_created(&mut self, path: &Path) -> Result<Vec<String>, EngineError> {
        if !self.pattern.matches_path(path) {
            return Ok(Vec::new());
        }

        tracing::info!("New combat log file detected: {}", path.display());
        self.files.remove(path);
        self.process(path)
    }

    pub fn on_changed(&mut self, path: &Path) -> Result<Vec<String>, EngineError> {
        if !self.pattern.matches_path(path) {
            return Ok(Vec::new());
        }

        self.process(path)
    }

    pub fn on_removed(&mut self, path: &Path) {
        if self.files.remove(path).is_some() {
            tracing::info!("Combat log file removed: {}", path.display());
        }

        if self.current.as_deref() == Some(path) {
            self.current = None;
        }
    }

    /// Dispatches a watcher notification and returns the complete lines it produced.
    pub fn handle_notification(&mut self, event: &Event) -> Vec<String> {
        let mut lines = Vec::new();

        for path in &event.paths {
            let result = match event.kind {
                EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                    self.on_created(path)
                }
                EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                    self.on_removed(path);
                    Ok(Vec::new())
                }
                EventKind::Modify(_) | EventKind::Any => self.on_changed(path),
                _ => Ok(Vec::new()),
            };

            match result {
                Ok(new_lines) => lines.extend(new_lines),
                Err(error) => {
                    tracing::warn!("Failed to read combat log update: {error}");
                }
            }
        }

        lines
    }

    fn process(&mut self, path: &Path) -> Result<Vec<String>, EngineError> {
        let current_size = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                self.on_removed(path);
                return Ok(Vec::new());
            }
            Err(error) => return Err(EngineError::io(path, error)),
        };

        self.current = Some(path.to_path_buf());
        let tracked = self.files.entry(path.to_path_buf()).or_default();

        if current_size < tracked.size {
            tracing::warn!(
                "Combat log file {} shrank from {} to {current_size} bytes, rebasing read position",
                path.display(),
                tracked.size
            );
            tracked.size = current_size;
            tracked.pending_fragment.clear();
            return Ok(Vec::new());
        }

        let bytes_to_read = current_size - tracked.size;
        if bytes_to_read < 1 {
            return Ok(Vec::new());
        }

        let chunk = read_chunk(path, tracked.size, bytes_to_read)?;
        tracked.size = current_size;

        let mut buffered = std::mem::take(&mut tracked.pending_fragment);
        buffered.extend_from_slice(&chunk);

        let complete_length = match buffered.iter().rposition(|byte| *byte == b'\n') {
            Some(index) => index + 1,
            None => 0,
        };
        tracked.pending_fragment = buffered.split_off(complete_length);

        Ok(split_lines(&buffered))
    }
}

/// Reads `bytes` bytes from `position`. A short read is logged and the partial data returned.
fn read_chunk(path: &Path, position: u64, bytes: u64) -> Result<Vec<u8>, EngineError> {
    let mut file = File::open(path).map_err(|error| EngineError::io(path, error))?;
    file.seek(SeekFrom::Start(position))
        .map_err(|error| EngineError::io(path, error))?;

    let mut buffer = Vec::with_capacity(bytes as usize);
    let bytes_read = file
        .take(bytes)
        .read_to_end(&mut buffer)
        .map_err(|error| EngineError::io(path, error))? as u64;

    if bytes_read != bytes {
        let short_read = EngineError::ShortRead {
            path: path.to_path_buf(),
            requested: bytes,
            read: bytes_read,
        };
        tracing::warn!("Short read on combat log: {short_read}");
    }

    Ok(buffer)
}

fn split_lines(buffer: &[u8]) -> Vec<String> {
    buffer
        .split(|byte| *byte == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

enum DirectoryWatcher {
    Recommended(RecommendedWatcher),
    Polling(PollWatcher),
}

impl DirectoryWatcher {
    fn watch(&mut self, directory: &Path) -> notify::Result<()> {
        match self {
            DirectoryWatcher::Recommended(watcher) => {
                watcher.watch(directory, RecursiveMode::NonRecursive)
            }
            DirectoryWatcher::Polling(watcher) => {
                watcher.watch(directory, RecursiveMode::NonRecursive)
            }
        }
    }
}

pub struct TailerHandle {
    task: JoinHandle<()>,
}

impl TailerHandle {
    pub fn stop(&self) {
        self.task.abort();
    }
}

/// Baselines `tailer` and spawns the task that feeds new lines and idle
/// timeouts into `sender`. Must be called from within a tokio runtime.
pub fn spawn_tailer(
    mut tailer: LogTailer,
    poll_interval: Option<Duration>,
    idle_timeout: Duration,
    sender: mpsc::UnboundedSender<EngineMessage>,
) -> Result<TailerHandle, EngineError> {
    tailer.baseline()?;

    let (notify_sender, notify_receiver) =
        mpsc::unbounded_channel::<Result<Event, notify::Error>>();
    let handler = move |result| {
        if notify_sender.send(result).is_err() {
            tracing::debug!("Combat log watcher notification receiver dropped");
        }
    };

    let mut watcher = match poll_interval {
        Some(interval) => DirectoryWatcher::Polling(PollWatcher::new(
            handler,
            notify::Config::default().with_poll_interval(interval),
        )?),
        None => DirectoryWatcher::Recommended(notify::recommended_watcher(handler)?),
    };
    watcher.watch(tailer.directory())?;

    let task = tokio::spawn(async move {
        let _watcher = watcher;
        run_tailer(tailer, notify_receiver, idle_timeout, sender).await;
    });

    Ok(TailerHandle { task })
}

async fn run_tailer(
    mut tailer: LogTailer,
    mut notify_receiver: mpsc::UnboundedReceiver<Result<Event, notify::Error>>,
    idle_timeout: Duration,
    sender: mpsc::UnboundedSender<EngineMessage>,
) {
    let idle_timer = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_timer);
    let mut idle_timer_armed = false;

    loop {
        tokio::select! {
            notification = notify_receiver.recv() => {
                let Some(notification_result) = notification else {
                    break;
                };

                let event = match notification_result {
                    Ok(event) => event,
                    Err(error) => {
                        tracing::warn!("Combat log watcher error: {error}");
                        continue;
                    }
                };

                let lines = tailer.handle_notification(&event);
                if lines.is_empty() {
                    continue;
                }

                for line in lines {
                    if sender.send(EngineMessage::Line(line)).is_err() {
                        return;
                    }
                }

                idle_timer.as_mut().reset(Instant::now() + idle_timeout);
                idle_timer_armed = true;
            }
            () = &mut idle_timer, if idle_timer_armed => {
                idle_timer_armed = false;
                tracing::debug!("Combat log went idle for {}s", idle_timeout.as_secs());
                if sender.send(EngineMessage::Timeout(idle_timeout)).is_err() {
                    return;
                }
            }
            () = sender.closed() => break,
        }
    }

    tracing::info!("Combat log tailer stopped for {}", tailer.directory().display());
}

#[cfg(test)]
mod tests {
    use super::{run_tailer, LogFilePattern, LogTailer};
    use crate::service::EngineMessage;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};
    use notify::{Event, EventKind};
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tokio::sync::mpsc;

    fn unique_temp_directory() -> PathBuf {
        let timestamp_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let process_id = std::process::id();
        let directory = std::env::temp_dir().join(format!(
            "xivpov_tailer_test_{process_id}_{timestamp_nanos}"
        ));
        std::fs::create_dir_all(&directory).expect("Failed to create temporary test directory");
        directory
    }

    fn append(path: &Path, content: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("Expected log file to open for append");
        file.write_all(content.as_bytes())
            .expect("Expected append to succeed");
    }

    fn network_tailer(directory: &Path) -> LogTailer {
        LogTailer::new(directory, LogFilePattern::new("Network_", "log"))
    }

    #[test]
    fn pattern_is_case_insensitive() {
        let pattern = LogFilePattern::new("Network_", ".log");
        assert!(pattern.matches("Network_26001_20250301.log"));
        assert!(pattern.matches("network_26001_20250301.LOG"));
        assert!(!pattern.matches("Network_26001_20250301.txt"));
        assert!(!pattern.matches("Chat_20250301.log"));
    }

    #[test]
    fn baseline_skips_existing_content_and_emits_appends_once() {
        let temp_directory = unique_temp_directory();
        let log_path = temp_directory.join("Network_26001_20250301.log");
        append(&log_path, "01|old|line\n");

        let mut tailer = network_tailer(&temp_directory);
        tailer.baseline().expect("Expected baseline to succeed");
        assert_eq!(tailer.current(), Some(log_path.as_path()));
        assert_eq!(tailer.tracked_size(&log_path), Some(12));

        append(&log_path, "260|a|1\n\n  37|b|c  \n");
        let lines = tailer.on_changed(&log_path).expect("Expected read to succeed");
        assert_eq!(lines, vec!["260|a|1".to_string(), "37|b|c".to_string()]);

        let duplicate = tailer
            .on_changed(&log_path)
            .expect("Expected duplicate notification to succeed");
        assert!(duplicate.is_empty());

        std::fs::remove_dir_all(&temp_directory)
            .expect("Failed to remove temporary tailer test directory");
    }

    #[test]
    fn holds_partial_lines_until_completed() {
        let temp_directory = unique_temp_directory();
        let log_path = temp_directory.join("Network_1.log");
        let mut tailer = network_tailer(&temp_directory);

        append(&log_path, "260|2025|1\n21|partial");
        let first = tailer.on_created(&log_path).expect("Expected read to succeed");
        assert_eq!(first, vec!["260|2025|1".to_string()]);

        append(&log_path, "|rest\n");
        let second = tailer.on_changed(&log_path).expect("Expected read to succeed");
        assert_eq!(second, vec!["21|partial|rest".to_string()]);

        std::fs::remove_dir_all(&temp_directory)
            .expect("Failed to remove temporary tailer test directory");
    }

    #[test]
    fn shrinking_file_rebases_without_reading() {
        let temp_directory = unique_temp_directory();
        let log_path = temp_directory.join("Network_1.log");
        append(&log_path, "01|a|b\n02|c|d\n");

        let mut tailer = network_tailer(&temp_directory);
        tailer.baseline().expect("Expected baseline to succeed");

        std::fs::write(&log_path, "03|e\n").expect("Expected truncate to succeed");
        let lines = tailer.on_changed(&log_path).expect("Expected rebase to succeed");
        assert!(lines.is_empty());
        assert_eq!(tailer.tracked_size(&log_path), Some(5));

        append(&log_path, "04|f\n");
        let lines = tailer.on_changed(&log_path).expect("Expected read to succeed");
        assert_eq!(lines, vec!["04|f".to_string()]);

        std::fs::remove_dir_all(&temp_directory)
            .expect("Failed to remove temporary tailer test directory");
    }

    #[test]
    fn notifications_route_by_kind_and_ignore_other_files() {
        let temp_directory = unique_temp_directory();
        let log_path = temp_directory.join("Network_2.log");
        let other_path = temp_directory.join("Chat.log");
        let mut tailer = network_tailer(&temp_directory);

        append(&other_path, "not|combat\n");
        let ignored = tailer.handle_notification(
            &Event::new(EventKind::Create(CreateKind::File)).add_path(other_path.clone()),
        );
        assert!(ignored.is_empty());
        assert_eq!(tailer.tracked_size(&other_path), None);

        append(&log_path, "260|x|1\n");
        let created = tailer.handle_notification(
            &Event::new(EventKind::Create(CreateKind::File)).add_path(log_path.clone()),
        );
        assert_eq!(created, vec!["260|x|1".to_string()]);

        append(&log_path, "260|y|0\n");
        let modified = tailer.handle_notification(
            &Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(log_path.clone()),
        );
        assert_eq!(modified, vec!["260|y|0".to_string()]);

        std::fs::remove_file(&log_path).expect("Expected log removal to succeed");
        tailer.handle_notification(
            &Event::new(EventKind::Remove(RemoveKind::File)).add_path(log_path.clone()),
        );
        assert_eq!(tailer.tracked_size(&log_path), None);
        assert_eq!(tailer.current(), None);

        std::fs::remove_dir_all(&temp_directory)
            .expect("Failed to remove temporary tailer test directory");
    }

    fn content_changed(path: &Path) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.to_path_buf())
    }

    #[test]
    fn delivered_bytes_add_up_to_file_size() {
        let temp_directory = unique_temp_directory();
        let log_path = temp_directory.join("Network_3.log");
        let mut tailer = network_tailer(&temp_directory);

        let appends = [
            "260|2025|1\n21|src",
            "|tgt|dmg\n37|unit|0",
            "|1000\n",
            "25|unit|died\n03|add",
            "|ed\n",
        ];
        let mut delivered = Vec::new();
        append(&log_path, appends[0]);
        delivered.extend(tailer.on_created(&log_path).expect("Expected read to succeed"));
        for content in &appends[1..] {
            append(&log_path, content);
            delivered.extend(tailer.on_changed(&log_path).expect("Expected read to succeed"));
        }

        assert_eq!(
            delivered,
            vec![
                "260|2025|1".to_string(),
                "21|src|tgt|dmg".to_string(),
                "37|unit|0|1000".to_string(),
                "25|unit|died".to_string(),
                "03|added".to_string(),
            ]
        );

        let delivered_bytes: u64 = delivered.iter().map(|line| line.len() as u64 + 1).sum();
        let file_size = std::fs::metadata(&log_path)
            .expect("Expected log file metadata")
            .len();
        assert_eq!(delivered_bytes, file_size);
        assert_eq!(tailer.tracked_size(&log_path), Some(file_size));

        std::fs::remove_dir_all(&temp_directory)
            .expect("Failed to remove temporary tailer test directory");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_fires_once_after_last_line() {
        let temp_directory = unique_temp_directory();
        let log_path = temp_directory.join("Network_4.log");
        let mut tailer = network_tailer(&temp_directory);
        tailer.baseline().expect("Expected baseline to succeed");

        let idle_timeout = Duration::from_secs(120);
        let (notify_sender, notify_receiver) = mpsc::unbounded_channel();
        let (engine_sender, mut engine_receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_tailer(
            tailer,
            notify_receiver,
            idle_timeout,
            engine_sender,
        ));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(engine_receiver.try_recv().is_err());

        append(&log_path, "260|2025|1\n");
        notify_sender
            .send(Ok(content_changed(&log_path)))
            .expect("Expected tailer to accept notification");

        let line = engine_receiver.recv().await.expect("Expected a line");
        assert!(matches!(line, EngineMessage::Line(ref raw) if raw == "260|2025|1"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(engine_receiver.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let timeout = engine_receiver.try_recv().expect("Expected idle timeout");
        assert!(matches!(timeout, EngineMessage::Timeout(idle) if idle == idle_timeout));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(engine_receiver.try_recv().is_err());

        drop(notify_sender);
        task.await.expect("Expected tailer task to finish");

        std::fs::remove_dir_all(&temp_directory)
            .expect("Failed to remove temporary tailer test directory");
    }
}
