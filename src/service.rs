use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::activity::{Activity, VideoCategory};
use crate::combat_log::feed::{decode_feed_message, CombatData, FeedInput};
use crate::combat_log::parser::LogLine;
use crate::encounter::{EncounterStateMachine, MachineOutput, StopReason};
use crate::error::EngineError;
use crate::recording::{Recorder, RecordingSession, VideoQueue, VideoQueueItem};
use crate::settings::SettingsStore;

/// Everything the encounter service reacts to, in arrival order.
#[derive(Debug, Clone)]
pub enum EngineMessage {
    /// A raw line from the tailer.
    Line(String),
    /// A line already split by the feed sender.
    LogLine(LogLine),
    CombatData(CombatData),
    /// No log line was seen for the given duration.
    Timeout(Duration),
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Queued,
    RecorderStopFailed,
    MissingMetadata,
    TooShort,
}

/// Cloneable entry point into the service mailbox. The service stops once
/// every handle has been dropped.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    sender: mpsc::UnboundedSender<EngineMessage>,
}

impl ServiceHandle {
    pub fn sender(&self) -> mpsc::UnboundedSender<EngineMessage> {
        self.sender.clone()
    }

    pub fn send(&self, message: EngineMessage) -> Result<(), EngineError> {
        self.sender
            .send(message)
            .map_err(|_| EngineError::Collaborator("Encounter service is not running".to_string()))
    }

    pub fn send_line(&self, line: impl Into<String>) -> Result<(), EngineError> {
        self.send(EngineMessage::Line(line.into()))
    }

    /// Decodes one overlay feed message and forwards it.
    pub fn send_feed_message(&self, raw_message: &str) -> Result<(), EngineError> {
        match decode_feed_message(raw_message)? {
            FeedInput::Line(line) => self.send(EngineMessage::LogLine(line)),
            FeedInput::CombatData(combat_data) => self.send(EngineMessage::CombatData(combat_data)),
        }
    }

    pub fn request_stop(&self) -> Result<(), EngineError> {
        self.send(EngineMessage::Stop)
    }
}

struct EncounterService {
    machine: EncounterStateMachine,
    settings: Arc<dyn SettingsStore>,
    recorder: Arc<dyn Recorder>,
    queue: Arc<dyn VideoQueue>,
    overrun_sender: mpsc::UnboundedSender<u64>,
    session: Option<RecordingSession>,
    finalizers: JoinSet<()>,
}

pub fn spawn_service(
    settings: Arc<dyn SettingsStore>,
    recorder: Arc<dyn Recorder>,
    queue: Arc<dyn VideoQueue>,
) -> (ServiceHandle, JoinHandle<()>) {
    let (sender, mailbox) = mpsc::unbounded_channel::<EngineMessage>();
    let (overrun_sender, overrun_receiver) = mpsc::unbounded_channel::<u64>();

    let service = EncounterService {
        machine: EncounterStateMachine::new(settings.clone()),
        settings,
        recorder,
        queue,
        overrun_sender,
        session: None,
        finalizers: JoinSet::new(),
    };

    let task = tokio::spawn(service.run(mailbox, overrun_receiver));
    (ServiceHandle { sender }, task)
}

impl EncounterService {
    async fn run(
        mut self,
        mut mailbox: mpsc::UnboundedReceiver<EngineMessage>,
        mut overrun_receiver: mpsc::UnboundedReceiver<u64>,
    ) {
        tracing::info!("Encounter service started");

        loop {
            tokio::select! {
                message = mailbox.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    self.handle_message(message).await;
                }
                Some(generation) = overrun_receiver.recv() => {
                    self.machine.overrun_elapsed(generation);
                }
                Some(join_result) = self.finalizers.join_next(), if !self.finalizers.is_empty() => {
                    if let Err(error) = join_result {
                        tracing::error!(join_error = %error, "Finalize task failed");
                    }
                }
            }
        }

        while let Some(join_result) = self.finalizers.join_next().await {
            if let Err(error) = join_result {
                tracing::error!(join_error = %error, "Finalize task failed");
            }
        }

        tracing::info!("Encounter service stopped");
    }

    async fn handle_message(&mut self, message: EngineMessage) {
        let now = Utc::now();
        let output = match message {
            EngineMessage::Line(raw_line) => {
                let Some(line) = LogLine::parse(&raw_line) else {
                    return;
                };
                self.machine.handle_line(&line, now)
            }
            EngineMessage::LogLine(line) => self.machine.handle_line(&line, now),
            EngineMessage::CombatData(combat_data) => {
                self.machine.handle_combat_data(&combat_data);
                None
            }
            EngineMessage::Timeout(idle) => self.machine.handle_timeout(idle, now),
            EngineMessage::Stop => match self.machine.force_end(StopReason::StopRequested, now) {
                Ok(activity) => Some(MachineOutput::Ended(activity)),
                Err(error) => {
                    tracing::warn!(stop_error = %error, "Stop requested with no activity");
                    None
                }
            },
        };

        match output {
            Some(MachineOutput::Started { start_date }) => match self.recorder.start().await {
                Ok(session) => {
                    if let Some(previous) = self.session.replace(session) {
                        tracing::warn!(
                            previous_session = previous.0,
                            "Replaced a recording session that never ended"
                        );
                    }
                }
                Err(error) => {
                    tracing::error!(
                        start_date = %start_date,
                        recorder_error = %error,
                        "Error starting activity"
                    );
                    self.machine.abandon_activity();
                }
            },
            Some(MachineOutput::Ended(activity)) => {
                let Some(session) = self.session.take() else {
                    tracing::warn!("Activity ended without a recording session, discarding video");
                    return;
                };
                self.spawn_finalize(*activity, session);
            }
            None => {}
        }
    }

    fn spawn_finalize(&mut self, activity: Activity, session: RecordingSession) {
        let generation = self.machine.generation();
        let settings = self.settings.clone();
        let recorder = self.recorder.clone();
        let queue = self.queue.clone();
        let overrun_sender = self.overrun_sender.clone();

        self.finalizers.spawn(async move {
            let finalize = Finalize {
                session,
                generation,
                settings,
                recorder,
                queue,
                overrun_sender,
            };
            match finalize_activity(activity, finalize).await {
                Ok(outcome) => tracing::debug!(outcome = ?outcome, "Finalized activity"),
                Err(error) => tracing::error!(finalize_error = %error, "Failed to queue video"),
            }
        });
    }
}

/// What a finalize task needs besides the activity itself.
pub(crate) struct Finalize {
    /// The recording session opened when the activity started.
    pub session: RecordingSession,
    /// Machine generation of the activity, echoed back when the overrun ends.
    pub generation: u64,
    pub settings: Arc<dyn SettingsStore>,
    pub recorder: Arc<dyn Recorder>,
    pub queue: Arc<dyn VideoQueue>,
    pub overrun_sender: mpsc::UnboundedSender<u64>,
}

/// Waits out the overrun, stops the recorder and queues the video.
/// Every ending activity comes through here.
pub(crate) async fn finalize_activity(
    activity: Activity,
    finalize: Finalize,
) -> Result<FinalizeOutcome, EngineError> {
    let Finalize {
        session,
        generation,
        settings,
        recorder,
        queue,
        overrun_sender,
    } = finalize;

    tracing::info!(category = %activity.category(), "Ending recording video");

    let overrun = activity.overrun();
    if overrun > 0.0 {
        tracing::info!(overrun_seconds = overrun, "Awaiting overrun");
        tokio::time::sleep(Duration::from_secs_f64(overrun)).await;
        tracing::info!("Done awaiting overrun");
        if overrun_sender.send(generation).is_err() {
            tracing::debug!("Encounter service gone before overrun completed");
        }
    }

    let source = match recorder.stop(session).await {
        Ok(source) => source,
        Err(error) => {
            tracing::error!(recorder_error = %error, "Failed to stop recorder, discarding video");
            return Ok(FinalizeOutcome::RecorderStopFailed);
        }
    };

    let metadata = match activity.metadata() {
        Ok(metadata) => metadata,
        Err(error) => {
            tracing::warn!(metadata_error = %error, "Discarding video as failed to get metadata");
            return Ok(FinalizeOutcome::MissingMetadata);
        }
    };

    let duration = metadata.duration;
    match activity.category() {
        VideoCategory::Raids => {
            let min_duration = settings.settings().min_encounter_duration as f64;
            if duration < min_duration {
                tracing::info!(
                    duration_seconds = duration,
                    min_duration_seconds = min_duration,
                    "Discarding raid encounter, too short"
                );
                return Ok(FinalizeOutcome::TooShort);
            }
        }
    }

    let offset = (activity.start_date() - source.started_at).num_milliseconds() as f64 / 1000.0;
    let item = VideoQueueItem {
        source: source.file,
        suffix: activity.file_name(),
        offset,
        duration,
        metadata,
        delete_source: true,
    };

    queue.queue_video(item).await?;
    Ok(FinalizeOutcome::Queued)
}
