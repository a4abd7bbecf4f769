use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::activity::{Flavour, PlayerDeath, RawCombatant, VideoCategory};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub category: VideoCategory,
    pub flavour: Flavour,
    pub encounter_name: String,
    #[serde(rename = "zoneID", skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<u32>,
    pub result: bool,
    pub fight_percentage: f64,
    #[serde(default)]
    pub deaths: Vec<PlayerDeath>,
    #[serde(default)]
    pub combatants: Vec<RawCombatant>,
    pub player: RawCombatant,
    pub duration: f64,
    pub overrun: f64,
    /// Activity start, milliseconds since the Unix epoch.
    pub start: i64,
    pub unique_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoQueueItem {
    pub source: PathBuf,
    pub suffix: String,
    /// Seconds between the start of the recording buffer and the activity.
    pub offset: f64,
    pub duration: f64,
    pub metadata: Metadata,
    pub delete_source: bool,
}

pub(crate) fn metadata_sidecar_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("meta.json")
}

pub(crate) fn write_queue_item(item: &VideoQueueItem) -> Result<PathBuf, EngineError> {
    let sidecar_path = metadata_sidecar_path(&item.source);
    if let Some(parent_directory) = sidecar_path.parent() {
        if !parent_directory.as_os_str().is_empty() {
            std::fs::create_dir_all(parent_directory)
                .map_err(|error| EngineError::io(parent_directory, error))?;
        }
    }

    let serialized = serde_json::to_string_pretty(item)?;
    super::write_atomically(&sidecar_path, serialized.as_bytes())?;
    Ok(sidecar_path)
}
