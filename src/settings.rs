use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::activity::VideoCategory;
use crate::error::EngineError;

const MAX_RAID_OVERRUN_SECONDS: u64 = 60;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    #[serde(rename = "recordFFXIV")]
    pub record_ffxiv: bool,
    pub record_raids: bool,
    pub min_encounter_duration: u64,
    pub raid_overrun: u64,
    pub boss_health_threshold: f64,
    pub idle_timeout_seconds: u64,
    pub max_party_size: usize,
    pub require_full_party: bool,
    pub combatant_discovery_seconds: u64,
    pub log_file_prefix: String,
    pub log_file_extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_millis: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            record_ffxiv: true,
            record_raids: true,
            min_encounter_duration: 15,
            raid_overrun: 15,
            boss_health_threshold: 0.3,
            idle_timeout_seconds: 120,
            max_party_size: 8,
            require_full_party: false,
            combatant_discovery_seconds: 10,
            log_file_prefix: "Network_".to_string(),
            log_file_extension: "log".to_string(),
            poll_interval_millis: None,
            player_id: None,
            player_name: None,
            zone_id: None,
            zone_name: None,
        }
    }
}

impl RecorderSettings {
    /// Clamps values the settings form would have rejected.
    pub fn normalized(mut self) -> Self {
        self.raid_overrun = self.raid_overrun.min(MAX_RAID_OVERRUN_SECONDS);

        if !self.boss_health_threshold.is_finite()
            || self.boss_health_threshold <= 0.0
            || self.boss_health_threshold > 1.0
        {
            self.boss_health_threshold = Self::default().boss_health_threshold;
        }

        if self.max_party_size == 0 {
            self.max_party_size = Self::default().max_party_size;
        }

        self
    }

    /// Both the game toggle and the category toggle must be on.
    pub fn allows_category(&self, category: VideoCategory) -> bool {
        if !self.record_ffxiv {
            return false;
        }

        match category {
            VideoCategory::Raids => self.record_raids,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds.max(1))
    }

    pub fn combatant_discovery_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.combatant_discovery_seconds as i64)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_millis
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }
}

/// Read/write key-value access to the recorder configuration.
pub trait SettingsStore: Send + Sync {
    fn settings(&self) -> RecorderSettings;

    fn update(&self, apply: &mut dyn FnMut(&mut RecorderSettings)) -> Result<(), EngineError>;
}

/// Settings persisted as a JSON document next to the application data.
pub struct JsonSettingsStore {
    path: PathBuf,
    settings: Mutex<RecorderSettings>,
}

impl JsonSettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let settings = read_settings_file(&path)?.unwrap_or_default().normalized();

        Ok(Self {
            path,
            settings: Mutex::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn settings(&self) -> RecorderSettings {
        match self.settings.lock() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, apply: &mut dyn FnMut(&mut RecorderSettings)) -> Result<(), EngineError> {
        let snapshot = {
            let mut settings = self
                .settings
                .lock()
                .map_err(|error| EngineError::Settings(error.to_string()))?;
            apply(&mut settings);
            settings.clone()
        };

        write_settings_file(&self.path, &snapshot)
    }
}

#[derive(Default)]
pub struct InMemorySettingsStore {
    settings: Mutex<RecorderSettings>,
}

impl InMemorySettingsStore {
    pub fn new(settings: RecorderSettings) -> Self {
        Self {
            settings: Mutex::new(settings.normalized()),
        }
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn settings(&self) -> RecorderSettings {
        match self.settings.lock() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, apply: &mut dyn FnMut(&mut RecorderSettings)) -> Result<(), EngineError> {
        let mut settings = self
            .settings
            .lock()
            .map_err(|error| EngineError::Settings(error.to_string()))?;
        apply(&mut settings);
        Ok(())
    }
}

fn read_settings_file(path: &Path) -> Result<Option<RecorderSettings>, EngineError> {
    let raw_json = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(EngineError::io(path, error)),
    };

    let settings = serde_json::from_str::<RecorderSettings>(&raw_json).map_err(|error| {
        EngineError::Settings(format!(
            "Failed to parse settings '{}': {error}",
            path.display()
        ))
    })?;

    Ok(Some(settings))
}

fn write_settings_file(path: &Path, settings: &RecorderSettings) -> Result<(), EngineError> {
    if let Some(parent_directory) = path.parent() {
        if !parent_directory.as_os_str().is_empty() {
            std::fs::create_dir_all(parent_directory)
                .map_err(|error| EngineError::io(parent_directory, error))?;
        }
    }

    let serialized = serde_json::to_string_pretty(settings)?;
    crate::recording::write_atomically(path, serialized.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::{InMemorySettingsStore, JsonSettingsStore, RecorderSettings, SettingsStore};
    use crate::activity::VideoCategory;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_directory() -> std::path::PathBuf {
        let timestamp_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let process_id = std::process::id();
        std::env::temp_dir().join(format!(
            "xivpov_settings_test_{process_id}_{timestamp_nanos}"
        ))
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let settings = serde_json::from_str::<RecorderSettings>(r#"{"raidOverrun": 30}"#)
            .expect("Expected partial settings to parse");

        assert_eq!(settings.raid_overrun, 30);
        assert_eq!(settings.max_party_size, 8);
        assert_eq!(settings.min_encounter_duration, 15);
        assert!(settings.record_raids);
    }

    #[test]
    fn normalizes_out_of_range_values() {
        let settings = RecorderSettings {
            raid_overrun: 600,
            boss_health_threshold: 4.0,
            max_party_size: 0,
            ..RecorderSettings::default()
        }
        .normalized();

        assert_eq!(settings.raid_overrun, 60);
        assert_eq!(settings.boss_health_threshold, 0.3);
        assert_eq!(settings.max_party_size, 8);
    }

    #[test]
    fn persists_player_identity_across_reopen() {
        let temp_directory = unique_temp_directory();
        let settings_path = temp_directory.join("settings.json");

        let store = JsonSettingsStore::open(&settings_path).expect("Expected settings to open");
        store
            .update(&mut |settings| {
                settings.player_id = Some("10AB12CD".to_string());
                settings.player_name = Some("Alphinaud Leveilleur".to_string());
                settings.zone_name = Some("The Omphalos".to_string());
            })
            .expect("Expected settings update to persist");

        let reopened =
            JsonSettingsStore::open(&settings_path).expect("Expected settings to reopen");
        let settings = reopened.settings();
        assert_eq!(settings.player_id.as_deref(), Some("10AB12CD"));
        assert_eq!(settings.player_name.as_deref(), Some("Alphinaud Leveilleur"));
        assert_eq!(settings.zone_name.as_deref(), Some("The Omphalos"));

        std::fs::remove_dir_all(&temp_directory)
            .expect("Failed to remove temporary settings test directory");
    }

    #[test]
    fn in_memory_store_applies_updates() {
        let store = InMemorySettingsStore::new(RecorderSettings::default());
        store
            .update(&mut |settings| settings.record_raids = false)
            .expect("Expected in-memory update to succeed");

        assert!(!store.settings().record_raids);
    }

    #[test]
    fn game_toggle_gates_every_category() {
        let settings: RecorderSettings =
            serde_json::from_str(r#"{"recordFFXIV": false, "recordRaids": true}"#)
                .expect("Expected settings to parse");
        assert!(!settings.record_ffxiv);
        assert!(!settings.allows_category(VideoCategory::Raids));

        let settings = RecorderSettings {
            record_raids: false,
            ..RecorderSettings::default()
        };
        assert!(!settings.allows_category(VideoCategory::Raids));
        assert!(RecorderSettings::default().allows_category(VideoCategory::Raids));
    }
}
