mod combatant;
mod enemy;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::recording::metadata::Metadata;

pub use combatant::{Combatant, RawCombatant};
pub use enemy::{Enemy, REMOVAL_DELAY, UNMARK_GRACE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCategory {
    #[serde(rename = "Raids")]
    Raids,
}

impl fmt::Display for VideoCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCategory::Raids => f.write_str("Raids"),
        }
    }
}

/// The game variant a log comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flavour {
    #[serde(rename = "FFXIV")]
    Ffxiv,
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavour::Ffxiv => f.write_str("FFXIV"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDeath {
    pub name: String,
    pub spec_id: u32,
    pub date: DateTime<Utc>,
    /// Seconds since the activity started.
    pub timestamp: f64,
    pub friendly: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaidEncounter {
    pub encounter_name: String,
    pub fight_percentage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityKind {
    Raid(RaidEncounter),
}

#[derive(Debug, Clone)]
pub struct Activity {
    category: VideoCategory,
    flavour: Flavour,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    overrun: f64,
    result: bool,
    deaths: Vec<PlayerDeath>,
    combatants: HashMap<String, Combatant>,
    player_guid: Option<String>,
    zone_id: Option<u32>,
    you_found: bool,
    kind: ActivityKind,
}

impl Activity {
    pub fn raid(start_date: DateTime<Utc>, encounter_name: impl Into<String>, flavour: Flavour) -> Self {
        Self {
            category: VideoCategory::Raids,
            flavour,
            start_date,
            end_date: None,
            overrun: 0.0,
            result: false,
            deaths: Vec::new(),
            combatants: HashMap::new(),
            player_guid: None,
            zone_id: None,
            you_found: false,
            kind: ActivityKind::Raid(RaidEncounter {
                encounter_name: encounter_name.into(),
                fight_percentage: 0.0,
            }),
        }
    }

    pub fn category(&self) -> VideoCategory {
        self.category
    }

    pub fn flavour(&self) -> Flavour {
        self.flavour
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    pub fn result(&self) -> bool {
        self.result
    }

    pub fn overrun(&self) -> f64 {
        self.overrun
    }

    pub fn set_overrun(&mut self, seconds: f64) {
        tracing::info!(overrun_seconds = seconds, "Setting activity overrun");
        self.overrun = seconds.max(0.0);
    }

    pub fn deaths(&self) -> &[PlayerDeath] {
        &self.deaths
    }

    pub fn zone_id(&self) -> Option<u32> {
        self.zone_id
    }

    pub fn set_zone_id(&mut self, zone_id: Option<u32>) {
        self.zone_id = zone_id;
    }

    pub fn kind(&self) -> &ActivityKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ActivityKind {
        &mut self.kind
    }

    pub fn encounter_name(&self) -> &str {
        match &self.kind {
            ActivityKind::Raid(raid) => &raid.encounter_name,
        }
    }

    pub fn you_found(&self) -> bool {
        self.you_found
    }

    pub fn player_guid(&self) -> Option<&str> {
        self.player_guid.as_deref()
    }

    /// Sets the player GUID once. The GUID must name a known combatant.
    pub fn set_player_guid(&mut self, guid: &str) -> bool {
        if self.player_guid.is_some() || !self.combatants.contains_key(guid) {
            return false;
        }

        self.player_guid = Some(guid.to_string());
        true
    }

    pub fn player(&self) -> Result<&Combatant, EngineError> {
        let guid = self.player_guid.as_deref().ok_or_else(|| {
            EngineError::FinalizeFailure("Failed to get player combatant, playerGUID not set".into())
        })?;

        self.combatants.get(guid).ok_or_else(|| {
            EngineError::FinalizeFailure("Player not found in combatants".to_string())
        })
    }

    /// Ends the activity. The end date can only be set once.
    pub fn end(&mut self, end_date: DateTime<Utc>, result: bool) -> Result<(), EngineError> {
        if self.end_date.is_some() {
            return Err(EngineError::InvalidTransition("activity already ended"));
        }

        self.end_date = Some(end_date.max(self.start_date));
        self.result = result;
        Ok(())
    }

    /// Seconds from start to end plus the overrun, `None` while in progress.
    pub fn duration(&self) -> Option<f64> {
        let end_date = self.end_date?;
        let base = (end_date - self.start_date).num_milliseconds() as f64 / 1000.0;
        Some(base + self.overrun)
    }

    pub fn player_count(&self) -> usize {
        self.combatants.len()
    }

    pub fn combatant(&self, guid: &str) -> Option<&Combatant> {
        self.combatants.get(guid)
    }

    pub fn combatant_by_name(&self, name: &str) -> Option<&Combatant> {
        self.combatants
            .values()
            .find(|combatant| combatant.name() == Some(name))
    }

    pub fn combatants(&self) -> impl Iterator<Item = &Combatant> {
        self.combatants.values()
    }

    /// Adds a new combatant, or fills in the details of a known one.
    /// Returns true when the combatant was not known before.
    pub fn add_combatant(&mut self, combatant: Combatant) -> bool {
        match self.combatants.get_mut(combatant.guid()) {
            Some(existing) => {
                existing.fill_from(combatant);
                false
            }
            None => {
                self.combatants
                    .insert(combatant.guid().to_string(), combatant);
                true
            }
        }
    }

    pub(crate) fn fill_job_by_name(&mut self, name: &str, job: &str) {
        if let Some(combatant) = self
            .combatants
            .values_mut()
            .find(|combatant| combatant.name() == Some(name) && combatant.job_name().is_none())
        {
            combatant.set_job_name(job);
        }
    }

    /// Fills in the job of the recording player, once.
    pub fn update_you(&mut self, job: &str) {
        if self.you_found {
            return;
        }

        let Some(guid) = self.player_guid.clone() else {
            return;
        };

        if let Some(combatant) = self.combatants.get_mut(&guid) {
            combatant.set_job_name(job);
            self.you_found = combatant.job_name().is_some();
        }
    }

    pub fn add_death(&mut self, death: PlayerDeath) {
        self.deaths.push(death);
    }

    pub fn death_at(&self, name: impl Into<String>, date: DateTime<Utc>) -> PlayerDeath {
        let relative = (date - self.start_date).max(Duration::zero());
        PlayerDeath {
            name: name.into(),
            spec_id: 0,
            date,
            timestamp: relative.num_milliseconds() as f64 / 1000.0,
            friendly: true,
        }
    }

    /// Digest over the fields every observer of the same fight agrees on, used to
    /// correlate independent recordings. Excludes the start time and the player.
    pub fn unique_hash(&self) -> String {
        let deterministic_fields = [
            self.category.to_string(),
            self.flavour.to_string(),
            self.result.to_string(),
        ]
        .join(" ");

        let mut sorted_names: Vec<&str> = self
            .combatants
            .values()
            .filter_map(|combatant| combatant.name())
            .collect();
        sorted_names.sort_unstable();

        let unique_string = format!("{deterministic_fields}{}", sorted_names.join(" "));
        format!("{:x}", md5::compute(unique_string.as_bytes()))
    }

    pub fn file_name(&self) -> String {
        match &self.kind {
            ActivityKind::Raid(raid) if self.result => format!("{} [Kill]", raid.encounter_name),
            ActivityKind::Raid(raid) => format!(
                "{} [Wipe {}%]",
                raid.encounter_name,
                format_percentage(raid.fight_percentage)
            ),
        }
    }

    pub fn metadata(&self) -> Result<Metadata, EngineError> {
        let duration = self.duration().ok_or_else(|| {
            EngineError::FinalizeFailure("Failed to get duration of in-progress activity".into())
        })?;
        let player = self.player()?.raw();

        let (encounter_name, fight_percentage) = match &self.kind {
            ActivityKind::Raid(raid) => (raid.encounter_name.clone(), raid.fight_percentage),
        };

        let mut combatants: Vec<RawCombatant> =
            self.combatants.values().map(Combatant::raw).collect();
        combatants.sort_by(|left, right| left.guid.cmp(&right.guid));

        Ok(Metadata {
            category: self.category,
            flavour: self.flavour,
            encounter_name,
            zone_id: self.zone_id,
            result: self.result,
            fight_percentage,
            deaths: self.deaths.clone(),
            combatants,
            player,
            duration,
            overrun: self.overrun,
            start: self.start_date.timestamp_millis(),
            unique_hash: self.unique_hash(),
        })
    }
}

fn format_percentage(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}")
    } else {
        format!("{rounded}")
    }
}
