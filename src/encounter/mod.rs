mod outcome;
mod registry;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::activity::{Activity, ActivityKind, Combatant, Flavour};
use crate::combat_log::feed::{CombatData, SELF_COMBATANT_NAME};
use crate::combat_log::parser::{
    is_likely_enemy, is_player, parse_event, LogEvent, LogLine, ParsedEvent, Unit,
};
use crate::error::EngineError;
use crate::settings::SettingsStore;

pub use outcome::{evaluate_outcome, Outcome};
use registry::EnemyRegistry;

const UNKNOWN_ENCOUNTER_NAME: &str = "Unknown Encounter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterState {
    Idle,
    InCombat,
    Overrunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    IdleTimeout(Duration),
    PartySizeExceeded,
    PartialParty,
    ZoneChanged,
    StopRequested,
}

#[derive(Debug)]
pub enum MachineOutput {
    /// A new activity started; recording should begin.
    Started { start_date: DateTime<Utc> },
    /// The activity ended and was moved out of the machine.
    Ended(Box<Activity>),
}

/// Turns parsed log events into activities.
///
/// Owns the current activity and the enemy registry. Every input is handled
/// to completion before the next one, so no locking is needed inside.
pub struct EncounterStateMachine {
    settings: Arc<dyn SettingsStore>,
    state: EncounterState,
    activity: Option<Activity>,
    enemies: EnemyRegistry,
    last_sweep: Option<DateTime<Utc>>,
    generation: u64,
    player_id: Option<String>,
    player_name: Option<String>,
    zone_id: Option<u32>,
    zone_name: Option<String>,
}

impl EncounterStateMachine {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        let snapshot = settings.settings();
        if let Some(player_name) = snapshot.player_name.as_deref() {
            tracing::info!(player_name = %player_name, "Restored last known player");
        }
        if let Some(zone_name) = snapshot.zone_name.as_deref() {
            tracing::info!(zone_name = %zone_name, "Restored last known zone");
        }

        Self {
            settings,
            state: EncounterState::Idle,
            activity: None,
            enemies: EnemyRegistry::default(),
            last_sweep: None,
            generation: 0,
            player_id: snapshot.player_id,
            player_name: snapshot.player_name,
            zone_id: snapshot.zone_id,
            zone_name: snapshot.zone_name,
        }
    }

    pub fn state(&self) -> EncounterState {
        self.state
    }

    pub fn activity(&self) -> Option<&Activity> {
        self.activity.as_ref()
    }

    /// Counts activities started so far. The value identifies the current or
    /// most recently ended activity.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn enemy_count(&self) -> usize {
        self.enemies.len()
    }

    pub fn zone_name(&self) -> Option<&str> {
        self.zone_name.as_deref()
    }

    pub fn player_name(&self) -> Option<&str> {
        self.player_name.as_deref()
    }

    pub fn handle_line(&mut self, line: &LogLine, now: DateTime<Utc>) -> Option<MachineOutput> {
        let parsed = parse_event(line)?;
        self.handle_event(parsed, now)
    }

    pub fn handle_event(&mut self, parsed: ParsedEvent, now: DateTime<Utc>) -> Option<MachineOutput> {
        let event_time = parsed.timestamp.unwrap_or(now);

        if self.state == EncounterState::InCombat {
            self.sweep_if_due(event_time);
        }

        match parsed.event {
            LogEvent::CombatFlag { in_combat: true } => self.handle_combat_start(event_time),
            LogEvent::CombatFlag { in_combat: false } => self.handle_combat_clear(event_time),
            LogEvent::PrimaryPlayer { id, name } => {
                self.handle_primary_player(id, name);
                None
            }
            LogEvent::ZoneChange { zone_id, zone_name } => {
                self.handle_zone_change(zone_id, zone_name, event_time)
            }
            LogEvent::UnitAdded(unit) => {
                if self.activity.is_some() {
                    self.enemies.unmark(&unit.id, event_time);
                }
                None
            }
            LogEvent::UnitRemoved {
                unit,
                health,
                max_health,
            } => {
                if self.activity.is_some() {
                    self.enemies
                        .remove_or_mark(&unit.id, health, max_health, event_time);
                }
                None
            }
            LogEvent::UnitPreDamage {
                source,
                source_owner,
                target,
                target_health,
                target_max_health,
            } => self.handle_pre_damage(
                source,
                source_owner,
                target,
                target_health,
                target_max_health,
                event_time,
            ),
            LogEvent::UnitDamage {
                unit,
                health,
                max_health,
            } => self.handle_damage(unit, health, max_health, event_time),
            LogEvent::UnitDied(unit) => {
                self.handle_unit_died(unit, event_time);
                None
            }
        }
    }

    pub fn handle_combat_data(&mut self, combat_data: &CombatData) {
        let Some(activity) = self.activity.as_mut() else {
            return;
        };

        tracing::debug!(
            encounter_title = %combat_data.encounter_title,
            active = combat_data.active,
            combatant_count = combat_data.combatants.len(),
            "Received combat data"
        );

        for entry in &combat_data.combatants {
            if entry.name == SELF_COMBATANT_NAME {
                activity.update_you(&entry.job);
            } else {
                activity.fill_job_by_name(&entry.name, &entry.job);
            }
        }
    }

    /// The log went quiet. The activity is ended as of the last line seen.
    pub fn handle_timeout(&mut self, idle: Duration, now: DateTime<Utc>) -> Option<MachineOutput> {
        tracing::info!(
            idle_seconds = idle.as_secs(),
            "Haven't received combat log data in a while"
        );

        if self.activity.is_none() {
            return None;
        }

        let idle_window = chrono::Duration::from_std(idle).unwrap_or(chrono::Duration::zero());
        self.end_forced(StopReason::IdleTimeout(idle), now - idle_window)
    }

    /// Ends the current activity as a wipe with no overrun.
    pub fn force_end(
        &mut self,
        reason: StopReason,
        end_date: DateTime<Utc>,
    ) -> Result<Box<Activity>, EngineError> {
        let Some(mut activity) = self.activity.take() else {
            return Err(EngineError::InvalidTransition(
                "force end requested without an activity",
            ));
        };

        tracing::info!(reason = ?reason, "Force ending activity");
        activity.set_overrun(0.0);
        activity.end(end_date, false)?;

        self.enemies.clear();
        self.state = EncounterState::Idle;
        Ok(Box::new(activity))
    }

    /// Called once the overrun of the activity from `generation` has elapsed.
    /// Completions from older activities leave the state alone.
    pub fn overrun_elapsed(&mut self, generation: u64) {
        if generation != self.generation {
            tracing::debug!(
                generation,
                current_generation = self.generation,
                "Ignoring overrun completion of an older activity"
            );
            return;
        }

        if self.state == EncounterState::Overrunning {
            self.state = EncounterState::Idle;
        }
    }

    /// Drops the current activity without producing an output, e.g. when the
    /// recorder failed to start.
    pub fn abandon_activity(&mut self) {
        if self.activity.take().is_some() {
            tracing::warn!("Abandoned current activity");
        }
        self.enemies.clear();
        self.state = EncounterState::Idle;
    }

    fn end_forced(&mut self, reason: StopReason, end_date: DateTime<Utc>) -> Option<MachineOutput> {
        match self.force_end(reason, end_date) {
            Ok(activity) => Some(MachineOutput::Ended(activity)),
            Err(error) => {
                tracing::error!(force_end_error = %error, "Failed to force end activity");
                None
            }
        }
    }

    fn handle_combat_start(&mut self, event_time: DateTime<Utc>) -> Option<MachineOutput> {
        if self.state == EncounterState::InCombat {
            return None;
        }

        let settings = self.settings.settings();
        let encounter_name = self
            .zone_name
            .clone()
            .unwrap_or_else(|| UNKNOWN_ENCOUNTER_NAME.to_string());
        let mut activity = Activity::raid(event_time, encounter_name, Flavour::Ffxiv);

        if !settings.allows_category(activity.category()) {
            tracing::info!(category = %activity.category(), "Not configured to record");
            return None;
        }

        activity.set_zone_id(self.zone_id);
        if let (Some(player_id), Some(player_name)) = (&self.player_id, &self.player_name) {
            activity.add_combatant(Combatant::with_name(player_id, player_name));
            activity.set_player_guid(player_id);
        }

        tracing::info!(
            category = %activity.category(),
            encounter_name = %activity.encounter_name(),
            "Start recording a video"
        );

        self.enemies.clear();
        self.last_sweep = None;
        self.generation += 1;
        self.activity = Some(activity);
        self.state = EncounterState::InCombat;
        Some(MachineOutput::Started {
            start_date: event_time,
        })
    }

    fn handle_combat_clear(&mut self, event_time: DateTime<Utc>) -> Option<MachineOutput> {
        if self.state != EncounterState::InCombat {
            return None;
        }

        let Some(mut activity) = self.activity.take() else {
            tracing::info!("Encounter stop with no active encounter");
            self.state = EncounterState::Idle;
            return None;
        };

        let settings = self.settings.settings();
        self.enemies.sweep(event_time);
        let enemies = self.enemies.ordered();
        tracing::info!(enemy_count = enemies.len(), "Evaluating encounter outcome");
        let outcome = evaluate_outcome(&enemies, settings.boss_health_threshold);

        let ActivityKind::Raid(raid) = activity.kind_mut();
        raid.fight_percentage = outcome.fight_percentage;
        if let Some(encounter_name) = outcome.encounter_name {
            raid.encounter_name = encounter_name;
        }

        if outcome.result {
            activity.set_overrun(settings.raid_overrun as f64);
        }

        if let Err(error) = activity.end(event_time, outcome.result) {
            tracing::error!(end_error = %error, "Failed to end activity");
        }

        tracing::info!(
            encounter_name = %activity.encounter_name(),
            kill = outcome.result,
            boss_count = outcome.boss_count,
            fight_percentage = outcome.fight_percentage,
            "Encounter ended"
        );

        self.enemies.clear();
        self.state = if activity.overrun() > 0.0 {
            EncounterState::Overrunning
        } else {
            EncounterState::Idle
        };
        Some(MachineOutput::Ended(Box::new(activity)))
    }

    fn handle_primary_player(&mut self, id: String, name: String) {
        tracing::info!(player_name = %name, "Primary player changed");

        if let Some(activity) = self.activity.as_mut() {
            if activity.player_guid().is_none() {
                activity.add_combatant(Combatant::with_name(&id, &name));
                activity.set_player_guid(&id);
            }
        }

        self.player_id = Some(id.clone());
        self.player_name = Some(name.clone());
        self.persist(&mut |settings| {
            settings.player_id = Some(id.clone());
            settings.player_name = Some(name.clone());
        });
    }

    fn handle_zone_change(
        &mut self,
        zone_id: Option<u32>,
        zone_name: String,
        event_time: DateTime<Utc>,
    ) -> Option<MachineOutput> {
        tracing::info!(zone_name = %zone_name, zone_id = ?zone_id, "Map change");

        let changed = match (zone_id, self.zone_id) {
            (Some(new_id), Some(old_id)) => new_id != old_id,
            _ => self.zone_name.as_deref() != Some(zone_name.as_str()),
        };

        self.zone_id = zone_id;
        self.zone_name = Some(zone_name.clone());
        self.persist(&mut |settings| {
            settings.zone_id = zone_id;
            settings.zone_name = Some(zone_name.clone());
        });

        if changed && self.state == EncounterState::InCombat && self.activity.is_some() {
            return self.end_forced(StopReason::ZoneChanged, event_time);
        }

        None
    }

    fn handle_pre_damage(
        &mut self,
        source: Option<Unit>,
        source_owner: Option<String>,
        target: Unit,
        target_health: Option<u64>,
        target_max_health: Option<u64>,
        event_time: DateTime<Utc>,
    ) -> Option<MachineOutput> {
        self.activity.as_ref()?;

        let source_is_player = source
            .as_ref()
            .map(|unit| is_player(&unit.id, None))
            .unwrap_or(false);

        if is_likely_enemy(&target.id) {
            self.enemies.observe(
                &target.id,
                &target.name,
                target_health,
                target_max_health,
                source_is_player,
            );
        }

        let source = source?;
        if !is_player(&source.id, source_owner.as_deref()) {
            return None;
        }

        self.check_combatant(&source, event_time)
    }

    fn handle_damage(
        &mut self,
        unit: Unit,
        health: Option<u64>,
        max_health: Option<u64>,
        event_time: DateTime<Utc>,
    ) -> Option<MachineOutput> {
        self.activity.as_ref()?;

        if is_likely_enemy(&unit.id) {
            self.enemies
                .observe(&unit.id, &unit.name, health, max_health, true);
            return None;
        }

        if is_player(&unit.id, None) {
            return self.check_combatant(&unit, event_time);
        }

        None
    }

    /// Registers players seen early in the encounter and stops recordings that
    /// do not look like a full party.
    fn check_combatant(&mut self, unit: &Unit, event_time: DateTime<Utc>) -> Option<MachineOutput> {
        let settings = self.settings.settings();
        let activity = self.activity.as_mut()?;

        if event_time - activity.start_date() >= settings.combatant_discovery_window() {
            return None;
        }

        if activity.combatant(&unit.id).is_some() {
            if settings.require_full_party && activity.player_count() < settings.max_party_size {
                tracing::info!(
                    player_count = activity.player_count(),
                    "Force stopping, party is not full"
                );
                return self.end_forced(StopReason::PartialParty, event_time);
            }
            return None;
        }

        activity.add_combatant(Combatant::with_name(&unit.id, &unit.name));
        tracing::debug!(combatant_name = %unit.name, "Added combatant");

        if activity.player_guid().is_none() && self.player_name.as_deref() == Some(unit.name.as_str())
        {
            activity.set_player_guid(&unit.id);
        }

        if activity.player_count() > settings.max_party_size {
            tracing::info!(
                player_count = activity.player_count(),
                max_party_size = settings.max_party_size,
                "Stopped recording because player count exceeded maximum allowed"
            );
            return self.end_forced(StopReason::PartySizeExceeded, event_time);
        }

        None
    }

    fn handle_unit_died(&mut self, unit: Unit, event_time: DateTime<Utc>) {
        let Some(activity) = self.activity.as_mut() else {
            return;
        };

        let combatant_name = activity
            .combatant(&unit.id)
            .or_else(|| activity.combatant_by_name(&unit.name))
            .map(|combatant| combatant.name().unwrap_or(unit.name.as_str()).to_string());

        if let Some(name) = combatant_name {
            let death = activity.death_at(name, event_time - chrono::Duration::seconds(1));
            activity.add_death(death);
            return;
        }

        self.enemies.mark_dead(&unit.id);
    }

    fn sweep_if_due(&mut self, event_time: DateTime<Utc>) {
        let due = self
            .last_sweep
            .map(|last_sweep| event_time - last_sweep >= chrono::Duration::seconds(1))
            .unwrap_or(true);
        if !due {
            return;
        }

        let removed = self.enemies.sweep(event_time);
        if removed > 0 {
            tracing::debug!(removed, "Swept enemies marked for removal");
        }
        self.last_sweep = Some(event_time);
    }

    fn persist(&self, apply: &mut dyn FnMut(&mut crate::settings::RecorderSettings)) {
        if let Err(error) = self.settings.update(apply) {
            tracing::warn!(settings_error = %error, "Failed to persist settings");
        }
    }
}
