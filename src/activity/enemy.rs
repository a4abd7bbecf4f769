use chrono::{DateTime, Duration, Utc};

/// Marks younger than this are cancelled when the unit shows up again.
pub const UNMARK_GRACE: Duration = Duration::seconds(3);

/// Marks older than this are swept from the registry.
pub const REMOVAL_DELAY: Duration = Duration::seconds(10);

/// A hostile NPC seen during the current encounter.
#[derive(Debug, Clone, PartialEq)]
pub struct Enemy {
    id: String,
    name: String,
    health: Option<u64>,
    max_health: Option<u64>,
    dead: bool,
    marked_for_removal: Option<DateTime<Utc>>,
    sequence: u64,
}

impl Enemy {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        health: Option<u64>,
        max_health: Option<u64>,
        sequence: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            health,
            max_health,
            dead: false,
            marked_for_removal: None,
            sequence,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn health(&self) -> Option<u64> {
        self.health
    }

    pub fn max_health(&self) -> Option<u64> {
        self.max_health
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Order in which the enemy was first seen during the encounter.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn marked_for_removal(&self) -> Option<DateTime<Utc>> {
        self.marked_for_removal
    }

    pub(crate) fn set_dead(&mut self) {
        self.dead = true;
    }

    pub(crate) fn update_health(&mut self, health: u64, max_health: u64) {
        self.health = Some(health);
        self.max_health = Some(max_health);
    }

    pub(crate) fn mark_for_removal(&mut self, now: DateTime<Utc>) {
        self.marked_for_removal = Some(now);
    }

    /// Returns true when a recent mark was cancelled.
    pub(crate) fn unmark(&mut self, now: DateTime<Utc>) -> bool {
        match self.marked_for_removal {
            Some(marked_at) if now - marked_at < UNMARK_GRACE => {
                self.marked_for_removal = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_removal_due(&self, now: DateTime<Utc>) -> bool {
        self.marked_for_removal
            .map(|marked_at| now - marked_at > REMOVAL_DELAY)
            .unwrap_or(false)
    }

    /// Remaining health in percent, when both values are known and max is positive.
    pub fn health_percentage(&self) -> Option<f64> {
        let health = self.health?;
        let max_health = self.max_health.filter(|max| *max > 0)?;
        Some(health as f64 * 100.0 / max_health as f64)
    }
}
