use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::activity::Enemy;

/// Enemies of the current encounter, keyed by unit id.
#[derive(Debug, Default)]
pub(crate) struct EnemyRegistry {
    enemies: HashMap<String, Enemy>,
    next_sequence: u64,
}

impl EnemyRegistry {
    pub(crate) fn clear(&mut self) {
        self.enemies.clear();
        self.next_sequence = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.enemies.len()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Enemy> {
        self.enemies.get(id)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.enemies.contains_key(id)
    }

    /// Adds the enemy on first sighting. Health of a known enemy is only
    /// overwritten when both values are present.
    pub(crate) fn observe(
        &mut self,
        id: &str,
        name: &str,
        health: Option<u64>,
        max_health: Option<u64>,
        create: bool,
    ) {
        if let Some(enemy) = self.enemies.get_mut(id) {
            if let (Some(health), Some(max_health)) = (health, max_health) {
                enemy.update_health(health, max_health);
            }
            return;
        }

        if !create || name.is_empty() {
            return;
        }

        tracing::debug!(enemy_id = %id, enemy_name = %name, "Enemy added");
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.enemies.insert(
            id.to_string(),
            Enemy::new(id, name, health, max_health, sequence),
        );
    }

    /// Full-health units leave at once, anything else is marked and swept later.
    pub(crate) fn remove_or_mark(
        &mut self,
        id: &str,
        health: Option<u64>,
        max_health: Option<u64>,
        now: DateTime<Utc>,
    ) {
        let Some(enemy) = self.enemies.get_mut(id) else {
            return;
        };

        if health.is_some() && health == max_health {
            tracing::debug!(enemy_id = %id, enemy_name = %enemy.name(), "Removed enemy");
            self.enemies.remove(id);
            return;
        }

        enemy.mark_for_removal(now);
    }

    pub(crate) fn unmark(&mut self, id: &str, now: DateTime<Utc>) {
        if let Some(enemy) = self.enemies.get_mut(id) {
            if enemy.unmark(now) {
                tracing::debug!(enemy_id = %id, enemy_name = %enemy.name(), "Unmarked enemy");
            }
        }
    }

    /// Marks a known enemy dead. Returns false for unknown ids.
    pub(crate) fn mark_dead(&mut self, id: &str) -> bool {
        let Some(enemy) = self.enemies.get_mut(id) else {
            return false;
        };

        tracing::debug!(enemy_id = %id, enemy_name = %enemy.name(), "Enemy dead");
        enemy.set_dead();
        true
    }

    /// Deletes every enemy whose removal mark has expired.
    pub(crate) fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.enemies.len();
        self.enemies.retain(|_, enemy| !enemy.is_removal_due(now));
        before - self.enemies.len()
    }

    /// Enemies in first-seen order.
    pub(crate) fn ordered(&self) -> Vec<&Enemy> {
        let mut enemies: Vec<&Enemy> = self.enemies.values().collect();
        enemies.sort_by_key(|enemy| enemy.sequence());
        enemies
    }
}

#[cfg(test)]
mod tests {
    use super::EnemyRegistry;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn observe_creates_once_and_updates_health_when_valid() {
        let mut registry = EnemyRegistry::default();
        registry.observe("40000001", "Titania", Some(100), Some(100), true);
        registry.observe("40000001", "Titania", None, Some(100), true);
        assert_eq!(registry.get("40000001").and_then(|e| e.health()), Some(100));

        registry.observe("40000001", "Titania", Some(40), Some(100), true);
        assert_eq!(registry.get("40000001").and_then(|e| e.health()), Some(40));

        registry.observe("40000002", "Pixie", Some(1), Some(1), false);
        assert!(!registry.contains("40000002"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn full_health_removal_is_immediate_otherwise_swept_after_delay() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0).unwrap();
        let mut registry = EnemyRegistry::default();
        registry.observe("40000001", "Untouched Add", Some(500), Some(500), true);
        registry.observe("40000002", "Wounded Add", Some(250), Some(500), true);

        registry.remove_or_mark("40000001", Some(500), Some(500), now);
        registry.remove_or_mark("40000002", Some(250), Some(500), now);
        assert!(!registry.contains("40000001"));
        assert!(registry.contains("40000002"));

        assert_eq!(registry.sweep(now + Duration::seconds(5)), 0);
        assert_eq!(registry.sweep(now + Duration::seconds(11)), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn re_added_enemy_survives_sweep_within_grace() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0).unwrap();
        let mut registry = EnemyRegistry::default();
        registry.observe("40000001", "Titania", Some(250), Some(500), true);

        registry.remove_or_mark("40000001", Some(250), Some(500), now);
        registry.unmark("40000001", now + Duration::seconds(2));

        assert_eq!(registry.sweep(now + Duration::seconds(30)), 0);
        assert!(registry.contains("40000001"));
    }

    #[test]
    fn ordered_follows_first_sighting() {
        let mut registry = EnemyRegistry::default();
        for (index, name) in ["Titania", "Mustardseed", "Peaseblossom"].iter().enumerate() {
            registry.observe(&format!("4000000{index}"), name, None, None, true);
        }

        let names: Vec<&str> = registry.ordered().iter().map(|enemy| enemy.name()).collect();
        assert_eq!(names, vec!["Titania", "Mustardseed", "Peaseblossom"]);
        assert!(registry.mark_dead("40000000"));
        assert!(!registry.mark_dead("40009999"));
    }
}
