use crate::activity::Enemy;

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub result: bool,
    pub fight_percentage: f64,
    /// Replacement encounter name, `None` keeps the current one.
    pub encounter_name: Option<String>,
    pub boss_count: usize,
}

/// Decides kill or wipe from the enemies seen during an encounter.
///
/// `enemies` must be in first-seen order: every tie goes to the earlier enemy.
/// A boss is any enemy holding at least `threshold` of the summed max health.
pub fn evaluate_outcome(enemies: &[&Enemy], threshold: f64) -> Outcome {
    let total_max_health: u64 = enemies
        .iter()
        .filter_map(|enemy| enemy.max_health())
        .sum();

    let bosses: Vec<&Enemy> = enemies
        .iter()
        .copied()
        .filter(|enemy| {
            enemy
                .max_health()
                .map(|max_health| {
                    max_health > 0 && max_health as f64 >= threshold * total_max_health as f64
                })
                .unwrap_or(false)
        })
        .collect();

    let mut highest_remaining: Option<(f64, &Enemy)> = None;
    for boss in bosses.iter().copied() {
        let Some(percentage) = boss.health_percentage() else {
            continue;
        };
        if percentage == 100.0 {
            continue;
        }

        if highest_remaining
            .map(|(highest, _)| percentage > highest)
            .unwrap_or(true)
        {
            highest_remaining = Some((percentage, boss));
        }
    }

    let fight_percentage = highest_remaining
        .map(|(percentage, _)| (percentage * 100.0).round() / 100.0)
        .unwrap_or(0.0);
    let mut encounter_name = highest_remaining.map(|(_, boss)| boss.name().to_string());

    let result = !bosses.is_empty() && bosses.iter().all(|boss| boss.is_dead());

    if result {
        let mut biggest: Option<&Enemy> = None;
        for boss in bosses.iter().copied() {
            let is_bigger = biggest
                .map(|current| boss.max_health() > current.max_health())
                .unwrap_or(true);
            if is_bigger {
                biggest = Some(boss);
            }
        }
        if let Some(boss) = biggest {
            encounter_name = Some(boss.name().to_string());
        }
    }

    Outcome {
        result,
        fight_percentage,
        encounter_name,
        boss_count: bosses.len(),
    }
}
