use serde::Deserialize;
use std::collections::BTreeMap;

use super::parser::LogLine;
use crate::error::EngineError;

/// Name the overlay feed uses for the recording player.
pub const SELF_COMBATANT_NAME: &str = "YOU";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum FeedMessage {
    LogLine {
        line: Vec<String>,
        #[serde(rename = "rawLine")]
        raw_line: String,
    },
    CombatData {
        #[serde(rename = "Encounter", default)]
        encounter: FeedEncounter,
        #[serde(rename = "Combatant", default)]
        combatants: BTreeMap<String, FeedCombatant>,
        #[serde(rename = "isActive", default)]
        is_active: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedEncounter {
    #[serde(rename = "CurrentZoneName")]
    pub current_zone_name: String,
    pub title: String,
    pub duration: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedCombatant {
    pub name: String,
    #[serde(rename = "Job")]
    pub job: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombatantJob {
    pub name: String,
    pub job: String,
}

/// Party summary pushed by the overlay while an encounter is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombatData {
    pub encounter_title: String,
    pub combatants: Vec<CombatantJob>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedInput {
    Line(LogLine),
    CombatData(CombatData),
}

pub fn decode_feed_message(raw_message: &str) -> Result<FeedInput, EngineError> {
    let message = serde_json::from_str::<FeedMessage>(raw_message).map_err(|error| {
        EngineError::MalformedInput(format!("Failed to decode feed message: {error}"))
    })?;

    match message {
        FeedMessage::LogLine { line, raw_line } => LogLine::from_fields(line, raw_line)
            .map(FeedInput::Line)
            .ok_or_else(|| EngineError::MalformedInput("Feed log line has no opcode".into())),
        FeedMessage::CombatData {
            encounter,
            combatants,
            is_active,
        } => {
            let combatants = combatants
                .into_iter()
                .filter_map(|(key, combatant)| {
                    let job = combatant.job.filter(|job| !job.trim().is_empty())?;
                    let name = if combatant.name.trim().is_empty() {
                        key
                    } else {
                        combatant.name
                    };
                    Some(CombatantJob { name, job })
                })
                .collect();

            Ok(FeedInput::CombatData(CombatData {
                encounter_title: encounter.title,
                combatants,
                active: is_active.eq_ignore_ascii_case("true"),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_feed_message, CombatantJob, FeedInput};
    use crate::error::EngineError;

    #[test]
    fn decodes_log_line_messages() {
        let raw_message = r#"{"type":"LogLine","line":["260","2025-03-01T20:00:00.0000000+00:00","1"],"rawLine":"260|2025-03-01T20:00:00.0000000+00:00|1"}"#;

        let FeedInput::Line(line) =
            decode_feed_message(raw_message).expect("Expected log line to decode")
        else {
            panic!("Expected a log line");
        };

        assert_eq!(line.opcode, "260");
        assert_eq!(line.field(2), Some("1"));
        assert_eq!(line.raw, "260|2025-03-01T20:00:00.0000000+00:00|1");
    }

    #[test]
    fn decodes_combat_data_and_skips_jobless_entries() {
        let raw_message = r#"{
            "type": "CombatData",
            "Encounter": {"CurrentZoneName": "The Omphalos", "title": "Titania", "duration": "01:12"},
            "Combatant": {
                "YOU": {"name": "YOU", "Job": "Rdm", "damage": "1000"},
                "Estinien Varlineau": {"name": "Estinien Varlineau", "Job": "Drg"},
                "Limit Break": {"name": "Limit Break", "Job": ""}
            },
            "isActive": "true"
        }"#;

        let FeedInput::CombatData(combat_data) =
            decode_feed_message(raw_message).expect("Expected combat data to decode")
        else {
            panic!("Expected combat data");
        };

        assert!(combat_data.active);
        assert_eq!(combat_data.encounter_title, "Titania");
        assert_eq!(
            combat_data.combatants,
            vec![
                CombatantJob {
                    name: "Estinien Varlineau".to_string(),
                    job: "Drg".to_string(),
                },
                CombatantJob {
                    name: "YOU".to_string(),
                    job: "Rdm".to_string(),
                },
            ]
        );
    }

    #[test]
    fn rejects_malformed_messages() {
        for raw_message in [
            "not json",
            r#"{"line":["260"]}"#,
            r#"{"type":"Unknown"}"#,
            r#"{"type":"LogLine","line":[],"rawLine":""}"#,
        ] {
            assert!(matches!(
                decode_feed_message(raw_message),
                Err(EngineError::MalformedInput(_))
            ));
        }
    }
}
