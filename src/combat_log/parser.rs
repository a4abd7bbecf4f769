use chrono::{DateTime, Utc};

const FIELD_DELIMITER: char = '|';
const PLAYER_ID_PREFIX: &str = "10";
const ENEMY_ID_PREFIX: &str = "40";

/// One raw line of the network log, split into its ordered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub opcode: String,
    pub fields: Vec<String>,
    pub raw: String,
}

impl LogLine {
    pub fn parse(raw_line: &str) -> Option<Self> {
        let trimmed_line = raw_line.trim();
        if trimmed_line.is_empty() {
            return None;
        }

        let fields = trimmed_line
            .split(FIELD_DELIMITER)
            .map(str::to_string)
            .collect::<Vec<String>>();

        Self::from_fields(fields, trimmed_line)
    }

    /// Builds a line from fields already split by the sender, as the socket feed does.
    pub fn from_fields(fields: Vec<String>, raw_line: impl Into<String>) -> Option<Self> {
        let opcode = fields.first()?.trim().to_string();
        if opcode.is_empty() {
            return None;
        }

        Some(Self {
            opcode,
            fields,
            raw: raw_line.into(),
        })
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw_timestamp = self.field(1)?.trim();
        DateTime::parse_from_rfc3339(raw_timestamp)
            .ok()
            .map(|timestamp| timestamp.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CombatFlag,
    PrimaryPlayer,
    ZoneChange,
    UnitAdded,
    UnitRemoved,
    UnitPreDamage,
    UnitDamage,
    UnitDied,
}

impl EventKind {
    pub fn from_opcode(opcode: &str) -> Option<Self> {
        match opcode {
            "260" => Some(Self::CombatFlag),
            "02" => Some(Self::PrimaryPlayer),
            "01" => Some(Self::ZoneChange),
            "03" => Some(Self::UnitAdded),
            "04" => Some(Self::UnitRemoved),
            "21" | "22" => Some(Self::UnitPreDamage),
            "37" => Some(Self::UnitDamage),
            "25" => Some(Self::UnitDied),
            _ => None,
        }
    }

    /// Minimum number of fields, opcode included.
    pub fn min_fields(self) -> usize {
        match self {
            Self::CombatFlag => 3,
            Self::PrimaryPlayer | Self::ZoneChange | Self::UnitAdded | Self::UnitDied => 4,
            Self::UnitRemoved => 13,
            Self::UnitPreDamage => 26,
            Self::UnitDamage => 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    CombatFlag {
        in_combat: bool,
    },
    PrimaryPlayer {
        id: String,
        name: String,
    },
    ZoneChange {
        zone_id: Option<u32>,
        zone_name: String,
    },
    UnitAdded(Unit),
    UnitRemoved {
        unit: Unit,
        health: Option<u64>,
        max_health: Option<u64>,
    },
    UnitPreDamage {
        source: Option<Unit>,
        source_owner: Option<String>,
        target: Unit,
        target_health: Option<u64>,
        target_max_health: Option<u64>,
    },
    UnitDamage {
        unit: Unit,
        health: Option<u64>,
        max_health: Option<u64>,
    },
    UnitDied(Unit),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub timestamp: Option<DateTime<Utc>>,
    pub event: LogEvent,
}

/// Maps a line to a typed event. Unknown opcodes and short lines yield `None`.
pub fn parse_event(line: &LogLine) -> Option<ParsedEvent> {
    let Some(kind) = EventKind::from_opcode(&line.opcode) else {
        tracing::trace!(opcode = %line.opcode, "Ignoring unhandled opcode");
        return None;
    };

    if line.fields.len() < kind.min_fields() {
        tracing::trace!(
            opcode = %line.opcode,
            field_count = line.fields.len(),
            "Ignoring short log line"
        );
        return None;
    }

    let event = match kind {
        EventKind::CombatFlag => match line.field(2)? {
            "1" => LogEvent::CombatFlag { in_combat: true },
            "0" => LogEvent::CombatFlag { in_combat: false },
            other => {
                tracing::trace!(flag = %other, "Ignoring combat flag that is neither 0 nor 1");
                return None;
            }
        },
        EventKind::PrimaryPlayer => LogEvent::PrimaryPlayer {
            id: line.field(2)?.to_string(),
            name: line.field(3)?.to_string(),
        },
        EventKind::ZoneChange => LogEvent::ZoneChange {
            zone_id: u32::from_str_radix(line.field(2)?.trim(), 16).ok(),
            zone_name: line.field(3)?.to_string(),
        },
        EventKind::UnitAdded => LogEvent::UnitAdded(unit_at(line, 2, 3)?),
        EventKind::UnitRemoved => LogEvent::UnitRemoved {
            unit: unit_at(line, 2, 3)?,
            health: parse_health(line.field(11)),
            max_health: parse_health(line.field(12)),
        },
        EventKind::UnitPreDamage => LogEvent::UnitPreDamage {
            source: unit_at(line, 2, 3).filter(|unit| !is_noise_id(&unit.id)),
            source_owner: line.field(47).map(str::to_string),
            target: unit_at(line, 6, 7)?,
            target_health: parse_health(line.field(24)),
            target_max_health: parse_health(line.field(25)),
        },
        EventKind::UnitDamage => LogEvent::UnitDamage {
            unit: unit_at(line, 2, 3)?,
            health: parse_health(line.field(5)),
            max_health: parse_health(line.field(6)),
        },
        EventKind::UnitDied => LogEvent::UnitDied(unit_at(line, 2, 3)?),
    };

    Some(ParsedEvent {
        timestamp: line.timestamp(),
        event,
    })
}

fn unit_at(line: &LogLine, id_index: usize, name_index: usize) -> Option<Unit> {
    Some(Unit {
        id: line.field(id_index)?.trim().to_string(),
        name: line.field(name_index)?.trim().to_string(),
    })
}

fn parse_health(raw_value: Option<&str>) -> Option<u64> {
    raw_value?.trim().parse::<u64>().ok()
}

/// A non-empty identifier made only of zeros, used by the log for "nobody".
pub fn is_noise_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|character| character == '0')
}

/// Players carry a `10` prefix and no owner. A missing owner field counts as no owner.
pub fn is_player(id: &str, owner: Option<&str>) -> bool {
    id.starts_with(PLAYER_ID_PREFIX) && owner.map(is_noise_id).unwrap_or(true)
}

pub fn is_likely_enemy(id: &str) -> bool {
    id.starts_with(ENEMY_ID_PREFIX)
}
