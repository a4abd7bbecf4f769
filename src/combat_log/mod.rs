pub mod feed;
pub mod parser;
pub mod tailer;

pub use feed::{decode_feed_message, CombatData, CombatantJob, FeedInput, SELF_COMBATANT_NAME};
pub use parser::{parse_event, LogEvent, LogLine, ParsedEvent, Unit};
pub use tailer::{spawn_tailer, LogFilePattern, LogTailer, TailerHandle};
