//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

pub const SCORE_SYSTEM: &str = include_str!("../../prompts/score-system.pmt");
pub const SCORE: &str = include_str!("../../prompts/score.pmt");
pub const CLASSIFY_SYSTEM: &str = include_str!("../../prompts/classify-system.pmt");
pub const CLASSIFY: &str = include_str!("../../prompts/classify.pmt");
pub const DRAFT_SYSTEM: &str = include_str!("../../prompts/draft-system.pmt");
pub const OUTREACH: &str = include_str!("../../prompts/outreach.pmt");
pub const FOLLOW_UP: &str = include_str!("../../prompts/follow-up.pmt");
pub const SCHEDULING: &str = include_str!("../../prompts/scheduling.pmt");

/// Names of every embedded template
pub const NAMES: [&str; 8] = [
    "score-system",
    "score",
    "classify-system",
    "classify",
    "draft-system",
    "outreach",
    "follow-up",
    "scheduling",
];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "score-system" => Some(SCORE_SYSTEM),
        "score" => Some(SCORE),
        "classify-system" => Some(CLASSIFY_SYSTEM),
        "classify" => Some(CLASSIFY),
        "draft-system" => Some(DRAFT_SYSTEM),
        "outreach" => Some(OUTREACH),
        "follow-up" => Some(FOLLOW_UP),
        "scheduling" => Some(SCHEDULING),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_is_embedded() {
        for name in NAMES {
            assert!(get_embedded(name).is_some(), "{}", name);
        }
    }

    #[test]
    fn test_classify_system_lists_all_intents() {
        for intent in [
            "INTERESTED",
            "NOT_INTERESTED",
            "WRONG_PERSON",
            "MEETING_TIME_CONFIRMED",
            "NEEDS_CLARIFICATION",
        ] {
            assert!(CLASSIFY_SYSTEM.contains(intent), "{}", intent);
        }
    }

    #[test]
    fn test_get_embedded_unknown() {
        assert!(get_embedded("unknown-template").is_none());
    }
}
