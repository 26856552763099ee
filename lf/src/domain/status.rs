//! Lead status and intent enums

use serde::{Deserialize, Serialize};

/// Position of a lead in the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Imported, not yet scored
    #[default]
    New,
    Scored,
    MessageGenerated,
    OutreachSent,
    Interested,
    NotInterested,
    WrongPerson,
    NeedsClarification,
    SchedulingInProgress,
    MeetingTimeConfirmed,
    MeetingBooked,
    BookingFailed,
    SchedulingFailed,
    FollowUpDue,
    FollowUpFailed,
    Archived,
    /// Unrecoverable per-lead error
    Failed,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 17] = [
        Self::New,
        Self::Scored,
        Self::MessageGenerated,
        Self::OutreachSent,
        Self::Interested,
        Self::NotInterested,
        Self::WrongPerson,
        Self::NeedsClarification,
        Self::SchedulingInProgress,
        Self::MeetingTimeConfirmed,
        Self::MeetingBooked,
        Self::BookingFailed,
        Self::SchedulingFailed,
        Self::FollowUpDue,
        Self::FollowUpFailed,
        Self::Archived,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Scored => "scored",
            Self::MessageGenerated => "message_generated",
            Self::OutreachSent => "outreach_sent",
            Self::Interested => "interested",
            Self::NotInterested => "not_interested",
            Self::WrongPerson => "wrong_person",
            Self::NeedsClarification => "needs_clarification",
            Self::SchedulingInProgress => "scheduling_in_progress",
            Self::MeetingTimeConfirmed => "meeting_time_confirmed",
            Self::MeetingBooked => "meeting_booked",
            Self::BookingFailed => "booking_failed",
            Self::SchedulingFailed => "scheduling_failed",
            Self::FollowUpDue => "follow_up_due",
            Self::FollowUpFailed => "follow_up_failed",
            Self::Archived => "archived",
            Self::Failed => "failed",
        }
    }

    /// No stage picks the lead up again from here
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MeetingBooked
                | Self::BookingFailed
                | Self::SchedulingFailed
                | Self::FollowUpFailed
                | Self::Archived
                | Self::Failed
        )
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("Unknown lead status: {}", s))
    }
}

/// Classification of an inbound reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Interested,
    NotInterested,
    WrongPerson,
    NeedsClarification,
    MeetingTimeConfirmed,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Interested => "INTERESTED",
            Self::NotInterested => "NOT_INTERESTED",
            Self::WrongPerson => "WRONG_PERSON",
            Self::NeedsClarification => "NEEDS_CLARIFICATION",
            Self::MeetingTimeConfirmed => "MEETING_TIME_CONFIRMED",
        };
        write!(f, "{}", s)
    }
}

/// Verdict returned by lead scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Qualified,
    NotQualified,
    NeedsReview,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Qualified => "QUALIFIED",
            Self::NotQualified => "NOT_QUALIFIED",
            Self::NeedsReview => "NEEDS_REVIEW",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_parse_roundtrip() {
        for status in LeadStatus::ALL {
            assert_eq!(status.to_string().parse::<LeadStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_status_parse_accepts_upper_case() {
        assert_eq!("OUTREACH_SENT".parse::<LeadStatus>().unwrap(), LeadStatus::OutreachSent);
        assert_eq!("follow-up-due".parse::<LeadStatus>().unwrap(), LeadStatus::FollowUpDue);
        assert!("pending".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_display() {
        let json = serde_json::to_string(&LeadStatus::MeetingTimeConfirmed).unwrap();
        assert_eq!(json, "\"meeting_time_confirmed\"");
    }

    #[test]
    fn test_terminal_states() {
        assert!(LeadStatus::Archived.is_terminal());
        assert!(LeadStatus::BookingFailed.is_terminal());
        assert!(!LeadStatus::New.is_terminal());
        assert!(!LeadStatus::FollowUpDue.is_terminal());
    }

    #[test]
    fn test_intent_serde() {
        let intent: Intent = serde_json::from_str("\"WRONG_PERSON\"").unwrap();
        assert_eq!(intent, Intent::WrongPerson);
        assert_eq!(Intent::MeetingTimeConfirmed.to_string(), "MEETING_TIME_CONFIRMED");
    }
}
