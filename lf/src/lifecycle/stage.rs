//! Pipeline stages and their declared contracts

use serde::{Deserialize, Serialize};

use crate::domain::LeadStatus;

/// One transition function over the lead state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Score,
    Personalize,
    Outreach,
    InterpretReply,
    OfferSlots,
    BookMeeting,
    Archive,
    DetectFollowUp,
    SendFollowUp,
}

impl Stage {
    /// Order in which a full run executes the stages
    pub const RUN_ORDER: [Stage; 9] = [
        Self::BookMeeting,
        Self::OfferSlots,
        Self::InterpretReply,
        Self::Archive,
        Self::DetectFollowUp,
        Self::SendFollowUp,
        Self::Score,
        Self::Personalize,
        Self::Outreach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Score => "score",
            Self::Personalize => "personalize",
            Self::Outreach => "outreach",
            Self::InterpretReply => "interpret-reply",
            Self::OfferSlots => "offer-slots",
            Self::BookMeeting => "book-meeting",
            Self::Archive => "archive",
            Self::DetectFollowUp => "detect-follow-up",
            Self::SendFollowUp => "send-follow-up",
        }
    }

    /// Statuses a lead must be in for this stage to act on it
    pub fn preconditions(&self) -> &'static [LeadStatus] {
        use LeadStatus::*;
        match self {
            Self::Score => &[New],
            Self::Personalize => &[Scored],
            Self::Outreach => &[MessageGenerated],
            Self::InterpretReply => &[OutreachSent, SchedulingInProgress],
            Self::OfferSlots => &[Interested],
            Self::BookMeeting => &[MeetingTimeConfirmed],
            Self::Archive => &[NotInterested, WrongPerson],
            Self::DetectFollowUp => &[OutreachSent],
            Self::SendFollowUp => &[FollowUpDue],
        }
    }

    /// Statuses a successful outcome may produce
    pub fn success_targets(&self) -> &'static [LeadStatus] {
        use LeadStatus::*;
        match self {
            Self::Score => &[Scored],
            Self::Personalize => &[MessageGenerated],
            Self::Outreach => &[OutreachSent],
            Self::InterpretReply => &[
                Interested,
                NotInterested,
                WrongPerson,
                NeedsClarification,
                MeetingTimeConfirmed,
            ],
            Self::OfferSlots => &[SchedulingInProgress],
            Self::BookMeeting => &[MeetingBooked],
            Self::Archive => &[Archived],
            Self::DetectFollowUp => &[FollowUpDue],
            Self::SendFollowUp => &[OutreachSent],
        }
    }

    /// Status a lead moves to when this stage fails it
    pub fn failure_status(&self) -> LeadStatus {
        match self {
            Self::OfferSlots => LeadStatus::SchedulingFailed,
            Self::BookMeeting => LeadStatus::BookingFailed,
            Self::SendFollowUp => LeadStatus::FollowUpFailed,
            _ => LeadStatus::Failed,
        }
    }

    /// Whether the stage only accepts qualified leads
    pub fn requires_qualified(&self) -> bool {
        matches!(self, Self::Personalize)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::RUN_ORDER
            .iter()
            .copied()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::RUN_ORDER.iter().map(Stage::as_str).collect();
                format!("Unknown stage: {} (expected one of: {})", s, names.join(", "))
            })
    }
}
