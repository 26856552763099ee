//! Per-lead results produced by stage workers

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::domain::{Intent, TimeSlot, Verdict};

use super::stage::Stage;

/// Result of running one stage on one lead
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Scored {
        score: u8,
        verdict: Verdict,
        reasoning: String,
        matched_criteria: BTreeMap<String, bool>,
    },
    MessageDrafted {
        subject: String,
        body: String,
    },
    OutreachSent {
        message_id: String,
        thread_id: String,
        subject: String,
        body: String,
        sent_at: DateTime<Utc>,
    },
    ReplyClassified {
        message_id: String,
        thread_id: String,
        body: String,
        intent: Intent,
        summary: String,
        confirmed_time: Option<String>,
    },
    SlotsOffered {
        slots: Vec<TimeSlot>,
        message_id: String,
        thread_id: String,
        subject: String,
        body: String,
    },
    MeetingBooked {
        event_id: String,
        slot: TimeSlot,
    },
    Archived,
    FollowUpDue {
        silent_hours: i64,
    },
    FollowUpSent {
        message_id: String,
        thread_id: String,
        body: String,
        sent_at: DateTime<Utc>,
    },
    /// The stage failed this lead; it moves to the stage's failure status
    Failed { reason: String },
    /// The dispatcher gave up on the work item; the lead moves to `failed`
    Aborted { reason: String },
    /// Nothing to do yet (no reply, follow-up not due); not persisted
    Skipped { reason: String },
}

impl StageOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted { reason: reason.into() }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped { reason: reason.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Scored { .. } => "scored",
            Self::MessageDrafted { .. } => "message_drafted",
            Self::OutreachSent { .. } => "outreach_sent",
            Self::ReplyClassified { .. } => "reply_classified",
            Self::SlotsOffered { .. } => "slots_offered",
            Self::MeetingBooked { .. } => "meeting_booked",
            Self::Archived => "archived",
            Self::FollowUpDue { .. } => "follow_up_due",
            Self::FollowUpSent { .. } => "follow_up_sent",
            Self::Failed { .. } => "failed",
            Self::Aborted { .. } => "aborted",
            Self::Skipped { .. } => "skipped",
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Aborted { .. })
    }

    /// Whether this outcome can be produced by `stage`
    pub fn belongs_to(&self, stage: Stage) -> bool {
        match self {
            Self::Failed { .. } | Self::Aborted { .. } | Self::Skipped { .. } => true,
            Self::Scored { .. } => stage == Stage::Score,
            Self::MessageDrafted { .. } => stage == Stage::Personalize,
            Self::OutreachSent { .. } => stage == Stage::Outreach,
            Self::ReplyClassified { .. } => stage == Stage::InterpretReply,
            Self::SlotsOffered { .. } => stage == Stage::OfferSlots,
            Self::MeetingBooked { .. } => stage == Stage::BookMeeting,
            Self::Archived => stage == Stage::Archive,
            Self::FollowUpDue { .. } => stage == Stage::DetectFollowUp,
            Self::FollowUpSent { .. } => stage == Stage::SendFollowUp,
        }
    }
}
