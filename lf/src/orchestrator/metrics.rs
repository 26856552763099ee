//! Run metrics
//!
//! Counters incremented by stage completions during one run. They are
//! monotonic within the run and are not persisted.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Lead, LeadStatus};
use crate::lifecycle::StageOutcome;

/// Process-wide counters for one run (thread-safe)
#[derive(Debug, Default)]
pub struct RunMetrics {
    processed: AtomicU64,
    qualified: AtomicU64,
    messages_generated: AtomicU64,
    emails_sent: AtomicU64,
    replies_processed: AtomicU64,
    interested: AtomicU64,
    not_interested: AtomicU64,
    wrong_person: AtomicU64,
    meetings_booked: AtomicU64,
    follow_ups_sent: AtomicU64,
    archived: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    repeats: AtomicU64,
}

/// Point-in-time copy of [`RunMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub qualified: u64,
    pub messages_generated: u64,
    pub emails_sent: u64,
    pub replies_processed: u64,
    pub interested: u64,
    pub not_interested: u64,
    pub wrong_person: u64,
    pub meetings_booked: u64,
    pub follow_ups_sent: u64,
    pub archived: u64,
    pub failed: u64,
    pub rejected: u64,
    pub repeats: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a persisted outcome; `lead` is the lead after the transition
    pub fn record(&self, outcome: &StageOutcome, lead: &Lead) {
        debug!(outcome = outcome.name(), lead_id = %lead.id(), "RunMetrics::record: called");
        if outcome.is_failure() {
            bump(&self.failed);
            return;
        }
        bump(&self.processed);
        match outcome {
            StageOutcome::Scored { .. } if lead.qualified() => bump(&self.qualified),
            StageOutcome::MessageDrafted { .. } => bump(&self.messages_generated),
            StageOutcome::OutreachSent { .. } | StageOutcome::SlotsOffered { .. } => bump(&self.emails_sent),
            StageOutcome::ReplyClassified { .. } => {
                bump(&self.replies_processed);
                match lead.status() {
                    LeadStatus::Interested | LeadStatus::MeetingTimeConfirmed => bump(&self.interested),
                    LeadStatus::NotInterested => bump(&self.not_interested),
                    LeadStatus::WrongPerson => bump(&self.wrong_person),
                    _ => {}
                }
            }
            StageOutcome::MeetingBooked { .. } => bump(&self.meetings_booked),
            StageOutcome::FollowUpSent { .. } => bump(&self.follow_ups_sent),
            StageOutcome::Archived => bump(&self.archived),
            _ => {}
        }
    }

    /// A transition the state machine refused
    pub fn record_rejected(&self) {
        bump(&self.rejected);
    }

    /// An outcome for a lead already past the stage
    pub fn record_repeat(&self) {
        bump(&self.repeats);
    }

    /// A lead whose new state could not be stored
    pub fn record_failed(&self) {
        bump(&self.failed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            processed: get(&self.processed),
            qualified: get(&self.qualified),
            messages_generated: get(&self.messages_generated),
            emails_sent: get(&self.emails_sent),
            replies_processed: get(&self.replies_processed),
            interested: get(&self.interested),
            not_interested: get(&self.not_interested),
            wrong_person: get(&self.wrong_person),
            meetings_booked: get(&self.meetings_booked),
            follow_ups_sent: get(&self.follow_ups_sent),
            archived: get(&self.archived),
            failed: get(&self.failed),
            rejected: get(&self.rejected),
            repeats: get(&self.repeats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Intent;
    use crate::testing;

    #[test]
    fn test_reply_counts_follow_resulting_status() {
        let metrics = RunMetrics::new();
        let outcome = StageOutcome::ReplyClassified {
            message_id: "m".to_string(),
            thread_id: "t".to_string(),
            body: "no".to_string(),
            intent: Intent::NotInterested,
            summary: String::new(),
            confirmed_time: None,
        };
        metrics.record(&outcome, &testing::lead_at("a", LeadStatus::NotInterested));
        metrics.record(&StageOutcome::failed("x"), &testing::lead_at("b", LeadStatus::Failed));
        metrics.record_rejected();
        metrics.record_repeat();

        let snap = metrics.snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.replies_processed, 1);
        assert_eq!(snap.not_interested, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.repeats, 1);
    }

    #[test]
    fn test_only_qualified_scores_count() {
        let metrics = RunMetrics::new();
        let scored = StageOutcome::Scored {
            score: 90,
            verdict: crate::domain::Verdict::Qualified,
            reasoning: String::new(),
            matched_criteria: Default::default(),
        };
        metrics.record(&scored, &testing::scored_lead("a", LeadStatus::Scored, 90));
        metrics.record(&scored, &testing::scored_lead("b", LeadStatus::Scored, 40));
        let snap = metrics.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.qualified, 1);
    }
}
