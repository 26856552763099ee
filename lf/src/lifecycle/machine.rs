//! Lead state machine
//!
//! `transition` is the only place lead status, score, qualification and
//! history are written. It borrows the input lead and returns an updated
//! copy, so a rejected transition cannot leave a half-applied lead behind.

use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Intent, Interaction, InteractionKind, Lead, LeadStatus, MeetingDetails, Verdict};

use super::graph::{is_successor, reachable_from};
use super::outcome::StageOutcome;
use super::stage::Stage;

/// Why a lead's status does not satisfy a stage's precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// The lead already moved beyond the stage; a harmless repeat
    AlreadyPast,
    /// The lead has not reached the stage; an orchestration defect
    NotReached,
    /// Right status but missing a side condition (unqualified lead)
    Ineligible,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyPast => write!(f, "already past this stage"),
            Self::NotReached => write!(f, "has not reached this stage"),
            Self::Ineligible => write!(f, "not eligible for this stage"),
        }
    }
}

/// Errors from applying a transition
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransitionError {
    #[error("Lead {lead_id} at status {status} cannot enter stage {stage}: {kind}")]
    StateViolation {
        lead_id: String,
        status: LeadStatus,
        stage: Stage,
        kind: ViolationKind,
    },

    #[error("Outcome {outcome} does not belong to stage {stage} (lead {lead_id})")]
    OutcomeMismatch {
        lead_id: String,
        stage: Stage,
        outcome: &'static str,
    },

    #[error("Illegal move for lead {lead_id}: {from} -> {to}")]
    IllegalTarget {
        lead_id: String,
        from: LeadStatus,
        to: LeadStatus,
    },
}

impl TransitionError {
    /// A repeat on a lead that already moved on; safe to ignore
    pub fn is_harmless_repeat(&self) -> bool {
        matches!(
            self,
            Self::StateViolation {
                kind: ViolationKind::AlreadyPast,
                ..
            }
        )
    }
}

/// Map a classified reply to the next status
///
/// From `outreach_sent` a time confirmation is treated as plain interest,
/// because no slots have been offered yet. From `scheduling_in_progress`
/// anything but a confirmation or a clear rejection needs a human.
pub fn status_for_intent(current: LeadStatus, intent: Intent, confirmed_time: Option<&str>) -> LeadStatus {
    let has_time = confirmed_time.is_some_and(|t| !t.trim().is_empty());
    match current {
        LeadStatus::SchedulingInProgress => match intent {
            Intent::MeetingTimeConfirmed => LeadStatus::MeetingTimeConfirmed,
            Intent::Interested if has_time => LeadStatus::MeetingTimeConfirmed,
            Intent::NotInterested => LeadStatus::NotInterested,
            Intent::WrongPerson => LeadStatus::WrongPerson,
            _ => LeadStatus::NeedsClarification,
        },
        _ => match intent {
            Intent::Interested | Intent::MeetingTimeConfirmed => LeadStatus::Interested,
            Intent::NotInterested => LeadStatus::NotInterested,
            Intent::WrongPerson => LeadStatus::WrongPerson,
            Intent::NeedsClarification => LeadStatus::NeedsClarification,
        },
    }
}

/// Applies stage outcomes to leads
#[derive(Debug, Clone, Copy)]
pub struct LeadStateMachine {
    qualification_threshold: u8,
}

impl LeadStateMachine {
    pub fn new(qualification_threshold: u8) -> Self {
        Self {
            qualification_threshold: qualification_threshold.min(100),
        }
    }

    pub fn qualification_threshold(&self) -> u8 {
        self.qualification_threshold
    }

    /// Check that a lead may enter a stage
    pub fn check(&self, lead: &Lead, stage: Stage) -> Result<(), TransitionError> {
        let status = lead.status();
        let preconditions = stage.preconditions();
        let kind = if !preconditions.contains(&status) {
            if reachable_from(preconditions, status) {
                ViolationKind::AlreadyPast
            } else {
                ViolationKind::NotReached
            }
        } else if stage.requires_qualified() && !lead.qualified() {
            ViolationKind::Ineligible
        } else {
            return Ok(());
        };

        Err(TransitionError::StateViolation {
            lead_id: lead.id().to_string(),
            status,
            stage,
            kind,
        })
    }

    /// Apply one stage outcome to a lead, returning the updated lead
    pub fn transition(&self, lead: &Lead, stage: Stage, outcome: &StageOutcome) -> Result<Lead, TransitionError> {
        debug!(lead_id = %lead.id(), status = %lead.status(), %stage, outcome = outcome.name(), "transition: called");
        self.check(lead, stage)?;

        if !outcome.belongs_to(stage) {
            warn!(lead_id = %lead.id(), %stage, outcome = outcome.name(), "transition: outcome mismatch");
            return Err(TransitionError::OutcomeMismatch {
                lead_id: lead.id().to_string(),
                stage,
                outcome: outcome.name(),
            });
        }

        let from = lead.status();
        let mut next = lead.clone();
        let target = match outcome {
            StageOutcome::Skipped { reason } => {
                debug!(lead_id = %lead.id(), %reason, "transition: skipped, no change");
                return Ok(next);
            }
            StageOutcome::Scored {
                score,
                verdict,
                reasoning,
                matched_criteria,
            } => {
                let score = (*score).min(100);
                let qualified = *verdict == Verdict::Qualified && score >= self.qualification_threshold;
                next.set_score(score, qualified);
                next.score_reasoning = Some(reasoning.clone());
                next.matched_criteria = matched_criteria.clone();
                LeadStatus::Scored
            }
            StageOutcome::MessageDrafted { subject, body } => {
                next.message_subject = Some(subject.clone());
                next.personalized_message = Some(body.clone());
                LeadStatus::MessageGenerated
            }
            StageOutcome::OutreachSent {
                message_id,
                thread_id,
                subject,
                body,
                sent_at,
            } => {
                next.push_interaction(Interaction {
                    kind: InteractionKind::OutreachEmail,
                    payload: json!({
                        "message_id": message_id,
                        "thread_id": thread_id,
                        "subject": subject,
                        "body": body,
                    }),
                    timestamp: *sent_at,
                });
                next.last_outreach_at = Some(*sent_at);
                LeadStatus::OutreachSent
            }
            StageOutcome::ReplyClassified {
                message_id,
                thread_id,
                body,
                intent,
                summary,
                confirmed_time,
            } => {
                let target = status_for_intent(from, *intent, confirmed_time.as_deref());
                next.push_interaction(Interaction::new(
                    InteractionKind::InboundReply,
                    json!({
                        "message_id": message_id,
                        "thread_id": thread_id,
                        "body": body,
                        "intent": intent,
                        "summary": summary,
                        "confirmed_time": confirmed_time,
                    }),
                ));
                next.intent = Some(*intent);
                if target == LeadStatus::MeetingTimeConfirmed {
                    let meeting = next.meeting.get_or_insert_with(MeetingDetails::default);
                    meeting.confirmed_time = confirmed_time.clone();
                }
                target
            }
            StageOutcome::SlotsOffered {
                slots,
                message_id,
                thread_id,
                subject,
                body,
            } => {
                next.push_interaction(Interaction::new(
                    InteractionKind::OutboundScheduling,
                    json!({
                        "message_id": message_id,
                        "thread_id": thread_id,
                        "subject": subject,
                        "body": body,
                        "proposed_slots": slots,
                    }),
                ));
                let meeting = next.meeting.get_or_insert_with(MeetingDetails::default);
                meeting.proposed_slots = slots.clone();
                LeadStatus::SchedulingInProgress
            }
            StageOutcome::MeetingBooked { event_id, slot } => {
                let meeting = next.meeting.get_or_insert_with(MeetingDetails::default);
                meeting.event_id = Some(event_id.clone());
                meeting.slot = Some(*slot);
                LeadStatus::MeetingBooked
            }
            StageOutcome::Archived => LeadStatus::Archived,
            StageOutcome::FollowUpDue { .. } => LeadStatus::FollowUpDue,
            StageOutcome::FollowUpSent {
                message_id,
                thread_id,
                body,
                sent_at,
            } => {
                next.push_interaction(Interaction {
                    kind: InteractionKind::FollowUpEmail,
                    payload: json!({
                        "message_id": message_id,
                        "thread_id": thread_id,
                        "body": body,
                    }),
                    timestamp: *sent_at,
                });
                next.follow_up_count += 1;
                next.last_outreach_at = Some(*sent_at);
                LeadStatus::OutreachSent
            }
            StageOutcome::Failed { reason } => {
                next.last_error = Some(reason.clone());
                stage.failure_status()
            }
            StageOutcome::Aborted { reason } => {
                next.last_error = Some(reason.clone());
                LeadStatus::Failed
            }
        };

        if !is_successor(from, target) {
            warn!(lead_id = %lead.id(), %from, to = %target, "transition: illegal target");
            return Err(TransitionError::IllegalTarget {
                lead_id: lead.id().to_string(),
                from,
                to: target,
            });
        }

        next.set_status(target);
        next.touch();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RawAttributes, TimeSlot};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn lead_at(status: LeadStatus) -> Lead {
        let mut attrs = RawAttributes::new();
        attrs.insert("email", "jane@acme.io");
        let mut lead = Lead::new("lead-1", attrs);
        lead.set_status(status);
        lead
    }

    fn scored(score: u8, verdict: Verdict) -> StageOutcome {
        StageOutcome::Scored {
            score,
            verdict,
            reasoning: "fits".to_string(),
            matched_criteria: BTreeMap::new(),
        }
    }

    fn reply(intent: Intent, confirmed_time: Option<&str>) -> StageOutcome {
        StageOutcome::ReplyClassified {
            message_id: "m1".to_string(),
            thread_id: "t1".to_string(),
            body: "reply".to_string(),
            intent,
            summary: "summary".to_string(),
            confirmed_time: confirmed_time.map(str::to_string),
        }
    }

    #[test]
    fn test_score_qualifies_at_threshold() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::New);

        let next = machine.transition(&lead, Stage::Score, &scored(70, Verdict::Qualified)).unwrap();
        assert_eq!(next.status(), LeadStatus::Scored);
        assert_eq!(next.score(), Some(70));
        assert!(next.qualified());

        let next = machine.transition(&lead, Stage::Score, &scored(69, Verdict::Qualified)).unwrap();
        assert!(!next.qualified());

        let next = machine.transition(&lead, Stage::Score, &scored(95, Verdict::NeedsReview)).unwrap();
        assert!(!next.qualified());
        assert!(next.history().is_empty());
    }

    #[test]
    fn test_interested_lead_rejected_by_scorer() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::Interested);
        let err = machine
            .transition(&lead, Stage::Score, &scored(90, Verdict::Qualified))
            .unwrap_err();
        assert!(matches!(
            err,
            TransitionError::StateViolation {
                kind: ViolationKind::AlreadyPast,
                ..
            }
        ));
        assert!(err.is_harmless_repeat());
        assert_eq!(lead.status(), LeadStatus::Interested);
        assert_eq!(lead.score(), None);
    }

    #[test]
    fn test_not_reached_is_a_defect() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::New);
        let err = machine.transition(&lead, Stage::BookMeeting, &StageOutcome::failed("x")).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::StateViolation {
                kind: ViolationKind::NotReached,
                ..
            }
        ));
        assert!(!err.is_harmless_repeat());
    }

    #[test]
    fn test_personalize_requires_qualified() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::Scored);
        let outcome = StageOutcome::MessageDrafted {
            subject: "Hi".to_string(),
            body: "Body".to_string(),
        };
        let err = machine.transition(&lead, Stage::Personalize, &outcome).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::StateViolation {
                kind: ViolationKind::Ineligible,
                ..
            }
        ));

        let mut qualified = lead.clone();
        qualified.set_score(90, true);
        let next = machine.transition(&qualified, Stage::Personalize, &outcome).unwrap();
        assert_eq!(next.status(), LeadStatus::MessageGenerated);
        assert_eq!(next.personalized_message.as_deref(), Some("Body"));
    }

    #[test]
    fn test_outcome_mismatch_rejected() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::New);
        let outcome = StageOutcome::MeetingBooked {
            event_id: "e".to_string(),
            slot: TimeSlot {
                start: Utc::now(),
                end: Utc::now(),
            },
        };
        let err = machine.transition(&lead, Stage::Score, &outcome).unwrap_err();
        assert!(matches!(err, TransitionError::OutcomeMismatch { .. }));
    }

    #[test]
    fn test_not_interested_then_archived() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::OutreachSent);
        let before = lead.history().len();

        let classified = machine
            .transition(&lead, Stage::InterpretReply, &reply(Intent::NotInterested, None))
            .unwrap();
        assert_eq!(classified.status(), LeadStatus::NotInterested);
        assert_eq!(classified.history().len(), before + 1);
        assert_eq!(classified.history()[before].kind, InteractionKind::InboundReply);

        let archived = machine
            .transition(&classified, Stage::Archive, &StageOutcome::Archived)
            .unwrap();
        assert_eq!(archived.status(), LeadStatus::Archived);
        assert_eq!(archived.history().len(), before + 1);

        // re-applying is rejected as a harmless repeat
        let err = machine
            .transition(&archived, Stage::Archive, &StageOutcome::Archived)
            .unwrap_err();
        assert!(err.is_harmless_repeat());
    }

    #[test]
    fn test_intent_mapping_from_outreach_sent() {
        let from = LeadStatus::OutreachSent;
        assert_eq!(status_for_intent(from, Intent::Interested, None), LeadStatus::Interested);
        assert_eq!(
            status_for_intent(from, Intent::MeetingTimeConfirmed, Some("Tue 10am")),
            LeadStatus::Interested
        );
        assert_eq!(status_for_intent(from, Intent::WrongPerson, None), LeadStatus::WrongPerson);
        assert_eq!(
            status_for_intent(from, Intent::NeedsClarification, None),
            LeadStatus::NeedsClarification
        );
    }

    #[test]
    fn test_intent_mapping_from_scheduling() {
        let from = LeadStatus::SchedulingInProgress;
        assert_eq!(
            status_for_intent(from, Intent::MeetingTimeConfirmed, None),
            LeadStatus::MeetingTimeConfirmed
        );
        assert_eq!(
            status_for_intent(from, Intent::Interested, Some("2026-03-03T10:00:00Z")),
            LeadStatus::MeetingTimeConfirmed
        );
        assert_eq!(
            status_for_intent(from, Intent::Interested, None),
            LeadStatus::NeedsClarification
        );
        assert_eq!(status_for_intent(from, Intent::NotInterested, None), LeadStatus::NotInterested);
    }

    #[test]
    fn test_confirmation_records_meeting_time() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::SchedulingInProgress);
        let next = machine
            .transition(
                &lead,
                Stage::InterpretReply,
                &reply(Intent::MeetingTimeConfirmed, Some("2026-03-03T10:00:00Z")),
            )
            .unwrap();
        assert_eq!(next.status(), LeadStatus::MeetingTimeConfirmed);
        assert_eq!(
            next.meeting.unwrap().confirmed_time.as_deref(),
            Some("2026-03-03T10:00:00Z")
        );
    }

    #[test]
    fn test_stage_failure_uses_failure_status() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::Interested);
        let next = machine
            .transition(&lead, Stage::OfferSlots, &StageOutcome::failed("no free slots"))
            .unwrap();
        assert_eq!(next.status(), LeadStatus::SchedulingFailed);
        assert_eq!(next.last_error.as_deref(), Some("no free slots"));

        let next = machine
            .transition(&lead, Stage::OfferSlots, &StageOutcome::aborted("worker panicked"))
            .unwrap();
        assert_eq!(next.status(), LeadStatus::Failed);
    }

    #[test]
    fn test_skipped_leaves_lead_unchanged() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::OutreachSent);
        let next = machine
            .transition(&lead, Stage::InterpretReply, &StageOutcome::skipped("no reply"))
            .unwrap();
        assert_eq!(next, lead);
    }

    #[test]
    fn test_follow_up_retry_path() {
        let machine = LeadStateMachine::new(70);
        let lead = lead_at(LeadStatus::OutreachSent);
        let due = machine
            .transition(&lead, Stage::DetectFollowUp, &StageOutcome::FollowUpDue { silent_hours: 50 })
            .unwrap();
        assert_eq!(due.status(), LeadStatus::FollowUpDue);

        let sent_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let sent = machine
            .transition(
                &due,
                Stage::SendFollowUp,
                &StageOutcome::FollowUpSent {
                    message_id: "m2".to_string(),
                    thread_id: "t1".to_string(),
                    body: "Just checking in".to_string(),
                    sent_at,
                },
            )
            .unwrap();
        assert_eq!(sent.status(), LeadStatus::OutreachSent);
        assert_eq!(sent.follow_up_count, 1);
        assert_eq!(sent.last_outreach_at, Some(sent_at));
        assert_eq!(sent.history().last().unwrap().kind, InteractionKind::FollowUpEmail);
    }

    fn success_outcome(stage: Stage) -> StageOutcome {
        let at = Utc.with_ymd_and_hms(2030, 3, 4, 10, 0, 0).unwrap();
        let slot = TimeSlot::new(at, at + chrono::Duration::minutes(30));
        match stage {
            Stage::Score => scored(90, Verdict::Qualified),
            Stage::Personalize => StageOutcome::MessageDrafted {
                subject: "Hi".to_string(),
                body: "Hello".to_string(),
            },
            Stage::Outreach => StageOutcome::OutreachSent {
                message_id: "m1".to_string(),
                thread_id: "t1".to_string(),
                subject: "Hi".to_string(),
                body: "Hello".to_string(),
                sent_at: at,
            },
            Stage::InterpretReply => reply(Intent::Interested, None),
            Stage::OfferSlots => StageOutcome::SlotsOffered {
                slots: vec![slot],
                message_id: "m2".to_string(),
                thread_id: "t1".to_string(),
                subject: "Re: Hi".to_string(),
                body: "Times".to_string(),
            },
            Stage::BookMeeting => StageOutcome::MeetingBooked {
                event_id: "e1".to_string(),
                slot,
            },
            Stage::Archive => StageOutcome::Archived,
            Stage::DetectFollowUp => StageOutcome::FollowUpDue { silent_hours: 72 },
            Stage::SendFollowUp => StageOutcome::FollowUpSent {
                message_id: "m3".to_string(),
                thread_id: "t1".to_string(),
                body: "Following up".to_string(),
                sent_at: at,
            },
        }
    }

    #[test]
    fn test_success_replayed_past_stage_is_a_harmless_repeat() {
        let machine = LeadStateMachine::new(70);
        let mut checked = 0;
        for stage in Stage::RUN_ORDER {
            let preconditions = stage.preconditions();
            for status in LeadStatus::ALL {
                if preconditions.contains(&status) || !reachable_from(preconditions, status) {
                    continue;
                }
                let mut lead = lead_at(status);
                lead.push_interaction(Interaction::new(InteractionKind::OutreachEmail, json!({})));
                let before = lead.clone();

                let err = machine
                    .transition(&lead, stage, &success_outcome(stage))
                    .expect_err("repeat must be rejected");
                assert!(err.is_harmless_repeat(), "{} on {}: {}", stage, status, err);
                assert_eq!(lead, before);
                assert_eq!(lead.status(), status);
                assert_eq!(lead.history().len(), 1);
                checked += 1;
            }
        }
        assert!(checked > Stage::RUN_ORDER.len());
    }

    fn any_verdict() -> impl Strategy<Value = Verdict> {
        prop_oneof![
            Just(Verdict::Qualified),
            Just(Verdict::NotQualified),
            Just(Verdict::NeedsReview)
        ]
    }

    proptest! {
        #[test]
        fn prop_qualified_implies_score_at_threshold(score in any::<u8>(), threshold in 0u8..=100, verdict in any_verdict()) {
            let machine = LeadStateMachine::new(threshold);
            let lead = lead_at(LeadStatus::New);
            let next = machine.transition(&lead, Stage::Score, &scored(score, verdict)).unwrap();
            prop_assert!(next.score().unwrap() <= 100);
            if next.qualified() {
                prop_assert!(next.score().unwrap() >= threshold);
            }
        }

        #[test]
        fn prop_history_never_shrinks(stage_idx in 0usize..9, status_idx in 0usize..17) {
            let machine = LeadStateMachine::new(70);
            let mut lead = lead_at(LeadStatus::ALL[status_idx]);
            lead.push_interaction(Interaction::new(InteractionKind::OutreachEmail, serde_json::json!({})));
            let stage = Stage::RUN_ORDER[stage_idx];
            match machine.transition(&lead, stage, &StageOutcome::failed("boom")) {
                Ok(next) => {
                    prop_assert!(next.history().len() >= lead.history().len());
                    prop_assert_eq!(&next.history()[..1], lead.history());
                }
                Err(_) => prop_assert_eq!(lead.status(), LeadStatus::ALL[status_idx]),
            }
        }
    }
}
