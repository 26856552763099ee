//! Scheduling stages: offer free slots to interested leads, then book the
//! confirmed one

use std::cmp::Reverse;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::calendar::Calendar;
use crate::config::Config;
use crate::dispatch::WorkerContext;
use crate::domain::{InteractionKind, Lead, TimeSlot};
use crate::lifecycle::{Stage, StageOutcome};
use crate::mail::{Mailer, reply_subject};
use crate::reasoning::{DraftContext, ReasoningService};

use super::{StageError, StageWorker, lead_failure, require_email};

const CONVERSATION_KINDS: [InteractionKind; 4] = [
    InteractionKind::OutreachEmail,
    InteractionKind::FollowUpEmail,
    InteractionKind::InboundReply,
    InteractionKind::OutboundScheduling,
];

/// Conversation bodies, oldest first, tagged with who said them
fn conversation(lead: &Lead) -> Vec<String> {
    lead.history()
        .iter()
        .filter(|i| CONVERSATION_KINDS.contains(&i.kind))
        .filter_map(|i| {
            let speaker = if i.kind == InteractionKind::InboundReply { "Lead" } else { "Us" };
            i.payload_str("body").map(|body| format!("{}: {}", speaker, body))
        })
        .collect()
}

/// Thread id of the latest message in the conversation
fn latest_thread(lead: &Lead) -> Option<&str> {
    lead.history()
        .iter()
        .rev()
        .filter(|i| CONVERSATION_KINDS.contains(&i.kind))
        .find_map(|i| i.payload_str("thread_id").filter(|t| !t.is_empty()))
}

pub struct SlotOfferer {
    reasoning: Arc<dyn ReasoningService>,
    mailer: Arc<dyn Mailer>,
    calendar: Arc<dyn Calendar>,
    high_priority_score: u8,
    duration_minutes: u32,
    window_days: u32,
}

impl SlotOfferer {
    pub fn new(
        reasoning: Arc<dyn ReasoningService>,
        mailer: Arc<dyn Mailer>,
        calendar: Arc<dyn Calendar>,
        config: &Config,
    ) -> Self {
        Self {
            reasoning,
            mailer,
            calendar,
            high_priority_score: config.pipeline.high_priority_score,
            duration_minutes: config.pipeline.meeting_duration_minutes,
            window_days: config.pipeline.scheduling_window_days,
        }
    }

    async fn offer_one(&self, ctx: &WorkerContext, lead: &Lead) -> StageOutcome {
        let to = match require_email(Stage::OfferSlots, lead) {
            Ok(to) => to,
            Err(outcome) => return outcome,
        };

        let start = Utc::now();
        let end = start + Duration::days(i64::from(self.window_days));
        let slots = match self.calendar.find_free_slots(start, end, self.duration_minutes).await {
            Ok(slots) if slots.is_empty() => {
                return lead_failure(Stage::OfferSlots, lead, "no free slots in the scheduling window");
            }
            Ok(slots) => slots,
            Err(e) => return lead_failure(Stage::OfferSlots, lead, e),
        };
        debug!(lead_id = %lead.id(), slots = slots.len(), "SlotOfferer: drafting offer");

        let context = DraftContext::SchedulingOffer {
            history: conversation(lead),
            slots: slots.clone(),
        };
        let draft = match ctx.call(self.reasoning.draft_message(ctx.credential(), &context)).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(lead_id = %lead.id(), error = %e, "Drafting scheduling offer failed");
                return lead_failure(Stage::OfferSlots, lead, e);
            }
        };

        let original_subject = lead
            .last_interaction(InteractionKind::OutreachEmail)
            .and_then(|i| i.payload_str("subject"))
            .or(lead.message_subject.as_deref());
        let subject = match original_subject {
            Some(original) => reply_subject(original),
            None if !draft.subject.is_empty() => draft.subject.clone(),
            None => "Scheduling a time to talk".to_string(),
        };

        let sent = match latest_thread(lead) {
            Some(thread_id) => self.mailer.reply_in_thread(thread_id, to, &subject, &draft.body).await,
            None => self.mailer.send(to, &subject, &draft.body).await,
        };
        match sent {
            Ok(receipt) => {
                info!(lead_id = %lead.id(), slots = slots.len(), "Scheduling offer sent");
                StageOutcome::SlotsOffered {
                    slots,
                    message_id: receipt.message_id,
                    thread_id: receipt.thread_id,
                    subject,
                    body: draft.body,
                }
            }
            Err(e) => lead_failure(Stage::OfferSlots, lead, e),
        }
    }
}

#[async_trait]
impl StageWorker for SlotOfferer {
    fn stage(&self) -> Stage {
        Stage::OfferSlots
    }

    /// High-priority leads first; order is otherwise kept
    fn order(&self, mut leads: Vec<Lead>) -> Vec<Lead> {
        leads.sort_by_key(|lead| Reverse(lead.priority(self.high_priority_score)));
        leads
    }

    async fn process(&self, ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
        let mut outcomes = Vec::with_capacity(leads.len());
        for lead in leads {
            outcomes.push(self.offer_one(ctx, lead).await);
        }
        Ok(outcomes)
    }
}

pub struct MeetingBooker {
    calendar: Arc<dyn Calendar>,
    duration_minutes: u32,
    organizer: Option<String>,
}

impl MeetingBooker {
    pub fn new(calendar: Arc<dyn Calendar>, config: &Config) -> Self {
        let organizer = Some(config.mail.from_address.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        Self {
            calendar,
            duration_minutes: config.pipeline.meeting_duration_minutes,
            organizer,
        }
    }

    /// Slot to book for a lead
    ///
    /// A confirmed time that parses as RFC 3339 picks the matching proposed
    /// slot, or a slot of the configured length at that time. Anything else
    /// falls back to the first proposed slot.
    fn choose_slot(&self, lead: &Lead) -> Option<TimeSlot> {
        let meeting = lead.meeting.as_ref()?;
        let confirmed = meeting
            .confirmed_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t.trim()).ok())
            .map(|t| t.with_timezone(&Utc));

        match confirmed {
            Some(start) => Some(
                meeting
                    .proposed_slots
                    .iter()
                    .copied()
                    .find(|slot| slot.start == start)
                    .unwrap_or_else(|| TimeSlot::new(start, start + Duration::minutes(i64::from(self.duration_minutes)))),
            ),
            None => meeting.proposed_slots.first().copied(),
        }
    }

    async fn book_one(&self, lead: &Lead) -> StageOutcome {
        let email = match require_email(Stage::BookMeeting, lead) {
            Ok(email) => email,
            Err(outcome) => return outcome,
        };
        let Some(slot) = self.choose_slot(lead) else {
            return lead_failure(Stage::BookMeeting, lead, "no confirmed or proposed time to book");
        };

        let summary = match lead.company() {
            Some(company) => format!("Meeting with {} ({})", lead.display_name(), company),
            None => format!("Meeting with {}", lead.display_name()),
        };
        let mut attendees: Vec<String> = self.organizer.iter().cloned().collect();
        attendees.push(email.to_string());

        match self.calendar.create_event(&summary, slot, &attendees).await {
            Ok(Some(event_id)) => {
                info!(lead_id = %lead.id(), %event_id, start = %slot.start, "Meeting booked");
                StageOutcome::MeetingBooked { event_id, slot }
            }
            Ok(None) => lead_failure(Stage::BookMeeting, lead, "calendar returned no event id"),
            Err(e) => {
                warn!(lead_id = %lead.id(), error = %e, "Booking failed");
                lead_failure(Stage::BookMeeting, lead, e)
            }
        }
    }
}

#[async_trait]
impl StageWorker for MeetingBooker {
    fn stage(&self) -> Stage {
        Stage::BookMeeting
    }

    async fn process(&self, _ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
        let mut outcomes = Vec::with_capacity(leads.len());
        for lead in leads {
            outcomes.push(self.book_one(lead).await);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LeadStatus, MeetingDetails};
    use crate::testing::{self, FixedCalendar, RecordingMailer, ScriptedReasoner};
    use chrono::TimeZone;

    fn slot(day: u32, hour: u32) -> TimeSlot {
        let start = Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap();
        TimeSlot::new(start, start + Duration::minutes(30))
    }

    fn confirmed(id: &str, time: Option<&str>) -> Lead {
        let mut lead = testing::lead_at(id, LeadStatus::MeetingTimeConfirmed);
        lead.meeting = Some(MeetingDetails {
            proposed_slots: vec![slot(3, 10), slot(3, 14)],
            confirmed_time: time.map(str::to_string),
            ..MeetingDetails::default()
        });
        lead
    }

    #[test]
    fn test_high_priority_ordered_first() {
        let offerer = SlotOfferer::new(
            Arc::new(ScriptedReasoner::new()),
            Arc::new(RecordingMailer::new()),
            Arc::new(FixedCalendar::new(vec![])),
            &Config::default(),
        );
        let leads: Vec<Lead> = [("a", 60), ("b", 90), ("c", 75), ("d", 85)]
            .into_iter()
            .map(|(id, score)| testing::scored_lead(id, LeadStatus::Interested, score))
            .collect();
        let ordered: Vec<String> = offerer.order(leads).iter().map(|l| l.id().to_string()).collect();
        assert_eq!(ordered, vec!["b", "d", "a", "c"]);
    }

    #[tokio::test]
    async fn test_offer_replies_in_thread() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let mailer = Arc::new(RecordingMailer::new());
        let calendar = Arc::new(FixedCalendar::new(vec![slot(3, 10), slot(3, 11)]));
        let offerer = SlotOfferer::new(reasoner.clone(), mailer.clone(), calendar, &Config::default());

        let lead = testing::lead_with_outreach("lead-1", LeadStatus::Interested, "thread-1", "Quick idea");
        let outcomes = offerer.process(&testing::context(), &[lead]).await.unwrap();

        match &outcomes[0] {
            StageOutcome::SlotsOffered { slots, thread_id, subject, .. } => {
                assert_eq!(slots.len(), 2);
                assert_eq!(thread_id, "thread-1");
                assert_eq!(subject, "Re: Quick idea");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(reasoner.draft_kinds(), vec!["scheduling"]);
        assert_eq!(mailer.sent()[0].thread_id.as_deref(), Some("thread-1"));
    }

    #[tokio::test]
    async fn test_no_free_slots_fails_lead() {
        let offerer = SlotOfferer::new(
            Arc::new(ScriptedReasoner::new()),
            Arc::new(RecordingMailer::new()),
            Arc::new(FixedCalendar::new(vec![])),
            &Config::default(),
        );
        let lead = testing::lead_at("lead-1", LeadStatus::Interested);
        let outcomes = offerer.process(&testing::context(), &[lead]).await.unwrap();
        assert!(matches!(&outcomes[0], StageOutcome::Failed { reason } if reason.contains("no free slots")));
    }

    #[tokio::test]
    async fn test_books_matching_proposed_slot() {
        let calendar = Arc::new(FixedCalendar::new(vec![]));
        let mut config = Config::default();
        config.mail.from_address = "sales@leadflow.test".to_string();
        let booker = MeetingBooker::new(calendar.clone(), &config);

        let lead = confirmed("lead-1", Some("2026-03-03T14:00:00Z"));
        let outcomes = booker.process(&testing::context(), &[lead]).await.unwrap();
        match &outcomes[0] {
            StageOutcome::MeetingBooked { slot: booked, .. } => assert_eq!(*booked, slot(3, 14)),
            other => panic!("unexpected {:?}", other),
        }
        let events = calendar.events();
        assert_eq!(events[0].attendees, vec!["sales@leadflow.test", "lead-1@example.test"]);
    }

    #[tokio::test]
    async fn test_unparseable_time_uses_first_slot() {
        let booker = MeetingBooker::new(Arc::new(FixedCalendar::new(vec![])), &Config::default());
        let lead = confirmed("lead-1", Some("Tuesday works"));
        let outcomes = booker.process(&testing::context(), &[lead]).await.unwrap();
        assert!(matches!(&outcomes[0], StageOutcome::MeetingBooked { slot: booked, .. } if *booked == slot(3, 10)));
    }

    #[tokio::test]
    async fn test_unproposed_time_books_at_that_time() {
        let booker = MeetingBooker::new(Arc::new(FixedCalendar::new(vec![])), &Config::default());
        let lead = confirmed("lead-1", Some("2026-03-04T09:00:00Z"));
        let outcomes = booker.process(&testing::context(), &[lead]).await.unwrap();
        assert!(matches!(&outcomes[0], StageOutcome::MeetingBooked { slot: booked, .. } if *booked == slot(4, 9)));
    }

    #[tokio::test]
    async fn test_missing_event_id_is_failure() {
        let booker = MeetingBooker::new(Arc::new(FixedCalendar::new(vec![]).without_event_ids()), &Config::default());
        let outcomes = booker
            .process(&testing::context(), &[confirmed("lead-1", None)])
            .await
            .unwrap();
        assert!(matches!(&outcomes[0], StageOutcome::Failed { reason } if reason.contains("no event id")));
    }
}
