//! In-memory collaborators for tests
//!
//! Scripted stand-ins for the reasoning service, mailbox and calendar, plus
//! helpers for building leads at a given lifecycle status. Built for unit
//! tests and behind the `testing` feature for integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::calendar::{Calendar, CalendarError};
use crate::credentials::{Credential, CredentialPool};
use crate::dispatch::WorkerContext;
use crate::domain::{Intent, Interaction, InteractionKind, Lead, LeadStatus, RawAttributes, TimeSlot, Verdict};
use crate::llm::LlmError;
use crate::mail::{MailError, Mailer, ReplyRef, SendReceipt};
use crate::ratelimit::{RateLimitScope, RateLimiter};
use crate::reasoning::{Draft, DraftContext, IntentResult, LeadScore, ReasoningError, ReasoningService};
use crate::stages::Collaborators;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn scripted_failure(what: &str) -> ReasoningError {
    ReasoningError::Llm(LlmError::ApiError {
        status: 500,
        message: format!("scripted {} failure", what),
    })
}

/// Reasoning service with scripted answers
///
/// Scores come from each lead's `score` attribute (80 when absent), intents
/// from a queue (INTERESTED once it runs dry), and drafts are canned text.
#[derive(Default)]
pub struct ScriptedReasoner {
    fail_scores: bool,
    drop_last_score: bool,
    fail_classification: bool,
    fail_drafts: bool,
    intents: Mutex<VecDeque<(Intent, Option<String>)>>,
    score_batches: Mutex<Vec<usize>>,
    classify_calls: Mutex<Vec<(String, String)>>,
    draft_kinds: Mutex<Vec<&'static str>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_scores(mut self) -> Self {
        self.fail_scores = true;
        self
    }

    /// Return one score fewer than asked for
    pub fn dropping_last_score(mut self) -> Self {
        self.drop_last_score = true;
        self
    }

    pub fn failing_classification(mut self) -> Self {
        self.fail_classification = true;
        self
    }

    pub fn failing_drafts(mut self) -> Self {
        self.fail_drafts = true;
        self
    }

    pub fn with_intents(self, intents: Vec<(Intent, Option<&str>)>) -> Self {
        lock(&self.intents).extend(intents.into_iter().map(|(i, t)| (i, t.map(str::to_string))));
        self
    }

    /// Size of each score batch received
    pub fn score_batches(&self) -> Vec<usize> {
        lock(&self.score_batches).clone()
    }

    /// `(original, reply)` pairs passed to classification
    pub fn classify_calls(&self) -> Vec<(String, String)> {
        lock(&self.classify_calls).clone()
    }

    pub fn draft_kinds(&self) -> Vec<&'static str> {
        lock(&self.draft_kinds).clone()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn score(&self, _credential: &Credential, leads: &[RawAttributes]) -> Result<Vec<LeadScore>, ReasoningError> {
        lock(&self.score_batches).push(leads.len());
        if self.fail_scores {
            return Err(scripted_failure("score"));
        }
        let mut scores: Vec<LeadScore> = leads
            .iter()
            .map(|attributes| {
                let score = attributes.get_i64("score").unwrap_or(80).clamp(0, 100) as u8;
                LeadScore {
                    score,
                    verdict: if score >= 70 { Verdict::Qualified } else { Verdict::NotQualified },
                    reasoning: format!("scripted score {}", score),
                    matched_criteria: Default::default(),
                }
            })
            .collect();
        if self.drop_last_score {
            scores.pop();
        }
        Ok(scores)
    }

    async fn classify_intent(
        &self,
        _credential: &Credential,
        original_message: &str,
        reply: &str,
    ) -> Result<IntentResult, ReasoningError> {
        lock(&self.classify_calls).push((original_message.to_string(), reply.to_string()));
        if self.fail_classification {
            return Err(scripted_failure("classification"));
        }
        let (intent, confirmed_time) = lock(&self.intents).pop_front().unwrap_or((Intent::Interested, None));
        Ok(IntentResult {
            intent,
            summary: format!("scripted {}", intent),
            confirmed_time,
        })
    }

    async fn draft_message(&self, _credential: &Credential, context: &DraftContext) -> Result<Draft, ReasoningError> {
        lock(&self.draft_kinds).push(context.kind());
        if self.fail_drafts {
            return Err(scripted_failure("draft"));
        }
        let draft = match context {
            DraftContext::Outreach { attributes, .. } => {
                let company = attributes.get_str("company").unwrap_or("your team");
                Draft {
                    subject: format!("An idea for {}", company),
                    body: format!("Hi, I had an idea for {}.", company),
                }
            }
            DraftContext::FollowUp { follow_up_number, .. } => Draft {
                subject: String::new(),
                body: format!("Just checking in (#{}).", follow_up_number),
            },
            DraftContext::SchedulingOffer { slots, .. } => Draft {
                subject: String::new(),
                body: format!("Here are {} times that work for us.", slots.len()),
            },
        };
        Ok(draft)
    }
}

/// A message handed to [`RecordingMailer`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Set for in-thread replies
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone)]
struct InboxMessage {
    from: String,
    reply: ReplyRef,
    body: String,
}

/// Mailbox that records outgoing mail and serves scripted replies
#[derive(Default)]
pub struct RecordingMailer {
    fail_sends: AtomicBool,
    next_id: AtomicU64,
    sent: Mutex<Vec<SentMail>>,
    inbox: Mutex<Vec<InboxMessage>>,
    marked_read: Mutex<Vec<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_sends(self) -> Self {
        self.fail_sends.store(true, Ordering::SeqCst);
        self
    }

    /// Queue an unread reply from `from`; returns its message id
    pub fn add_reply(&self, from: &str, thread_id: &str, body: &str) -> String {
        let id = format!("reply-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.inbox).push(InboxMessage {
            from: from.to_lowercase(),
            reply: ReplyRef {
                id: id.clone(),
                thread_id: thread_id.to_string(),
            },
            body: body.to_string(),
        });
        id
    }

    pub fn sent(&self) -> Vec<SentMail> {
        lock(&self.sent).clone()
    }

    pub fn marked_read(&self) -> Vec<String> {
        lock(&self.marked_read).clone()
    }

    fn record(&self, mail: SentMail) -> Result<SendReceipt, MailError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(MailError::Api {
                status: 503,
                message: "scripted send failure".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let thread_id = mail.thread_id.clone().unwrap_or_else(|| format!("thread-{}", n));
        lock(&self.sent).push(mail);
        Ok(SendReceipt {
            message_id: format!("msg-{}", n),
            thread_id,
        })
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<SendReceipt, MailError> {
        self.record(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            thread_id: None,
        })
    }

    async fn reply_in_thread(
        &self,
        thread_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<SendReceipt, MailError> {
        self.record(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            thread_id: Some(thread_id.to_string()),
        })
    }

    async fn search_replies(&self, from_address: &str) -> Result<Vec<ReplyRef>, MailError> {
        let from = from_address.to_lowercase();
        let read = lock(&self.marked_read).clone();
        Ok(lock(&self.inbox)
            .iter()
            .rev()
            .filter(|m| m.from == from && !read.contains(&m.reply.id))
            .map(|m| m.reply.clone())
            .collect())
    }

    async fn get_message_body(&self, id: &str) -> Result<String, MailError> {
        lock(&self.inbox)
            .iter()
            .find(|m| m.reply.id == id)
            .map(|m| m.body.clone())
            .ok_or_else(|| MailError::InvalidMessage(format!("no message {}", id)))
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailError> {
        lock(&self.marked_read).push(id.to_string());
        Ok(())
    }
}

/// An event created on [`FixedCalendar`]
#[derive(Debug, Clone, PartialEq)]
pub struct BookedEvent {
    pub summary: String,
    pub slot: TimeSlot,
    pub attendees: Vec<String>,
}

/// Calendar that always offers the same slots
pub struct FixedCalendar {
    slots: Vec<TimeSlot>,
    return_ids: bool,
    events: Mutex<Vec<BookedEvent>>,
}

impl FixedCalendar {
    pub fn new(slots: Vec<TimeSlot>) -> Self {
        Self {
            slots,
            return_ids: true,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Accept events without returning an id
    pub fn without_event_ids(mut self) -> Self {
        self.return_ids = false;
        self
    }

    pub fn events(&self) -> Vec<BookedEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl Calendar for FixedCalendar {
    async fn find_free_slots(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _duration_minutes: u32,
    ) -> Result<Vec<TimeSlot>, CalendarError> {
        Ok(self.slots.clone())
    }

    async fn create_event(
        &self,
        summary: &str,
        slot: TimeSlot,
        attendees: &[String],
    ) -> Result<Option<String>, CalendarError> {
        let mut events = lock(&self.events);
        events.push(BookedEvent {
            summary: summary.to_string(),
            slot,
            attendees: attendees.to_vec(),
        });
        Ok(self.return_ids.then(|| format!("event-{}", events.len())))
    }
}

pub fn collaborators(
    reasoning: Arc<dyn ReasoningService>,
    mailer: Arc<dyn Mailer>,
    calendar: Arc<dyn Calendar>,
) -> Collaborators {
    Collaborators {
        reasoning,
        mailer,
        calendar,
    }
}

/// Worker context with one test credential and a near-zero rate-limit interval
pub fn context() -> WorkerContext {
    let pool = CredentialPool::new(vec!["test-key".to_string()])
        .unwrap_or_else(|e| panic!("test credential pool: {}", e));
    let credential = pool.credentials()[0].clone();
    let limiter = Arc::new(RateLimiter::new(60_000, RateLimitScope::PerCredential));
    WorkerContext::new("worker-test".to_string(), credential, limiter, Arc::new(pool))
}

/// Lead with an `{id}@example.test` email, forced to `status`
pub fn lead_at(id: &str, status: LeadStatus) -> Lead {
    let mut attributes = RawAttributes::new();
    attributes.insert("email", format!("{}@example.test", id));
    attributes.insert("name", format!("Contact {}", id));
    let mut lead = Lead::new(id, attributes);
    lead.set_status(status);
    lead
}

/// [`lead_at`] with a score; qualified at 70 and above
pub fn scored_lead(id: &str, status: LeadStatus, score: u8) -> Lead {
    let mut lead = lead_at(id, status);
    lead.set_score(score, score >= 70);
    lead
}

/// Qualified lead whose history holds one outreach email
pub fn lead_with_outreach(id: &str, status: LeadStatus, thread_id: &str, subject: &str) -> Lead {
    let mut lead = scored_lead(id, status, 85);
    lead.message_subject = Some(subject.to_string());
    lead.personalized_message = Some("Hi, I had an idea.".to_string());
    let interaction = Interaction::new(
        InteractionKind::OutreachEmail,
        json!({
            "message_id": format!("msg-{}", id),
            "thread_id": thread_id,
            "subject": subject,
            "body": "Hi, I had an idea.",
        }),
    );
    lead.last_outreach_at = Some(interaction.timestamp);
    lead.push_interaction(interaction);
    lead
}
