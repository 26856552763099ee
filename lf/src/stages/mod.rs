//! Stage workers
//!
//! One worker per lifecycle stage. A worker turns leads into outcomes by
//! calling collaborators; it never changes a lead itself. The orchestrator
//! applies outcomes through the state machine and persists the results.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::calendar::{Calendar, CalendarError};
use crate::config::Config;
use crate::dispatch::WorkerContext;
use crate::domain::Lead;
use crate::lifecycle::{Stage, StageOutcome};
use crate::mail::{MailError, Mailer};
use crate::reasoning::{ReasoningError, ReasoningService};

mod archiver;
mod followup;
mod interpreter;
mod outreach;
mod personalizer;
mod scheduler;
mod scorer;

pub use archiver::Archiver;
pub use followup::{FollowUpDetector, FollowUpSender};
pub use interpreter::ReplyInterpreter;
pub use outreach::OutreachSender;
pub use personalizer::Personalizer;
pub use scheduler::{MeetingBooker, SlotOfferer};
pub use scorer::Scorer;

/// Errors that fail a whole work item
#[derive(Debug, Error)]
pub enum StageError {
    #[error("reasoning: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("mail: {0}")]
    Mail(#[from] MailError),

    #[error("calendar: {0}")]
    Calendar(#[from] CalendarError),

    #[error("validation: {0}")]
    Validation(String),
}

/// Processing function for one stage
#[async_trait]
pub trait StageWorker: Send + Sync {
    fn stage(&self) -> Stage;

    /// Leads per work item; the remainder is dispatched as singletons
    fn batch_size(&self) -> usize {
        1
    }

    /// Dispatch order for eligible leads
    fn order(&self, leads: Vec<Lead>) -> Vec<Lead> {
        leads
    }

    /// One outcome per lead, in input order
    async fn process(&self, ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError>;

    /// Runs after the lead's new state is persisted
    async fn committed(&self, _lead: &Lead, _outcome: &StageOutcome) {}
}

/// External services the stage workers call
#[derive(Clone)]
pub struct Collaborators {
    pub reasoning: Arc<dyn ReasoningService>,
    pub mailer: Arc<dyn Mailer>,
    pub calendar: Arc<dyn Calendar>,
}

/// Build the worker for a stage
pub fn worker_for(stage: Stage, config: &Config, collaborators: &Collaborators) -> Arc<dyn StageWorker> {
    let c = collaborators.clone();
    match stage {
        Stage::Score => Arc::new(Scorer::new(c.reasoning, config)),
        Stage::Personalize => Arc::new(Personalizer::new(c.reasoning)),
        Stage::Outreach => Arc::new(OutreachSender::new(c.mailer)),
        Stage::InterpretReply => Arc::new(ReplyInterpreter::new(c.reasoning, c.mailer)),
        Stage::OfferSlots => Arc::new(SlotOfferer::new(c.reasoning, c.mailer, c.calendar, config)),
        Stage::BookMeeting => Arc::new(MeetingBooker::new(c.calendar, config)),
        Stage::Archive => Arc::new(Archiver),
        Stage::DetectFollowUp => Arc::new(FollowUpDetector::new(config)),
        Stage::SendFollowUp => Arc::new(FollowUpSender::new(c.reasoning, c.mailer)),
    }
}

/// Per-lead failure with the lead named in the reason
pub(crate) fn lead_failure(stage: Stage, lead: &Lead, error: impl std::fmt::Display) -> StageOutcome {
    StageOutcome::failed(format!("{} failed for lead {}: {}", stage, lead.id(), error))
}

/// Lead email or a per-lead failure
///
/// The address lands in mail headers and provider search queries, so
/// whitespace and quotes are refused.
pub(crate) fn require_email(stage: Stage, lead: &Lead) -> Result<&str, StageOutcome> {
    let email = lead
        .email()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| lead_failure(stage, lead, "lead has no email address"))?;
    if email.contains(|c: char| c.is_whitespace() || c == '"') || !email.contains('@') {
        return Err(lead_failure(stage, lead, format!("invalid email address {:?}", email)));
    }
    Ok(email)
}
