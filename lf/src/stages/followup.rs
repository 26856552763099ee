//! Follow-up stages: flag silent leads, then nudge them in the same thread

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::WorkerContext;
use crate::domain::{InteractionKind, Lead};
use crate::lifecycle::{Stage, StageOutcome};
use crate::mail::{Mailer, reply_subject};
use crate::reasoning::{DraftContext, ReasoningService};

use super::{StageError, StageWorker, lead_failure, require_email};

pub struct FollowUpDetector {
    after_hours: i64,
    max_follow_ups: u32,
}

impl FollowUpDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            after_hours: i64::try_from(config.pipeline.follow_up_after_hours).unwrap_or(i64::MAX),
            max_follow_ups: config.pipeline.max_follow_ups,
        }
    }

    fn detect(&self, lead: &Lead) -> StageOutcome {
        if lead.follow_up_count >= self.max_follow_ups {
            return StageOutcome::skipped(format!("follow-up limit of {} reached", self.max_follow_ups));
        }
        let Some(last) = lead.last_outreach_at else {
            return StageOutcome::skipped("no outreach time recorded");
        };
        let silent_hours = (Utc::now() - last).num_hours();
        debug!(lead_id = %lead.id(), silent_hours, "FollowUpDetector::detect");
        if silent_hours >= self.after_hours {
            StageOutcome::FollowUpDue { silent_hours }
        } else {
            StageOutcome::skipped(format!("silent for {}h, follow-up due at {}h", silent_hours, self.after_hours))
        }
    }
}

#[async_trait]
impl StageWorker for FollowUpDetector {
    fn stage(&self) -> Stage {
        Stage::DetectFollowUp
    }

    async fn process(&self, _ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
        Ok(leads.iter().map(|lead| self.detect(lead)).collect())
    }
}

pub struct FollowUpSender {
    reasoning: Arc<dyn ReasoningService>,
    mailer: Arc<dyn Mailer>,
}

impl FollowUpSender {
    pub fn new(reasoning: Arc<dyn ReasoningService>, mailer: Arc<dyn Mailer>) -> Self {
        Self { reasoning, mailer }
    }

    async fn send_one(&self, ctx: &WorkerContext, lead: &Lead) -> StageOutcome {
        let to = match require_email(Stage::SendFollowUp, lead) {
            Ok(to) => to,
            Err(outcome) => return outcome,
        };
        let Some(original) = lead.last_interaction(InteractionKind::OutreachEmail) else {
            return lead_failure(Stage::SendFollowUp, lead, "no original outreach to follow up on");
        };
        let (Some(thread_id), Some(subject)) = (original.payload_str("thread_id"), original.payload_str("subject")) else {
            return lead_failure(Stage::SendFollowUp, lead, "original outreach has no thread");
        };

        let silent_hours = lead
            .last_outreach_at
            .map(|last| (Utc::now() - last).num_hours())
            .unwrap_or_default();
        let context = DraftContext::FollowUp {
            original_subject: subject.to_string(),
            original_body: original.payload_str("body").unwrap_or_default().to_string(),
            silent_hours,
            follow_up_number: lead.follow_up_count + 1,
        };
        let draft = match ctx.call(self.reasoning.draft_message(ctx.credential(), &context)).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(lead_id = %lead.id(), error = %e, "Drafting follow-up failed");
                return lead_failure(Stage::SendFollowUp, lead, e);
            }
        };

        match self
            .mailer
            .reply_in_thread(thread_id, to, &reply_subject(subject), &draft.body)
            .await
        {
            Ok(receipt) => {
                info!(lead_id = %lead.id(), number = lead.follow_up_count + 1, "Follow-up sent");
                StageOutcome::FollowUpSent {
                    message_id: receipt.message_id,
                    thread_id: receipt.thread_id,
                    body: draft.body,
                    sent_at: Utc::now(),
                }
            }
            Err(e) => lead_failure(Stage::SendFollowUp, lead, e),
        }
    }
}

#[async_trait]
impl StageWorker for FollowUpSender {
    fn stage(&self) -> Stage {
        Stage::SendFollowUp
    }

    async fn process(&self, ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
        let mut outcomes = Vec::with_capacity(leads.len());
        for lead in leads {
            outcomes.push(self.send_one(ctx, lead).await);
        }
        Ok(outcomes)
    }
}
