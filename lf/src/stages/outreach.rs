//! Outreach stage: send the drafted email

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::dispatch::WorkerContext;
use crate::domain::Lead;
use crate::lifecycle::{Stage, StageOutcome};
use crate::mail::Mailer;

use super::{StageError, StageWorker, lead_failure, require_email};

pub struct OutreachSender {
    mailer: Arc<dyn Mailer>,
}

impl OutreachSender {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    async fn send_one(&self, lead: &Lead) -> StageOutcome {
        let to = match require_email(Stage::Outreach, lead) {
            Ok(to) => to,
            Err(outcome) => return outcome,
        };
        let (Some(subject), Some(body)) = (lead.message_subject.as_deref(), lead.personalized_message.as_deref()) else {
            return lead_failure(Stage::Outreach, lead, "no drafted message to send");
        };

        match self.mailer.send(to, subject, body).await {
            Ok(receipt) => {
                info!(lead_id = %lead.id(), %to, message_id = %receipt.message_id, "Outreach sent");
                StageOutcome::OutreachSent {
                    message_id: receipt.message_id,
                    thread_id: receipt.thread_id,
                    subject: subject.to_string(),
                    body: body.to_string(),
                    sent_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!(lead_id = %lead.id(), error = %e, "Outreach send failed");
                lead_failure(Stage::Outreach, lead, e)
            }
        }
    }
}

#[async_trait]
impl StageWorker for OutreachSender {
    fn stage(&self) -> Stage {
        Stage::Outreach
    }

    async fn process(&self, _ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
        let mut outcomes = Vec::with_capacity(leads.len());
        for lead in leads {
            outcomes.push(self.send_one(lead).await);
        }
        Ok(outcomes)
    }
}
