//! Personalize stage: draft the first outreach email for qualified leads

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::dispatch::WorkerContext;
use crate::domain::Lead;
use crate::lifecycle::{Stage, StageOutcome};
use crate::reasoning::{DraftContext, ReasoningService};

use super::{StageError, StageWorker, lead_failure};

pub struct Personalizer {
    reasoning: Arc<dyn ReasoningService>,
}

impl Personalizer {
    pub fn new(reasoning: Arc<dyn ReasoningService>) -> Self {
        Self { reasoning }
    }
}

#[async_trait]
impl StageWorker for Personalizer {
    fn stage(&self) -> Stage {
        Stage::Personalize
    }

    async fn process(&self, ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
        let mut outcomes = Vec::with_capacity(leads.len());
        for lead in leads {
            debug!(lead_id = %lead.id(), "Personalizer::process: drafting");
            let context = DraftContext::Outreach {
                attributes: lead.attributes.clone(),
                score_reasoning: lead.score_reasoning.clone(),
            };
            let outcome = match ctx.call(self.reasoning.draft_message(ctx.credential(), &context)).await {
                Ok(draft) if draft.subject.is_empty() => {
                    lead_failure(Stage::Personalize, lead, "draft has no subject line")
                }
                Ok(draft) => StageOutcome::MessageDrafted {
                    subject: draft.subject,
                    body: draft.body,
                },
                Err(e) => {
                    warn!(lead_id = %lead.id(), error = %e, "Drafting outreach failed");
                    lead_failure(Stage::Personalize, lead, e)
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LeadStatus;
    use crate::testing::{self, ScriptedReasoner};

    #[tokio::test]
    async fn test_drafts_outreach() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let worker = Personalizer::new(reasoner.clone());
        let mut lead = testing::lead_at("lead-1", LeadStatus::Scored);
        lead.attributes.insert("company", "Acme");

        let outcomes = worker.process(&testing::context(), &[lead]).await.unwrap();
        match &outcomes[0] {
            StageOutcome::MessageDrafted { subject, body } => {
                assert!(subject.contains("Acme"));
                assert!(!body.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(reasoner.draft_kinds(), vec!["outreach"]);
    }

    #[tokio::test]
    async fn test_draft_failure_is_per_lead() {
        let worker = Personalizer::new(Arc::new(ScriptedReasoner::new().failing_drafts()));
        let leads = vec![
            testing::lead_at("lead-1", LeadStatus::Scored),
            testing::lead_at("lead-2", LeadStatus::Scored),
        ];
        let outcomes = worker.process(&testing::context(), &leads).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(&outcomes[1], StageOutcome::Failed { reason } if reason.contains("lead-2")));
    }
}
