//! Reply interpretation stage: classify the newest readable unread reply

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::dispatch::WorkerContext;
use crate::domain::{InteractionKind, Lead};
use crate::lifecycle::{Stage, StageOutcome};
use crate::mail::Mailer;
use crate::reasoning::ReasoningService;

use super::{StageError, StageWorker, lead_failure, require_email};

pub struct ReplyInterpreter {
    reasoning: Arc<dyn ReasoningService>,
    mailer: Arc<dyn Mailer>,
}

impl ReplyInterpreter {
    pub fn new(reasoning: Arc<dyn ReasoningService>, mailer: Arc<dyn Mailer>) -> Self {
        Self { reasoning, mailer }
    }

    /// Last message we sent in the conversation
    fn original_message(lead: &Lead) -> String {
        lead.history()
            .iter()
            .rev()
            .filter(|i| {
                matches!(
                    i.kind,
                    InteractionKind::OutreachEmail | InteractionKind::FollowUpEmail | InteractionKind::OutboundScheduling
                )
            })
            .find_map(|i| i.payload_str("body"))
            .or(lead.personalized_message.as_deref())
            .unwrap_or_default()
            .to_string()
    }

    async fn interpret_one(&self, ctx: &WorkerContext, lead: &Lead) -> StageOutcome {
        let from = match require_email(Stage::InterpretReply, lead) {
            Ok(from) => from,
            Err(outcome) => return outcome,
        };

        let replies = match self.mailer.search_replies(from).await {
            Ok(replies) => replies,
            Err(e) => {
                warn!(lead_id = %lead.id(), error = %e, "Reply search failed");
                return lead_failure(Stage::InterpretReply, lead, e);
            }
        };
        // Newest first; empty messages carry nothing to classify and are cleared
        let mut readable = None;
        for reply in replies {
            match self.mailer.get_message_body(&reply.id).await {
                Ok(body) if body.trim().is_empty() => {
                    debug!(lead_id = %lead.id(), message_id = %reply.id, "ReplyInterpreter: empty reply cleared");
                    if let Err(e) = self.mailer.mark_read(&reply.id).await {
                        warn!(lead_id = %lead.id(), message_id = %reply.id, error = %e, "Failed to clear empty reply");
                    }
                }
                Ok(body) => {
                    readable = Some((reply, body));
                    break;
                }
                Err(e) => return lead_failure(Stage::InterpretReply, lead, e),
            }
        }
        let Some((reply, body)) = readable else {
            debug!(lead_id = %lead.id(), "ReplyInterpreter: no unread reply");
            return StageOutcome::skipped("no reply yet");
        };

        let original = Self::original_message(lead);
        match ctx
            .call(self.reasoning.classify_intent(ctx.credential(), &original, &body))
            .await
        {
            Ok(result) => {
                info!(lead_id = %lead.id(), intent = %result.intent, "Reply classified");
                StageOutcome::ReplyClassified {
                    message_id: reply.id,
                    thread_id: reply.thread_id,
                    body,
                    intent: result.intent,
                    summary: result.summary,
                    confirmed_time: result.confirmed_time,
                }
            }
            Err(e) => {
                warn!(lead_id = %lead.id(), error = %e, "Intent classification failed");
                lead_failure(Stage::InterpretReply, lead, e)
            }
        }
    }
}

#[async_trait]
impl StageWorker for ReplyInterpreter {
    fn stage(&self) -> Stage {
        Stage::InterpretReply
    }

    async fn process(&self, ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
        let mut outcomes = Vec::with_capacity(leads.len());
        for lead in leads {
            outcomes.push(self.interpret_one(ctx, lead).await);
        }
        Ok(outcomes)
    }

    /// The reply is marked read only once its classification is stored
    async fn committed(&self, lead: &Lead, outcome: &StageOutcome) {
        if let StageOutcome::ReplyClassified { message_id, .. } = outcome
            && let Err(e) = self.mailer.mark_read(message_id).await
        {
            warn!(lead_id = %lead.id(), %message_id, error = %e, "Failed to mark reply as read");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Intent, LeadStatus};
    use crate::testing::{self, RecordingMailer, ScriptedReasoner};

    #[tokio::test]
    async fn test_no_reply_is_skipped() {
        let worker = ReplyInterpreter::new(Arc::new(ScriptedReasoner::new()), Arc::new(RecordingMailer::new()));
        let outcomes = worker
            .process(&testing::context(), &[testing::lead_at("lead-1", LeadStatus::OutreachSent)])
            .await
            .unwrap();
        assert!(outcomes[0].is_skipped());
    }

    #[tokio::test]
    async fn test_classifies_reply_against_original() {
        let reasoner = Arc::new(ScriptedReasoner::new().with_intents(vec![(Intent::NotInterested, None)]));
        let mailer = Arc::new(RecordingMailer::new());
        let reply_id = mailer.add_reply("lead-1@example.test", "thread-9", "No thanks, not for us.");
        let worker = ReplyInterpreter::new(reasoner.clone(), mailer.clone());

        let mut lead = testing::lead_at("lead-1", LeadStatus::OutreachSent);
        lead.personalized_message = Some("Would you like a demo?".to_string());
        let outcomes = worker.process(&testing::context(), &[lead.clone()]).await.unwrap();

        match &outcomes[0] {
            StageOutcome::ReplyClassified {
                message_id,
                thread_id,
                intent,
                body,
                ..
            } => {
                assert_eq!(message_id, &reply_id);
                assert_eq!(thread_id, "thread-9");
                assert_eq!(*intent, Intent::NotInterested);
                assert_eq!(body, "No thanks, not for us.");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            reasoner.classify_calls(),
            vec![("Would you like a demo?".to_string(), "No thanks, not for us.".to_string())]
        );

        // nothing is marked read until the outcome is committed
        assert!(mailer.marked_read().is_empty());
        worker.committed(&lead, &outcomes[0]).await;
        assert_eq!(mailer.marked_read(), vec![reply_id]);
    }

    #[tokio::test]
    async fn test_empty_newest_reply_does_not_block_older_one() {
        let reasoner = Arc::new(ScriptedReasoner::new().with_intents(vec![(Intent::Interested, None)]));
        let mailer = Arc::new(RecordingMailer::new());
        let real = mailer.add_reply("lead-1@example.test", "thread-9", "Yes, let's talk");
        let empty = mailer.add_reply("lead-1@example.test", "thread-9", "  \n ");
        let worker = ReplyInterpreter::new(reasoner, mailer.clone());

        let lead = testing::lead_at("lead-1", LeadStatus::OutreachSent);
        let outcomes = worker.process(&testing::context(), &[lead]).await.unwrap();
        assert!(matches!(&outcomes[0], StageOutcome::ReplyClassified { message_id, .. } if *message_id == real));
        assert_eq!(mailer.marked_read(), vec![empty]);
    }

    #[tokio::test]
    async fn test_only_empty_reply_is_cleared_and_skipped() {
        let mailer = Arc::new(RecordingMailer::new());
        let empty = mailer.add_reply("lead-1@example.test", "thread-9", "");
        let worker = ReplyInterpreter::new(Arc::new(ScriptedReasoner::new()), mailer.clone());

        let lead = testing::lead_at("lead-1", LeadStatus::OutreachSent);
        let outcomes = worker.process(&testing::context(), &[lead.clone()]).await.unwrap();
        assert!(outcomes[0].is_skipped());
        assert_eq!(mailer.marked_read(), vec![empty]);

        // The next run sees no unread reply at all
        let outcomes = worker.process(&testing::context(), &[lead]).await.unwrap();
        assert!(outcomes[0].is_skipped());
        assert_eq!(mailer.marked_read().len(), 1);
    }

    #[tokio::test]
    async fn test_classification_failure_names_lead() {
        let reasoner = Arc::new(ScriptedReasoner::new().failing_classification());
        let mailer = Arc::new(RecordingMailer::new());
        mailer.add_reply("lead-7@example.test", "t", "Sure, call me");
        let worker = ReplyInterpreter::new(reasoner, mailer.clone());

        let lead = testing::lead_at("lead-7", LeadStatus::OutreachSent);
        let outcomes = worker.process(&testing::context(), &[lead.clone()]).await.unwrap();
        assert!(matches!(&outcomes[0], StageOutcome::Failed { reason } if reason.contains("lead-7")));

        worker.committed(&lead, &outcomes[0]).await;
        assert!(mailer.marked_read().is_empty());
    }
}
