//! Score stage: rate new leads against the ideal customer profile

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{Config, ScoringMode};
use crate::dispatch::WorkerContext;
use crate::domain::{Lead, RawAttributes};
use crate::lifecycle::{Stage, StageOutcome};
use crate::reasoning::{IcpScorer, LeadScore, ReasoningService};

use super::{StageError, StageWorker, lead_failure};

enum Backend {
    Reasoning(Arc<dyn ReasoningService>),
    Icp(IcpScorer),
}

pub struct Scorer {
    backend: Backend,
    batch_size: usize,
}

impl Scorer {
    pub fn new(reasoning: Arc<dyn ReasoningService>, config: &Config) -> Self {
        let backend = match (config.scoring.mode, &config.scoring.icp) {
            (ScoringMode::Icp, Some(icp)) => Backend::Icp(IcpScorer::new(icp.clone())),
            _ => Backend::Reasoning(reasoning),
        };
        Self {
            backend,
            batch_size: config.dispatch.batch_size.max(1),
        }
    }
}

fn scored(score: LeadScore) -> StageOutcome {
    StageOutcome::Scored {
        score: score.score,
        verdict: score.verdict,
        reasoning: score.reasoning,
        matched_criteria: score.matched_criteria,
    }
}

#[async_trait]
impl StageWorker for Scorer {
    fn stage(&self) -> Stage {
        Stage::Score
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn process(&self, ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
        debug!(worker_id = %ctx.worker_id(), leads = leads.len(), "Scorer::process: called");
        let reasoning = match &self.backend {
            Backend::Icp(icp) => return Ok(leads.iter().map(|l| scored(icp.score(&l.attributes))).collect()),
            Backend::Reasoning(reasoning) => reasoning,
        };

        let attributes: Vec<RawAttributes> = leads.iter().map(|l| l.attributes.clone()).collect();
        match ctx.call(reasoning.score(ctx.credential(), &attributes)).await {
            Ok(scores) if scores.len() == leads.len() => Ok(scores.into_iter().map(scored).collect()),
            Ok(scores) => {
                let error = format!("expected {} scores, got {}", leads.len(), scores.len());
                warn!(worker_id = %ctx.worker_id(), %error, "Score batch rejected");
                Ok(leads.iter().map(|l| lead_failure(Stage::Score, l, &error)).collect())
            }
            Err(e) => {
                warn!(worker_id = %ctx.worker_id(), error = %e, leads = leads.len(), "Score batch failed");
                Ok(leads.iter().map(|l| lead_failure(Stage::Score, l, &e)).collect())
            }
        }
    }
}
