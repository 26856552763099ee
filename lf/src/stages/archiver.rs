//! Archive stage: close out leads that declined or were the wrong contact

use async_trait::async_trait;
use tracing::info;

use crate::dispatch::WorkerContext;
use crate::domain::Lead;
use crate::lifecycle::{Stage, StageOutcome};

use super::{StageError, StageWorker};

pub struct Archiver;

#[async_trait]
impl StageWorker for Archiver {
    fn stage(&self) -> Stage {
        Stage::Archive
    }

    async fn process(&self, _ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
        Ok(leads
            .iter()
            .map(|lead| {
                info!(lead_id = %lead.id(), status = %lead.status(), "Archiving lead");
                StageOutcome::Archived
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LeadStatus;
    use crate::testing;

    #[tokio::test]
    async fn test_archives_every_lead() {
        let leads = vec![
            testing::lead_at("lead-1", LeadStatus::NotInterested),
            testing::lead_at("lead-2", LeadStatus::WrongPerson),
        ];
        let outcomes = Archiver.process(&testing::context(), &leads).await.unwrap();
        assert_eq!(outcomes, vec![StageOutcome::Archived, StageOutcome::Archived]);
    }
}
