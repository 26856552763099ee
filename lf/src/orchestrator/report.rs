//! Per-stage and per-run reports

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::credentials::CredentialStats;
use crate::lifecycle::Stage;

use super::metrics::MetricsSnapshot;

/// Counts for one stage trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Leads dispatched to the stage worker
    pub eligible: usize,
    /// Successful transitions persisted
    pub processed: usize,
    /// Leads qualified by this stage
    pub qualified: usize,
    /// Failure outcomes persisted, plus leads that could not be stored
    pub failed: usize,
    /// Transitions refused by the state machine
    pub rejected: usize,
    /// Outcomes for leads that had already moved past the stage
    pub repeats: usize,
    /// Nothing to do yet, or not eligible
    pub skipped: usize,
    /// Set when the stage could not load its leads
    pub error: Option<String>,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            eligible: 0,
            processed: 0,
            qualified: 0,
            failed: 0,
            rejected: 0,
            repeats: 0,
            skipped: 0,
            error: None,
        }
    }
}

/// Result of one full pass over every stage
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stages: Vec<StageReport>,
    pub metrics: MetricsSnapshot,
    pub credentials: Vec<CredentialStats>,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.stages.iter().map(|s| s.processed).sum()
    }

    pub fn failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}
