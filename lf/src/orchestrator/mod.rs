//! Orchestrator - top-level driver
//!
//! A run walks the stages in `Stage::RUN_ORDER`. Each stage loads its leads
//! from storage when it starts, plans them into work items, dispatches them,
//! then applies and persists every outcome one lead at a time. Because each
//! stage reloads, a lead produced by an earlier stage can be consumed by a
//! later one in the same run.

mod lock;
mod metrics;
mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::credentials::CredentialPool;
use crate::dispatch::{BatchPlanner, Dispatcher};
use crate::domain::Lead;
use crate::lifecycle::{LeadStateMachine, Stage, StageOutcome, TransitionError, ViolationKind};
use crate::ratelimit::RateLimiter;
use crate::stages::{Collaborators, StageWorker, worker_for};
use crate::state::{LeadStorage, StateError};

pub use lock::{LOCK_FILE_NAME, RunLock};
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use report::{RunReport, StageReport};

pub struct Orchestrator {
    config: Config,
    storage: Arc<dyn LeadStorage>,
    collaborators: Collaborators,
    pool: Arc<CredentialPool>,
    dispatcher: Dispatcher,
    machine: LeadStateMachine,
    lock_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        storage: Arc<dyn LeadStorage>,
        collaborators: Collaborators,
        pool: Arc<CredentialPool>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        debug!(max_workers = config.dispatch.max_workers, "Orchestrator::new: called");
        let dispatcher = Dispatcher::new(Arc::clone(&pool), limiter, config.dispatch.max_workers);
        let machine = LeadStateMachine::new(config.pipeline.qualification_threshold);
        Self {
            config,
            storage,
            collaborators,
            pool,
            dispatcher,
            machine,
            lock_dir: None,
        }
    }

    /// Hold `run.lock` in `dir` for every run
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    fn lock(&self) -> Result<Option<RunLock>> {
        self.lock_dir.as_deref().map(RunLock::acquire).transpose()
    }

    /// One full pass over every stage in run order
    pub async fn run_once(&self) -> Result<RunReport> {
        debug!("run_once: called");
        let _lock = self.lock()?;
        let started_at = Utc::now();
        let clock = Instant::now();
        let metrics = RunMetrics::new();
        info!("Run started");

        let mut stages = Vec::with_capacity(Stage::RUN_ORDER.len());
        for stage in Stage::RUN_ORDER {
            stages.push(self.execute_stage(stage, &metrics).await);
        }

        let report = RunReport {
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            stages,
            metrics: metrics.snapshot(),
            credentials: self.pool.stats().await,
        };
        info!(
            processed = report.processed(),
            failed = report.failed(),
            duration_ms = report.duration_ms,
            "Run complete"
        );
        Ok(report)
    }

    /// On-demand trigger for a single stage
    pub async fn run_stage(&self, stage: Stage) -> Result<StageReport> {
        debug!(%stage, "run_stage: called");
        let _lock = self.lock()?;
        let metrics = RunMetrics::new();
        Ok(self.execute_stage(stage, &metrics).await)
    }

    /// Leads at any of the stage's precondition statuses, in storage order
    async fn load(&self, stage: Stage) -> Result<Vec<Lead>, StateError> {
        let mut leads = Vec::new();
        for status in stage.preconditions() {
            leads.extend(self.storage.load_by_status(*status).await?);
        }
        Ok(leads)
    }

    async fn execute_stage(&self, stage: Stage, metrics: &RunMetrics) -> StageReport {
        debug!(%stage, "execute_stage: called");
        let mut report = StageReport::new(stage);

        let loaded = match self.load(stage).await {
            Ok(leads) => leads,
            Err(e) => {
                error!(%stage, error = %e, "Failed to load leads for stage");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let mut eligible = Vec::with_capacity(loaded.len());
        for lead in loaded {
            match self.machine.check(&lead, stage) {
                Ok(()) => eligible.push(lead),
                Err(e) => {
                    if !matches!(
                        e,
                        TransitionError::StateViolation {
                            kind: ViolationKind::Ineligible,
                            ..
                        }
                    ) {
                        warn!(%stage, error = %e, "Loaded lead fails the stage precondition");
                    }
                    report.skipped += 1;
                }
            }
        }

        let worker = worker_for(stage, &self.config, &self.collaborators);
        let ordered = worker.order(eligible);
        report.eligible = ordered.len();
        if ordered.is_empty() {
            debug!(%stage, "execute_stage: nothing to do");
            return report;
        }

        let plan = BatchPlanner::new(worker.batch_size()).plan(ordered);
        info!(
            %stage,
            leads = report.eligible,
            batches = plan.full_batches.len(),
            singles = plan.remainder.len(),
            "Dispatching stage"
        );
        let items = plan.into_work_items();
        let reports = self.dispatcher.run(items, Arc::clone(&worker)).await;

        for item in reports {
            if let Some(error) = &item.error {
                warn!(%stage, index = item.index, worker_id = %item.worker_id, %error, "Work item failed");
            }
            for result in item.results {
                self.apply(stage, &worker, result.lead, result.outcome, metrics, &mut report)
                    .await;
            }
        }

        info!(
            %stage,
            processed = report.processed,
            qualified = report.qualified,
            failed = report.failed,
            rejected = report.rejected,
            repeats = report.repeats,
            skipped = report.skipped,
            "Stage complete"
        );
        report
    }

    /// Transition, persist, then run the stage's post-commit hook
    async fn apply(
        &self,
        stage: Stage,
        worker: &Arc<dyn StageWorker>,
        lead: Lead,
        outcome: StageOutcome,
        metrics: &RunMetrics,
        report: &mut StageReport,
    ) {
        if outcome.is_skipped() {
            debug!(%stage, lead_id = %lead.id(), "apply: skipped");
            report.skipped += 1;
            return;
        }

        let next = match self.machine.transition(&lead, stage, &outcome) {
            Ok(next) => next,
            Err(e) if e.is_harmless_repeat() => {
                debug!(%stage, error = %e, "apply: repeat ignored");
                metrics.record_repeat();
                report.repeats += 1;
                return;
            }
            Err(e) => {
                error!(%stage, error = %e, "Transition rejected");
                metrics.record_rejected();
                report.rejected += 1;
                return;
            }
        };

        if let Err(e) = self.storage.persist(next.clone()).await {
            error!(%stage, lead_id = %next.id(), error = %e, "Failed to persist lead");
            metrics.record_failed();
            report.failed += 1;
            return;
        }

        metrics.record(&outcome, &next);
        if outcome.is_failure() {
            report.failed += 1;
        } else {
            report.processed += 1;
            if stage == Stage::Score && next.qualified() {
                report.qualified += 1;
            }
        }
        worker.committed(&next, &outcome).await;
    }

    /// Run immediately, then every `interval`, until `shutdown` fires
    pub async fn serve(&self, interval: Duration, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        debug!(interval_secs = interval.as_secs(), "serve: called");
        info!(interval_secs = interval.as_secs(), "Scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) => info!(
                            processed = report.processed(),
                            failed = report.failed(),
                            "Scheduled run finished"
                        ),
                        Err(e) => warn!(error = %e, "Scheduled run did not complete"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        debug!("serve: complete");
        Ok(())
    }
}
