//! Bounded concurrent dispatcher
//!
//! Runs work items on at most `max_workers` tokio tasks pulling from a shared
//! queue. Each item is processed in its own spawned task so a panic or error
//! is contained to that item: its leads get `Aborted` fallback outcomes and
//! sibling items carry on. Reports are collected in completion order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialPool;
use crate::domain::Lead;
use crate::lifecycle::{Stage, StageOutcome};
use crate::ratelimit::RateLimiter;
use crate::stages::StageWorker;

use super::context::WorkerContext;
use super::planner::WorkItem;

/// One lead and what the stage made of it
#[derive(Debug, Clone)]
pub struct LeadResult {
    pub lead: Lead,
    pub outcome: StageOutcome,
}

/// Result of one work item
#[derive(Debug, Clone)]
pub struct ItemReport {
    /// Position of the item in the submitted list
    pub index: usize,
    pub worker_id: String,
    pub results: Vec<LeadResult>,
    /// Set when the whole item fell back to `Aborted`
    pub error: Option<String>,
}

/// Runs a stage worker over work items concurrently
pub struct Dispatcher {
    pool: Arc<CredentialPool>,
    limiter: Arc<RateLimiter>,
    max_workers: usize,
}

impl Dispatcher {
    pub fn new(pool: Arc<CredentialPool>, limiter: Arc<RateLimiter>, max_workers: usize) -> Self {
        debug!(max_workers, "Dispatcher::new: called");
        Self {
            pool,
            limiter,
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Process every item, returning one report per item
    pub async fn run(&self, items: Vec<WorkItem>, worker: Arc<dyn StageWorker>) -> Vec<ItemReport> {
        let stage = worker.stage();
        let total = items.len();
        debug!(%stage, total, max_workers = self.max_workers, "run: called");
        if total == 0 {
            return Vec::new();
        }

        let width = self.max_workers.min(total);
        let mut pending: HashMap<usize, Vec<Lead>> = items
            .iter()
            .enumerate()
            .map(|(index, item)| (index, item.leads().to_vec()))
            .collect();
        let queue = Arc::new(Mutex::new(items.into_iter().enumerate().collect::<VecDeque<_>>()));
        let (tx, mut rx) = mpsc::unbounded_channel::<ItemReport>();

        let mut workers = JoinSet::new();
        for n in 1..=width {
            let worker_id = format!("worker-{}", n);
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let worker = Arc::clone(&worker);
            let pool = Arc::clone(&self.pool);
            let limiter = Arc::clone(&self.limiter);

            workers.spawn(async move {
                let credential = pool.acquire(&worker_id).await;
                debug!(%worker_id, credential = %credential, "worker started");
                let ctx = WorkerContext::new(worker_id, credential, limiter, pool);
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, item)) = next else {
                        break;
                    };
                    let report = run_item(&ctx, &worker, index, item).await;
                    if tx.send(report).is_err() {
                        break;
                    }
                }
                debug!(worker_id = %ctx.worker_id(), "worker finished");
            });
        }
        drop(tx);

        let mut reports = Vec::with_capacity(total);
        while let Some(report) = rx.recv().await {
            pending.remove(&report.index);
            reports.push(report);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(%stage, error = %e, "Dispatcher worker task died");
            }
        }

        // Items a dead worker never reported still get a fallback
        let mut orphans: Vec<(usize, Vec<Lead>)> = pending.into_iter().collect();
        orphans.sort_by_key(|(index, _)| *index);
        for (index, leads) in orphans {
            error!(%stage, index, "Work item never reported, aborting its leads");
            reports.push(fallback(index, "dispatcher", stage, leads, "worker exited before finishing the item"));
        }

        info!(%stage, items = total, workers = width, "Dispatch complete");
        reports
    }
}

async fn run_item(ctx: &WorkerContext, worker: &Arc<dyn StageWorker>, index: usize, item: WorkItem) -> ItemReport {
    let stage = worker.stage();
    let leads = item.into_leads();
    debug!(worker_id = %ctx.worker_id(), %stage, index, leads = leads.len(), "run_item: called");

    let task_ctx = ctx.clone();
    let task_worker = Arc::clone(worker);
    let task_leads = leads.clone();
    let joined = tokio::spawn(async move { task_worker.process(&task_ctx, &task_leads).await }).await;

    let error = match joined {
        Ok(Ok(outcomes)) if outcomes.len() == leads.len() => {
            let results = leads
                .into_iter()
                .zip(outcomes)
                .map(|(lead, outcome)| LeadResult { lead, outcome })
                .collect();
            return ItemReport {
                index,
                worker_id: ctx.worker_id().to_string(),
                results,
                error: None,
            };
        }
        Ok(Ok(outcomes)) => format!(
            "result count mismatch: expected {}, got {}",
            leads.len(),
            outcomes.len()
        ),
        Ok(Err(e)) => e.to_string(),
        Err(e) => describe_join_error(e),
    };

    warn!(worker_id = %ctx.worker_id(), %stage, index, %error, "Work item failed");
    fallback(index, ctx.worker_id(), stage, leads, &error)
}

fn fallback(index: usize, worker_id: &str, stage: Stage, leads: Vec<Lead>, error: &str) -> ItemReport {
    let results = leads
        .into_iter()
        .map(|lead| {
            let reason = format!("{} aborted for lead {}: {}", stage, lead.id(), error);
            LeadResult {
                lead,
                outcome: StageOutcome::aborted(reason),
            }
        })
        .collect();
    ItemReport {
        index,
        worker_id: worker_id.to_string(),
        results,
        error: Some(error.to_string()),
    }
}

fn describe_join_error(e: JoinError) -> String {
    if !e.is_panic() {
        return format!("worker task cancelled: {}", e);
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("worker panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::BatchPlanner;
    use crate::domain::{LeadStatus, RawAttributes};
    use crate::ratelimit::RateLimitScope;
    use crate::stages::StageError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails, panics or miscounts depending on the lead id
    struct ScriptedArchiver {
        running: AtomicUsize,
        peak: AtomicUsize,
        calls: std::sync::Mutex<Vec<(String, String)>>,
    }

    impl ScriptedArchiver {
        fn new() -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StageWorker for ScriptedArchiver {
        fn stage(&self) -> Stage {
            Stage::Archive
        }

        async fn process(&self, ctx: &WorkerContext, leads: &[Lead]) -> Result<Vec<StageOutcome>, StageError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((ctx.worker_id().to_string(), ctx.credential().label().to_string()));
            ctx.call(async { Ok::<_, StageError>(()) }).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let id = leads[0].id();
            match id {
                "lead-2" => Err(StageError::Validation("bad data".to_string())),
                "lead-4" => panic!("boom on lead-4"),
                "lead-6" => Ok(vec![]),
                _ => Ok(leads.iter().map(|_| StageOutcome::Archived).collect()),
            }
        }
    }

    fn leads(n: usize) -> Vec<Lead> {
        (0..n)
            .map(|i| {
                let mut lead = Lead::new(format!("lead-{}", i), RawAttributes::new());
                lead.set_status(LeadStatus::NotInterested);
                lead
            })
            .collect()
    }

    fn dispatcher(max_workers: usize) -> Dispatcher {
        let pool = CredentialPool::new(vec!["a".to_string(), "b".to_string()]).unwrap();
        Dispatcher::new(
            Arc::new(pool),
            Arc::new(RateLimiter::new(6000, RateLimitScope::PerCredential)),
            max_workers,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_items_do_not_affect_siblings() {
        let worker = Arc::new(ScriptedArchiver::new());
        let items = BatchPlanner::new(1).plan(leads(8)).into_work_items();
        let reports = dispatcher(3).run(items, worker.clone()).await;

        assert_eq!(reports.len(), 8);
        let mut indices: Vec<usize> = reports.iter().map(|r| r.index).collect();
        indices.sort();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());

        for report in &reports {
            let id = report.results[0].lead.id();
            let failed = matches!(id, "lead-2" | "lead-4" | "lead-6");
            assert_eq!(report.error.is_some(), failed, "{}", id);
            if failed {
                assert!(matches!(report.results[0].outcome, StageOutcome::Aborted { .. }));
            } else {
                assert_eq!(report.results[0].outcome, StageOutcome::Archived);
            }
        }

        let panicked = reports.iter().find(|r| r.index == 4).unwrap();
        assert!(panicked.error.as_deref().unwrap().contains("boom on lead-4"));
        let mismatch = reports.iter().find(|r| r.index == 6).unwrap();
        assert!(mismatch.error.as_deref().unwrap().contains("result count mismatch"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_is_bounded() {
        let worker = Arc::new(ScriptedArchiver::new());
        let items = BatchPlanner::new(1).plan(leads(10)).into_work_items();
        dispatcher(3).run(items, worker.clone()).await;
        assert!(worker.peak.load(Ordering::SeqCst) <= 3);
        assert!(worker.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_keeps_one_credential() {
        let worker = Arc::new(ScriptedArchiver::new());
        let items = BatchPlanner::new(1).plan(leads(9)).into_work_items();
        dispatcher(3).run(items, worker.clone()).await;

        let calls = worker.calls.lock().unwrap().clone();
        let mut bindings: HashMap<String, HashSet<String>> = HashMap::new();
        for (worker_id, label) in calls {
            bindings.entry(worker_id).or_default().insert(label);
        }
        assert!(bindings.len() <= 3);
        assert!(bindings.values().all(|labels| labels.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_fallback_gives_each_lead_its_own_error() {
        let worker = Arc::new(ScriptedArchiver::new());
        // lead-2 heads the second batch of two
        let items = BatchPlanner::new(2).plan(leads(4)).into_work_items();
        let reports = dispatcher(2).run(items, worker).await;

        let failed = reports.iter().find(|r| r.error.is_some()).unwrap();
        assert_eq!(failed.results.len(), 2);
        let reasons: Vec<String> = failed
            .results
            .iter()
            .map(|r| match &r.outcome {
                StageOutcome::Aborted { reason } => reason.clone(),
                other => panic!("unexpected outcome {:?}", other),
            })
            .collect();
        assert_ne!(reasons[0], reasons[1]);
        assert!(reasons[0].contains("lead-2"));
        assert!(reasons[1].contains("lead-3"));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let worker = Arc::new(ScriptedArchiver::new());
        let reports = dispatcher(3).run(Vec::new(), worker).await;
        assert!(reports.is_empty());
    }
}
