//! StateManager - actor that owns LeadStore
//!
//! Processes commands via channels, so writes from concurrent stage workers
//! are applied one at a time against a single SQLite connection.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{Filter, Lead, LeadStatus, Store};

use super::messages::{StateCommand, StateError, StateResponse};

/// Storage boundary used by the orchestrator and the CLI
#[async_trait]
pub trait LeadStorage: Send + Sync {
    /// Leads at a status, in import order
    async fn load_by_status(&self, status: LeadStatus) -> StateResponse<Vec<Lead>>;

    /// Upsert keyed by lead id
    async fn persist(&self, lead: Lead) -> StateResponse<()>;

    async fn get(&self, id: &str) -> StateResponse<Option<Lead>>;

    async fn list(&self) -> StateResponse<Vec<Lead>>;

    /// Create-only insert; a duplicate id is `StateError::AlreadyExists`
    async fn import(&self, lead: Lead) -> StateResponse<String>;
}

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor over a store directory
    pub fn spawn(store_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "spawn: called");
        let mut store = Store::open(store_path.as_ref())?;

        // Index layout may have changed since the records were written
        let lead_count = store.rebuild_indexes::<Lead>()?;
        info!(lead_count, "Rebuilt indexes for Lead records");

        Ok(Self::start(store))
    }

    /// Spawn an actor over a throwaway in-memory store
    pub fn spawn_in_memory() -> eyre::Result<Self> {
        debug!("spawn_in_memory: called");
        Ok(Self::start(Store::open_in_memory()?))
    }

    fn start(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// List leads, optionally restricted to one status
    pub async fn list_leads(&self, status_filter: Option<LeadStatus>) -> StateResponse<Vec<Lead>> {
        debug!(?status_filter, "list_leads: called");
        self.request(|reply| StateCommand::ListLeads { status_filter, reply })
            .await
    }

    /// Get a lead by ID, returning error if not found
    pub async fn get_lead_required(&self, id: &str) -> StateResponse<Lead> {
        debug!(%id, "get_lead_required: called");
        LeadStorage::get(self, id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("Lead {}", id)))
    }

    /// Number of leads per status
    pub async fn counts_by_status(&self) -> StateResponse<BTreeMap<LeadStatus, usize>> {
        debug!("counts_by_status: called");
        let mut counts = BTreeMap::new();
        for lead in self.list_leads(None).await? {
            *counts.entry(lead.status()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Rebuild indexes for all leads
    pub async fn rebuild_indexes(&self) -> StateResponse<usize> {
        debug!("rebuild_indexes: called");
        self.request(|reply| StateCommand::RebuildIndexes { reply }).await
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

#[async_trait]
impl LeadStorage for StateManager {
    async fn load_by_status(&self, status: LeadStatus) -> StateResponse<Vec<Lead>> {
        debug!(%status, "load_by_status: called");
        self.list_leads(Some(status)).await
    }

    async fn persist(&self, lead: Lead) -> StateResponse<()> {
        debug!(lead_id = %lead.id(), status = %lead.status(), "persist: called");
        self.request(|reply| StateCommand::PersistLead { lead, reply }).await
    }

    async fn get(&self, id: &str) -> StateResponse<Option<Lead>> {
        debug!(%id, "get: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetLead { id, reply }).await
    }

    async fn list(&self) -> StateResponse<Vec<Lead>> {
        self.list_leads(None).await
    }

    async fn import(&self, lead: Lead) -> StateResponse<String> {
        debug!(lead_id = %lead.id(), "import: called");
        self.request(|reply| StateCommand::ImportLead { lead, reply }).await
    }
}

/// The actor loop that processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::ImportLead { lead, reply } => {
                debug!(lead_id = %lead.id(), "actor_loop: ImportLead command");
                let result = store.create(lead).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::GetLead { id, reply } => {
                debug!(%id, "actor_loop: GetLead command");
                let result: StateResponse<Option<Lead>> = store.get(&id).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::PersistLead { lead, reply } => {
                debug!(lead_id = %lead.id(), "actor_loop: PersistLead command");
                let result = store.upsert(lead).map_err(StateError::from);
                if let Err(e) = &result {
                    warn!(error = %e, "actor_loop: persist failed");
                }
                let _ = reply.send(result);
            }

            StateCommand::ListLeads { status_filter, reply } => {
                debug!(?status_filter, "actor_loop: ListLeads command");
                let filters: Vec<Filter> = status_filter
                    .map(|status| Filter::eq("status", status.as_str()))
                    .into_iter()
                    .collect();
                let result: StateResponse<Vec<Lead>> = store.list(&filters).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::RebuildIndexes { reply } => {
                debug!("actor_loop: RebuildIndexes command");
                let result = store.rebuild_indexes::<Lead>().map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawAttributes;
    use tempfile::tempdir;

    fn lead(id: &str) -> Lead {
        let mut attrs = RawAttributes::new();
        attrs.insert("email", format!("{}@example.test", id));
        Lead::new(id, attrs)
    }

    #[tokio::test]
    async fn test_state_manager_lead_crud() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        // Import
        let id = manager.import(lead("lead-a")).await.unwrap();
        assert_eq!(id, "lead-a");

        // Get
        let retrieved = manager.get("lead-a").await.unwrap().unwrap();
        assert_eq!(retrieved.status(), LeadStatus::New);

        // Persist over the existing record
        let mut updated = retrieved.clone();
        updated.set_status(LeadStatus::Scored);
        manager.persist(updated).await.unwrap();
        let retrieved = manager.get_lead_required("lead-a").await.unwrap();
        assert_eq!(retrieved.status(), LeadStatus::Scored);

        // List
        assert_eq!(manager.list().await.unwrap().len(), 1);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_import_rejected() {
        let manager = StateManager::spawn_in_memory().unwrap();
        manager.import(lead("lead-a")).await.unwrap();
        let err = manager.import(lead("lead-a")).await.unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_load_by_status_keeps_import_order() {
        let manager = StateManager::spawn_in_memory().unwrap();
        for id in ["lead-c", "lead-a", "lead-b"] {
            manager.import(lead(id)).await.unwrap();
        }
        let mut moved = manager.get_lead_required("lead-a").await.unwrap();
        moved.set_status(LeadStatus::Scored);
        manager.persist(moved).await.unwrap();

        let new: Vec<String> = manager
            .load_by_status(LeadStatus::New)
            .await
            .unwrap()
            .iter()
            .map(|l| l.id().to_string())
            .collect();
        assert_eq!(new, vec!["lead-c", "lead-b"]);

        let counts = manager.counts_by_status().await.unwrap();
        assert_eq!(counts.get(&LeadStatus::New), Some(&2));
        assert_eq!(counts.get(&LeadStatus::Scored), Some(&1));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let manager = StateManager::spawn_in_memory().unwrap();
        assert!(manager.get("missing").await.unwrap().is_none());
        assert!(matches!(
            manager.get_lead_required("missing").await,
            Err(StateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_keeps_leads() {
        let temp = tempdir().unwrap();
        {
            let manager = StateManager::spawn(temp.path()).unwrap();
            manager.import(lead("lead-a")).await.unwrap();
            manager.shutdown().await.unwrap();
        }
        let manager = StateManager::spawn(temp.path()).unwrap();
        assert!(manager.get("lead-a").await.unwrap().is_some());
        assert_eq!(manager.rebuild_indexes().await.unwrap(), 1);
    }
}
