//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Lead, LeadStatus};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<leadstore::StoreError> for StateError {
    fn from(e: leadstore::StoreError) -> Self {
        match e {
            leadstore::StoreError::AlreadyExists { collection, id } => Self::AlreadyExists(format!("{}/{}", collection, id)),
            leadstore::StoreError::NotFound { collection, id } => Self::NotFound(format!("{}/{}", collection, id)),
            leadstore::StoreError::Serialization(e) => Self::DeserializationError(e.to_string()),
            other => Self::StoreError(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    /// Insert a new lead; rejects duplicate ids
    ImportLead {
        lead: Lead,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetLead {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Lead>>>,
    },
    /// Insert or replace a lead
    PersistLead {
        lead: Lead,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListLeads {
        status_filter: Option<LeadStatus>,
        reply: oneshot::Sender<StateResponse<Vec<Lead>>>,
    },
    RebuildIndexes {
        reply: oneshot::Sender<StateResponse<usize>>,
    },

    // Shutdown
    Shutdown,
}
