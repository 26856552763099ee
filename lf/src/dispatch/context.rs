//! Per-worker execution context

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::credentials::{Credential, CredentialPool};
use crate::ratelimit::RateLimiter;

/// What a stage worker gets for one work item
///
/// The credential is bound to the worker for its whole lifetime. Every
/// reasoning call goes through [`WorkerContext::call`], which paces it on the
/// credential's rate-limit key and records the outcome in the pool.
#[derive(Clone)]
pub struct WorkerContext {
    worker_id: String,
    credential: Credential,
    limiter: Arc<RateLimiter>,
    pool: Arc<CredentialPool>,
}

impl WorkerContext {
    pub fn new(worker_id: String, credential: Credential, limiter: Arc<RateLimiter>, pool: Arc<CredentialPool>) -> Self {
        Self {
            worker_id,
            credential,
            limiter,
            pool,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Run one rate-limited external call
    ///
    /// The future is not polled until the limiter admits the call.
    pub async fn call<T, E, F>(&self, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.limiter.wait(self.credential.label()).await;
        debug!(worker_id = %self.worker_id, credential = %self.credential, "call: admitted");
        let result = call.await;
        self.pool.record(&self.credential, result.is_ok()).await;
        result
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker_id", &self.worker_id)
            .field("credential", &self.credential)
            .finish()
    }
}
