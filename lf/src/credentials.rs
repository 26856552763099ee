//! Credential pool
//!
//! Holds the interchangeable API keys for the reasoning service. Each worker
//! identity is bound to one key for its lifetime, first come first served in
//! round-robin order. Call and error counters are kept per key.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CredentialsConfig;

/// Errors from building the credential pool
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No credentials configured (looked for {0})")]
    NoCredentialsConfigured(String),
}

/// One API credential; only its label is ever printed
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    label: String,
    secret: String,
}

impl Credential {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("label", &self.label).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Usage snapshot for one credential
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialStats {
    pub label: String,
    pub calls: u64,
    pub errors: u64,
    pub error_rate: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    calls: u64,
    errors: u64,
}

#[derive(Debug)]
struct PoolInner {
    /// worker id -> credential index
    assignments: HashMap<String, usize>,
    counters: Vec<Counters>,
}

/// Set of credentials shared by the dispatcher's workers
#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    inner: Mutex<PoolInner>,
}

impl CredentialPool {
    /// Build a pool from raw secrets, labelled `key-1`, `key-2`, ...
    pub fn new(secrets: Vec<String>) -> Result<Self, CredentialError> {
        debug!(count = secrets.len(), "CredentialPool::new: called");
        let credentials: Vec<Credential> = secrets
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(index, secret)| Credential {
                index,
                label: format!("key-{}", index + 1),
                secret,
            })
            .collect();

        if credentials.is_empty() {
            return Err(CredentialError::NoCredentialsConfigured("explicit secret list".to_string()));
        }

        let counters = vec![Counters::default(); credentials.len()];
        Ok(Self {
            credentials,
            inner: Mutex::new(PoolInner {
                assignments: HashMap::new(),
                counters,
            }),
        })
    }

    /// Build a pool from the process environment
    pub fn from_env(config: &CredentialsConfig) -> Result<Self, CredentialError> {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }

    /// Build a pool using an arbitrary variable lookup
    ///
    /// With an explicit `env-vars` list, exactly those variables are read.
    /// Otherwise `{prefix}_1`, `{prefix}_2`, ... are scanned until the first
    /// missing index (at most `max-keys`), falling back to `{prefix}` itself.
    pub fn from_lookup<F>(config: &CredentialsConfig, lookup: F) -> Result<Self, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        debug!(prefix = %config.env_prefix, explicit = config.env_vars.len(), "from_lookup: called");
        let mut secrets = Vec::new();
        let searched;

        if config.env_vars.is_empty() {
            for i in 1..=config.max_keys {
                let name = format!("{}_{}", config.env_prefix, i);
                match lookup(&name) {
                    Some(value) => secrets.push(value),
                    None => {
                        debug!(%name, "from_lookup: scan stopped at missing variable");
                        break;
                    }
                }
            }
            if secrets.iter().all(|s| s.trim().is_empty()) {
                secrets.extend(lookup(&config.env_prefix));
            }
            searched = format!("{0}_1..{0}_{1} and {0}", config.env_prefix, config.max_keys);
        } else {
            for name in &config.env_vars {
                match lookup(name) {
                    Some(value) => secrets.push(value),
                    None => warn!(%name, "Configured credential variable is not set"),
                }
            }
            searched = config.env_vars.join(", ");
        }

        match Self::new(secrets) {
            Ok(pool) => {
                info!(count = pool.len(), "Loaded credentials");
                Ok(pool)
            }
            Err(_) => Err(CredentialError::NoCredentialsConfigured(searched)),
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Credentials in pool order
    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Credential bound to a worker identity
    ///
    /// The first request from a new worker assigns the next credential in
    /// round-robin order; later requests return the same one.
    pub async fn acquire(&self, worker_id: &str) -> Credential {
        debug!(%worker_id, "acquire: called");
        let mut inner = self.inner.lock().await;
        let next = inner.assignments.len() % self.credentials.len();
        let index = *inner.assignments.entry(worker_id.to_string()).or_insert(next);
        let credential = self.credentials[index].clone();
        debug!(%worker_id, credential = %credential, "acquire: assigned");
        credential
    }

    /// Record the outcome of one call made with a credential
    pub async fn record(&self, credential: &Credential, success: bool) {
        debug!(credential = %credential, success, "record: called");
        let mut inner = self.inner.lock().await;
        if let Some(counters) = inner.counters.get_mut(credential.index) {
            counters.calls += 1;
            if !success {
                counters.errors += 1;
            }
        }
    }

    /// Per-credential usage snapshot
    pub async fn stats(&self) -> Vec<CredentialStats> {
        debug!("stats: called");
        let inner = self.inner.lock().await;
        self.credentials
            .iter()
            .zip(inner.counters.iter())
            .map(|(credential, counters)| CredentialStats {
                label: credential.label.clone(),
                calls: counters.calls,
                errors: counters.errors,
                error_rate: counters.errors as f64 / counters.calls.max(1) as f64,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pool(n: usize) -> CredentialPool {
        CredentialPool::new((1..=n).map(|i| format!("secret-{}", i)).collect()).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        let err = CredentialPool::new(vec![" ".to_string()]).unwrap_err();
        assert!(matches!(err, CredentialError::NoCredentialsConfigured(_)));
    }

    #[tokio::test]
    async fn test_acquire_is_stable_per_worker() {
        let pool = pool(2);
        let first = pool.acquire("worker-1").await;
        for _ in 0..10 {
            assert_eq!(pool.acquire("worker-1").await, first);
        }
    }

    #[tokio::test]
    async fn test_acquire_round_robin_by_first_request() {
        let pool = pool(2);
        assert_eq!(pool.acquire("b").await.label(), "key-1");
        assert_eq!(pool.acquire("a").await.label(), "key-2");
        assert_eq!(pool.acquire("c").await.label(), "key-1");
        assert_eq!(pool.acquire("a").await.label(), "key-2");
    }

    #[tokio::test]
    async fn test_record_and_stats() {
        let pool = pool(2);
        let key = pool.acquire("w").await;
        pool.record(&key, true).await;
        pool.record(&key, true).await;
        pool.record(&key, false).await;
        pool.record(&key, true).await;

        let stats = pool.stats().await;
        assert_eq!(stats[0].calls, 4);
        assert_eq!(stats[0].errors, 1);
        assert!((stats[0].error_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(stats[1].calls, 0);
        assert_eq!(stats[1].error_rate, 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_not_lost() {
        let pool = Arc::new(pool(1));
        let key = pool.acquire("w").await;
        let mut handles = Vec::new();
        for i in 0..50 {
            let pool = Arc::clone(&pool);
            let key = key.clone();
            handles.push(tokio::spawn(async move { pool.record(&key, i % 5 != 0).await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let stats = pool.stats().await;
        assert_eq!(stats[0].calls, 50);
        assert_eq!(stats[0].errors, 10);
    }

    #[test]
    fn test_debug_hides_secret() {
        let pool = pool(1);
        let shown = format!("{:?} {}", pool.credentials[0], pool.credentials[0]);
        assert!(shown.contains("key-1"));
        assert!(!shown.contains("secret-1"));
    }

    #[test]
    fn test_from_lookup_scans_prefix_until_gap() {
        let config = CredentialsConfig::default();
        let vars: HashMap<&str, &str> = [("GROQ_API_KEY_1", "a"), ("GROQ_API_KEY_2", "b"), ("GROQ_API_KEY_4", "d")]
            .into_iter()
            .collect();
        let pool = CredentialPool::from_lookup(&config, |name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_from_lookup_falls_back_to_bare_prefix() {
        let config = CredentialsConfig::default();
        let pool = CredentialPool::from_lookup(&config, |name| (name == "GROQ_API_KEY").then(|| "x".to_string())).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_from_lookup_explicit_list() {
        let config = CredentialsConfig {
            env_vars: vec!["KEY_A".to_string(), "KEY_B".to_string()],
            ..Default::default()
        };
        let pool = CredentialPool::from_lookup(&config, |name| (name == "KEY_B").then(|| "b".to_string())).unwrap();
        assert_eq!(pool.len(), 1);

        let err = CredentialPool::from_lookup(&config, |_| None).unwrap_err();
        assert!(err.to_string().contains("KEY_A, KEY_B"));
    }
}
