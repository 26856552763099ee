//! Minimum-interval rate limiter
//!
//! `wait(key)` admits one call per interval per key. A waiter reserves its
//! slot while holding the lock and then sleeps outside it, so concurrent
//! waiters on the same key are admitted exactly one interval apart. Calls are
//! never rejected; back-pressure only shows up as latency.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const GLOBAL_KEY: &str = "global";

/// Which calls share an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitScope {
    /// One interval per credential
    #[default]
    PerCredential,
    /// One interval shared by every credential
    Global,
}

/// Limiter statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateLimiterStats {
    /// Calls admitted
    pub admitted: u64,
    /// Calls that had to sleep before admission
    pub delayed: u64,
    /// Total time spent sleeping across all calls
    pub total_wait_ms: u64,
}

struct LimiterInner {
    /// Earliest instant the next call under a key may start
    next_slot: HashMap<String, Instant>,
    stats: RateLimiterStats,
}

/// Paces calls to at most `max_per_minute` per key
pub struct RateLimiter {
    interval: Duration,
    scope: RateLimitScope,
    inner: Mutex<LimiterInner>,
}

impl RateLimiter {
    /// Create a limiter; a zero rate is treated as one call per minute
    pub fn new(max_per_minute: u32, scope: RateLimitScope) -> Self {
        debug!(max_per_minute, ?scope, "RateLimiter::new: called");
        let interval = Duration::from_secs(60) / max_per_minute.max(1);
        Self {
            interval,
            scope,
            inner: Mutex::new(LimiterInner {
                next_slot: HashMap::new(),
                stats: RateLimiterStats::default(),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn scope(&self) -> RateLimitScope {
        self.scope
    }

    /// Block until a call under `key` may proceed
    pub async fn wait(&self, key: &str) {
        let key = match self.scope {
            RateLimitScope::PerCredential => key,
            RateLimitScope::Global => GLOBAL_KEY,
        };

        let (admit_at, now) = {
            let mut inner = self.inner.lock().await;
            // Read after the lock so a contended waiter never reserves a past slot
            let now = Instant::now();
            let admit_at = match inner.next_slot.get(key) {
                Some(next) if *next > now => *next,
                _ => now,
            };
            inner.next_slot.insert(key.to_string(), admit_at + self.interval);
            inner.stats.admitted += 1;
            if admit_at > now {
                inner.stats.delayed += 1;
                inner.stats.total_wait_ms += (admit_at - now).as_millis() as u64;
            }
            (admit_at, now)
        };

        if admit_at > now {
            debug!(%key, wait_ms = (admit_at - now).as_millis() as u64, "wait: sleeping for slot");
            tokio::time::sleep_until(admit_at).await;
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        self.inner.lock().await.stats.clone()
    }
}
