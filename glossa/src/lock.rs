//! Short-lived mutual exclusion over broker keys.
//!
//! Locks are plain broker keys written with set-if-absent and a TTL, so a
//! crashed holder can never wedge the system: the key expires and the next
//! contender gets through. `unlock` deletes without checking the stored
//! owner token; callers are expected to pick TTLs comfortably longer than
//! their critical sections.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

use crate::broker::Broker;
use crate::task::now_local;

/// Poll interval while waiting for a contended lock.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Token stored in the lock key, identifying the holder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockToken {
    pub owner: String,
    pub acquired_at: NaiveDateTime,
}

/// Broker-backed lock service shared by the dispatcher, registry and
/// sweepers of one process.
pub struct LockService<B> {
    broker: Arc<B>,
    owner: String,
    default_ttl: Duration,
    default_wait: Duration,
}

impl<B: Broker> LockService<B> {
    /// Create a lock service with the documented default TTL (30 s) and
    /// wait (5 s).
    pub fn new(broker: Arc<B>) -> Self {
        Self::with_defaults(broker, Duration::from_secs(30), Duration::from_secs(5))
    }

    /// Create a lock service with explicit defaults.
    pub fn with_defaults(broker: Arc<B>, default_ttl: Duration, default_wait: Duration) -> Self {
        Self {
            broker,
            owner: format!("{}-{}", std::process::id(), uuid::Uuid::new_v4()),
            default_ttl,
            default_wait,
        }
    }

    /// Identity written into owner tokens by this service.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Try to take the lock, polling until `wait` has elapsed.
    ///
    /// Returns `false` when the key stayed held for the whole wait. A `wait`
    /// of zero makes exactly one attempt.
    pub async fn try_lock(&self, key: &str, ttl: Duration, wait: Duration) -> anyhow::Result<bool> {
        let token = LockToken {
            owner: self.owner.clone(),
            acquired_at: now_local(),
        };
        let payload = serde_json::to_string(&token)?;
        let deadline = Instant::now() + wait;

        loop {
            if self.broker.set_if_absent(key, &payload, ttl).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    /// Like [`try_lock`](Self::try_lock) with the service defaults.
    pub async fn try_lock_default(&self, key: &str) -> anyhow::Result<bool> {
        self.try_lock(key, self.default_ttl, self.default_wait).await
    }

    /// Release the lock. Best-effort and idempotent: failures are logged,
    /// releasing an unheld key is a no-op, and the stored owner token is
    /// not verified.
    pub async fn unlock(&self, key: &str) {
        if let Err(err) = self.broker.delete(key).await {
            warn!(key, "failed to release lock: {err:#}");
        }
    }

    /// Run `op` under the named lock and release it on any exit path.
    ///
    /// Returns `None` when the lock could not be acquired within `wait`, so
    /// callers can tell "ran" from "skipped".
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: &str,
        ttl: Duration,
        wait: Duration,
        op: F,
    ) -> anyhow::Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !self.try_lock(key, ttl, wait).await? {
            return Ok(None);
        }
        let result = op().await;
        self.unlock(key).await;
        result.map(Some)
    }
}
