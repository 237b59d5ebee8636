//! Coordination lock: named, TTL-bounded mutual exclusion across processes.
//!
//! Ownership is proven by an opaque random token stored as the key's value.
//! Release and renew only act when the presented token matches, so a holder
//! whose lock expired (and was taken by someone else) can never delete or
//! extend the new holder's lock.
//!
//! | operation | token matches | token differs / key gone |
//! |-----------|---------------|--------------------------|
//! | `acquire` | n/a           | `Ok(None)` when held     |
//! | `release` | `Ok(true)`    | `Ok(false)`              |
//! | `renew`   | `Ok(())`      | `Err(LockError::Lost)`   |

pub mod store;

#[cfg(feature = "redis")]
pub mod redis_store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use sentinel_observability::{LockOutcome, MonitorMetrics};

use crate::config::LockConfig;
use crate::shutdown::wait_for_stop;

pub use store::{CoordinationStore, InMemoryCoordinationStore, StoreError};

#[cfg(feature = "redis")]
pub use redis_store::RedisCoordinationStore;

/// TTL added per unit of weight.
pub const WEIGHT_STEP: Duration = Duration::from_millis(500);

/// Shortest pause between automatic renewals.
const MIN_RENEW_CADENCE: Duration = Duration::from_millis(10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The key expired or now belongs to someone else; stop working at once.
    #[error("lock lost: {key}")]
    Lost { key: String },
}

/// Proof of ownership returned by a successful acquire.
#[derive(Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: String,
    token: String,
    pub ttl: Duration,
    pub acquired_at: Instant,
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("acquired_at", &self.acquired_at)
            .finish_non_exhaustive()
    }
}

impl LockHandle {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Expiry as last set by acquire (renewals extend it on the store side).
    pub fn expires_at(&self) -> Instant {
        self.acquired_at + self.ttl
    }
}

#[derive(Clone)]
pub struct CoordinationLock {
    store: Arc<dyn CoordinationStore>,
    base_ttl: Duration,
    max_ttl: Duration,
    metrics: Arc<dyn MonitorMetrics>,
}

impl std::fmt::Debug for CoordinationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationLock")
            .field("base_ttl", &self.base_ttl)
            .field("max_ttl", &self.max_ttl)
            .finish_non_exhaustive()
    }
}

impl CoordinationLock {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        config: &LockConfig,
        metrics: Arc<dyn MonitorMetrics>,
    ) -> Self {
        Self {
            store,
            base_ttl: config.base_ttl,
            max_ttl: config.max_ttl.max(config.base_ttl),
            metrics,
        }
    }

    /// `min(base + weight * 500ms, max)`.
    pub fn ttl_for(&self, weight: u32) -> Duration {
        self.base_ttl
            .saturating_add(WEIGHT_STEP.saturating_mul(weight))
            .min(self.max_ttl)
    }

    /// Try to take `key`. `Ok(None)` means another holder owns it, which is
    /// a normal contention signal rather than a failure.
    pub async fn acquire(&self, key: &str, weight: u32) -> Result<Option<LockHandle>, LockError> {
        let ttl = self.ttl_for(weight);
        let token = Uuid::new_v4().simple().to_string();

        let acquired = self
            .store
            .set_if_absent(key, &token, ttl)
            .await
            .inspect_err(|_| self.metrics.record_lock(LockOutcome::StoreError))?;

        if !acquired {
            debug!(lock_key = %key, "lock held elsewhere");
            self.metrics.record_lock(LockOutcome::Contended);
            return Ok(None);
        }

        debug!(lock_key = %key, ttl_ms = ttl.as_millis() as u64, "lock acquired");
        self.metrics.record_lock(LockOutcome::Acquired);
        Ok(Some(LockHandle {
            key: key.to_string(),
            token,
            ttl,
            acquired_at: Instant::now(),
        }))
    }

    /// Release the lock. Returns `false` when it had already expired or
    /// passed to another holder; that is not an error.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let released = self
            .store
            .compare_and_delete(&handle.key, &handle.token)
            .await
            .inspect_err(|_| self.metrics.record_lock(LockOutcome::StoreError))?;

        if released {
            debug!(lock_key = %handle.key, "lock released");
            self.metrics.record_lock(LockOutcome::Released);
        } else {
            warn!(lock_key = %handle.key, "lock already gone at release");
            self.metrics.record_lock(LockOutcome::AlreadyGone);
        }
        Ok(released)
    }

    /// Extend the lock to `ttl` from now. Fails with [`LockError::Lost`] when
    /// the caller no longer owns it.
    pub async fn renew(&self, handle: &LockHandle, ttl: Duration) -> Result<(), LockError> {
        let renewed = self
            .store
            .compare_and_expire(&handle.key, &handle.token, ttl)
            .await
            .inspect_err(|_| self.metrics.record_lock(LockOutcome::StoreError))?;

        if !renewed {
            warn!(lock_key = %handle.key, "lock lost at renew");
            self.metrics.record_lock(LockOutcome::Lost);
            return Err(LockError::Lost {
                key: handle.key.clone(),
            });
        }

        self.metrics.record_lock(LockOutcome::Renewed);
        Ok(())
    }

    /// Renew every `ttl / 2` until `stop` fires. The first failed renewal ends
    /// the loop with that error; there is no retry.
    pub async fn auto_renew(
        &self,
        handle: &LockHandle,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), LockError> {
        let cadence = (handle.ttl / 2).max(MIN_RENEW_CADENCE);
        loop {
            tokio::select! {
                _ = wait_for_stop(&mut stop) => return Ok(()),
                _ = tokio::time::sleep(cadence) => {
                    self.renew(handle, handle.ttl).await?;
                }
            }
        }
    }
}

/// Releases its lock when dropped without an explicit [`LockGuard::release`].
///
/// Dropping spawns the release onto the current runtime, so a unit of work
/// abandoned at a deadline still gives its key back.
#[derive(Debug)]
pub struct LockGuard {
    lock: CoordinationLock,
    handle: Option<LockHandle>,
}

impl LockGuard {
    pub fn new(lock: CoordinationLock, handle: LockHandle) -> Self {
        Self {
            lock,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    pub async fn release(mut self) -> Result<bool, LockError> {
        match self.handle.take() {
            Some(handle) => self.lock.release(&handle).await,
            None => Ok(false),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let lock = self.lock.clone();
                runtime.spawn(async move {
                    if let Err(err) = lock.release(&handle).await {
                        warn!(lock_key = %handle.key, error = %err, "background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(lock_key = %handle.key, "no runtime to release lock; it will expire on its own");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::stop_channel;
    use proptest::prelude::*;
    use sentinel_observability::{InMemoryMetrics, NoopMetrics};

    fn lock_with(store: Arc<InMemoryCoordinationStore>, base: Duration, max: Duration) -> CoordinationLock {
        CoordinationLock::new(
            store,
            &LockConfig {
                base_ttl: base,
                max_ttl: max,
            },
            Arc::new(NoopMetrics),
        )
    }

    fn default_lock(store: Arc<InMemoryCoordinationStore>) -> CoordinationLock {
        lock_with(store, Duration::from_secs(60), Duration::from_secs(300))
    }

    #[test]
    fn ttl_scales_with_weight_up_to_the_cap() {
        let lock = default_lock(Arc::new(InMemoryCoordinationStore::new()));
        assert_eq!(lock.ttl_for(0), Duration::from_secs(60));
        assert_eq!(lock.ttl_for(100), Duration::from_secs(110));
        assert_eq!(lock.ttl_for(1000), Duration::from_secs(300));
        assert_eq!(lock.ttl_for(u32::MAX), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn handle_debug_hides_the_token() {
        let lock = default_lock(Arc::new(InMemoryCoordinationStore::new()));
        let handle = lock.acquire("complaint:lock:T9", 0).await.unwrap().unwrap();

        let printed = format!("{handle:?}");
        assert!(printed.contains("complaint:lock:T9"));
        assert!(!printed.contains(handle.token()));
        let guarded = format!("{:?}", LockGuard::new(lock.clone(), handle.clone()));
        assert!(!guarded.contains(handle.token()));
        lock.release(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn exactly_one_concurrent_acquirer_wins() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let lock = default_lock(store.clone());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let lock = lock.clone();
            tasks.push(tokio::spawn(async move {
                lock.acquire("complaint:lock:T1", 1).await.unwrap()
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            if let Some(handle) = task.await.unwrap() {
                winners.push(handle);
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(store.holder("complaint:lock:T1").as_deref(), Some(winners[0].token()));

        assert!(lock.release(&winners[0]).await.unwrap());
        assert!(lock.acquire("complaint:lock:T1", 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_holder_cannot_release_or_renew() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let lock = default_lock(store.clone());

        let stale = lock.acquire("k", 0).await.unwrap().unwrap();
        store.overwrite("k", "someone-else", Duration::from_secs(60));

        assert!(!lock.release(&stale).await.unwrap());
        assert_eq!(store.holder("k").as_deref(), Some("someone-else"));

        let err = lock.renew(&stale, Duration::from_secs(60)).await.unwrap_err();
        assert_eq!(err, LockError::Lost { key: "k".into() });
        assert_eq!(store.holder("k").as_deref(), Some("someone-else"));
    }

    #[tokio::test]
    async fn release_after_expiry_is_not_an_error() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let lock = lock_with(store, Duration::from_millis(20), Duration::from_millis(20));

        let handle = lock.acquire("k", 0).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!lock.release(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn auto_renew_keeps_the_lock_alive_until_stopped() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let lock = CoordinationLock::new(
            store.clone(),
            &LockConfig {
                base_ttl: Duration::from_millis(80),
                max_ttl: Duration::from_millis(80),
            },
            metrics.clone(),
        );

        let handle = lock.acquire("k", 0).await.unwrap().unwrap();
        let (stop_tx, stop_rx) = stop_channel();
        let renewer = {
            let lock = lock.clone();
            let handle = handle.clone();
            tokio::spawn(async move { lock.auto_renew(&handle, stop_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.holder("k").as_deref(), Some(handle.token()));

        stop_tx.send(true).unwrap();
        renewer.await.unwrap().unwrap();
        assert!(metrics.snapshot().lock_count(LockOutcome::Renewed) >= 2);
    }

    #[tokio::test]
    async fn auto_renew_fails_fast_when_ownership_is_lost() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let lock = lock_with(store.clone(), Duration::from_millis(60), Duration::from_millis(60));

        let handle = lock.acquire("k", 0).await.unwrap().unwrap();
        store.overwrite("k", "intruder", Duration::from_secs(5));

        let (_stop_tx, stop_rx) = stop_channel();
        let result = tokio::time::timeout(Duration::from_secs(1), lock.auto_renew(&handle, stop_rx))
            .await
            .unwrap();
        assert!(matches!(result, Err(LockError::Lost { .. })));
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let lock = default_lock(store.clone());

        let handle = lock.acquire("k", 0).await.unwrap().unwrap();
        drop(LockGuard::new(lock.clone(), handle));

        for _ in 0..50 {
            if store.holder("k").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.holder("k").is_none());
    }

    #[tokio::test]
    async fn released_guard_does_not_release_twice() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let lock = CoordinationLock::new(store, &LockConfig::default(), metrics.clone());

        let handle = lock.acquire("k", 0).await.unwrap().unwrap();
        let guard = LockGuard::new(lock.clone(), handle);
        assert!(guard.release().await.unwrap());
        tokio::task::yield_now().await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.lock_count(LockOutcome::Released), 1);
        assert_eq!(snapshot.lock_count(LockOutcome::AlreadyGone), 0);
    }

    proptest! {
        #[test]
        fn ttl_never_leaves_bounds(base_ms in 1u64..120_000, extra_ms in 0u64..600_000, weight in 0u32..100_000) {
            let base = Duration::from_millis(base_ms);
            let max = base + Duration::from_millis(extra_ms);
            let lock = lock_with(Arc::new(InMemoryCoordinationStore::new()), base, max);
            let ttl = lock.ttl_for(weight);
            prop_assert!(ttl >= base);
            prop_assert!(ttl <= max);
            prop_assert_eq!(ttl, (base + WEIGHT_STEP * weight).min(max));
        }
    }
}
