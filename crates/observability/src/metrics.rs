//! Metrics collaborator.
//!
//! Components receive an `Arc<dyn MonitorMetrics>` at construction; the
//! composition root decides which implementation backs it. `NoopMetrics`
//! discards everything, `InMemoryMetrics` keeps counters for tests and
//! health snapshots.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Result of one coordination-lock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOutcome {
    Acquired,
    /// Someone else holds the key.
    Contended,
    Released,
    /// Release found the key expired or owned by another holder.
    AlreadyGone,
    Renewed,
    /// Renew found the key expired or owned by another holder.
    Lost,
    /// The coordination store itself failed.
    StoreError,
}

/// Observability sink consumed by the monitor components.
pub trait MonitorMetrics: Send + Sync {
    fn set_active_workers(&self, count: usize);

    fn record_worker_fault(&self, tenant_id: i64, scope: &'static str);

    fn record_worker_restart(&self, tenant_id: i64);

    fn record_reconcile(&self, started: usize, stopped: usize);

    fn record_lock(&self, outcome: LockOutcome);

    fn record_credential_lookup(&self, hit: bool);

    /// `outcome` is a short label such as `persisted`, `duplicate`, `contended`, `failed`.
    fn record_complaint(&self, tenant_id: i64, outcome: &'static str);

    fn record_blacklist(&self, inserted: bool);
}

/// Discards every measurement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MonitorMetrics for NoopMetrics {
    fn set_active_workers(&self, _count: usize) {}
    fn record_worker_fault(&self, _tenant_id: i64, _scope: &'static str) {}
    fn record_worker_restart(&self, _tenant_id: i64) {}
    fn record_reconcile(&self, _started: usize, _stopped: usize) {}
    fn record_lock(&self, _outcome: LockOutcome) {}
    fn record_credential_lookup(&self, _hit: bool) {}
    fn record_complaint(&self, _tenant_id: i64, _outcome: &'static str) {}
    fn record_blacklist(&self, _inserted: bool) {}
}

/// Point-in-time copy of the counters held by [`InMemoryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub active_workers: usize,
    pub worker_faults: u64,
    pub worker_restarts: u64,
    pub reconcile_passes: u64,
    pub workers_started: u64,
    pub workers_stopped: u64,
    pub locks: BTreeMap<LockOutcome, u64>,
    pub credential_hits: u64,
    pub credential_misses: u64,
    pub complaints: BTreeMap<&'static str, u64>,
    pub blacklist_inserted: u64,
    pub blacklist_incremented: u64,
}

impl MetricsSnapshot {
    pub fn lock_count(&self, outcome: LockOutcome) -> u64 {
        self.locks.get(&outcome).copied().unwrap_or(0)
    }

    pub fn complaint_count(&self, outcome: &str) -> u64 {
        self.complaints.get(outcome).copied().unwrap_or(0)
    }
}

/// Counter store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut MetricsSnapshot)) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

impl MonitorMetrics for InMemoryMetrics {
    fn set_active_workers(&self, count: usize) {
        self.update(|m| m.active_workers = count);
    }

    fn record_worker_fault(&self, _tenant_id: i64, _scope: &'static str) {
        self.update(|m| m.worker_faults += 1);
    }

    fn record_worker_restart(&self, _tenant_id: i64) {
        self.update(|m| m.worker_restarts += 1);
    }

    fn record_reconcile(&self, started: usize, stopped: usize) {
        self.update(|m| {
            m.reconcile_passes += 1;
            m.workers_started += started as u64;
            m.workers_stopped += stopped as u64;
        });
    }

    fn record_lock(&self, outcome: LockOutcome) {
        self.update(|m| *m.locks.entry(outcome).or_default() += 1);
    }

    fn record_credential_lookup(&self, hit: bool) {
        self.update(|m| {
            if hit {
                m.credential_hits += 1;
            } else {
                m.credential_misses += 1;
            }
        });
    }

    fn record_complaint(&self, _tenant_id: i64, outcome: &'static str) {
        self.update(|m| *m.complaints.entry(outcome).or_default() += 1);
    }

    fn record_blacklist(&self, inserted: bool) {
        self.update(|m| {
            if inserted {
                m.blacklist_inserted += 1;
            } else {
                m.blacklist_incremented += 1;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let metrics = InMemoryMetrics::new();
        metrics.record_lock(LockOutcome::Acquired);
        metrics.record_lock(LockOutcome::Acquired);
        metrics.record_lock(LockOutcome::Contended);
        metrics.record_credential_lookup(true);
        metrics.record_credential_lookup(false);
        metrics.record_complaint(1, "persisted");
        metrics.record_reconcile(2, 1);
        metrics.set_active_workers(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.lock_count(LockOutcome::Acquired), 2);
        assert_eq!(snapshot.lock_count(LockOutcome::Lost), 0);
        assert_eq!(snapshot.credential_hits, 1);
        assert_eq!(snapshot.credential_misses, 1);
        assert_eq!(snapshot.complaint_count("persisted"), 1);
        assert_eq!(snapshot.workers_started, 2);
        assert_eq!(snapshot.active_workers, 3);
    }

    #[test]
    fn noop_is_object_safe() {
        let metrics: Box<dyn MonitorMetrics> = Box::new(NoopMetrics);
        metrics.record_blacklist(true);
    }
}
