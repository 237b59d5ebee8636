//! The set of running tenant workers.
//!
//! Every read and write goes through one mutex, so reconciliation and
//! stats queries from other tasks never see a half-applied change.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;

use sentinel_core::TenantId;

use crate::worker::WorkerHandle;

#[derive(Debug, Default)]
pub struct WorkerSet {
    workers: Mutex<HashMap<TenantId, WorkerHandle>>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenants whose worker is still running. Finished workers are left out
    /// so the next pass recreates them.
    pub fn snapshot(&self) -> BTreeSet<TenantId> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(tenant_id, _)| *tenant_id)
            .collect()
    }

    /// Drop workers whose task has already ended, returning their tenants.
    pub fn prune_finished(&self) -> Vec<TenantId> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut finished: Vec<TenantId> = workers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(tenant_id, _)| *tenant_id)
            .collect();
        finished.sort();
        for tenant_id in &finished {
            workers.remove(tenant_id);
        }
        finished
    }

    /// Add a worker, returning the handle it replaced.
    pub fn insert(&self, handle: WorkerHandle) -> Option<WorkerHandle> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.tenant_id, handle)
    }

    /// Signal the tenant's worker to stop, then drop it from the set.
    pub fn remove(&self, tenant_id: TenantId) -> Option<WorkerHandle> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = workers.get(&tenant_id) {
            handle.signal_stop();
        }
        workers.remove(&tenant_id)
    }

    pub fn len(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal every worker and clear the set; returns their join handles.
    pub fn drain(&self) -> Vec<JoinHandle<()>> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers
            .drain()
            .map(|(_, handle)| {
                handle.signal_stop();
                handle.into_join()
            })
            .collect()
    }

    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_infra::shutdown::{stop_channel, wait_for_stop};
    use std::time::Duration;

    fn parked(tenant: i64) -> WorkerHandle {
        let (tx, mut rx) = stop_channel();
        let join = tokio::spawn(async move { wait_for_stop(&mut rx).await });
        WorkerHandle::new(TenantId::new(tenant), tx, join)
    }

    #[tokio::test]
    async fn remove_signals_before_dropping() {
        let set = WorkerSet::new();
        set.insert(parked(1));
        set.insert(parked(2));
        assert_eq!(set.snapshot().len(), 2);

        let removed = set.remove(TenantId::new(1)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), removed.into_join())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(set.tenant_ids(), vec![TenantId::new(2)]);
    }

    #[tokio::test]
    async fn finished_workers_drop_out_of_the_snapshot() {
        let set = WorkerSet::new();
        let (tx, _rx) = stop_channel();
        let join = tokio::spawn(async {});
        set.insert(WorkerHandle::new(TenantId::new(5), tx, join));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(set.snapshot().is_empty());
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn prune_removes_only_finished_workers() {
        let set = WorkerSet::new();
        set.insert(parked(1));
        let (tx, _rx) = stop_channel();
        set.insert(WorkerHandle::new(TenantId::new(7), tx, tokio::spawn(async {})));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(set.prune_finished(), vec![TenantId::new(7)]);
        assert_eq!(set.tenant_ids(), vec![TenantId::new(1)]);
        assert!(set.prune_finished().is_empty());
    }

    #[tokio::test]
    async fn drain_stops_everything() {
        let set = WorkerSet::new();
        set.insert(parked(1));
        set.insert(parked(2));

        let joins = set.drain();
        assert!(set.is_empty());
        for join in joins {
            tokio::time::timeout(Duration::from_secs(1), join)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
