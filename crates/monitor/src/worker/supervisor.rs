//! Per-worker supervisor: relaunches a faulted worker loop when the restart
//! policy allows it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sentinel_core::TenantId;
use sentinel_infra::config::WorkerConfig;
use sentinel_infra::shutdown::{stop_channel, wait_for_stop};
use sentinel_observability::MonitorMetrics;

use super::TenantWorker;
use crate::error::{FaultScope, WorkerFault};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub restartable: bool,
    pub backoff: Duration,
}

impl From<&WorkerConfig> for RestartPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            restartable: config.restartable,
            backoff: config.restart_backoff,
        }
    }
}

/// A supervised worker as seen by the manager.
#[derive(Debug)]
pub struct WorkerHandle {
    pub tenant_id: TenantId,
    pub started_at: DateTime<Utc>,
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(tenant_id: TenantId, stop: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self {
            tenant_id,
            started_at: Utc::now(),
            stop,
            join,
        }
    }

    /// Ask the worker to stop after its current tick. Does not wait.
    pub fn signal_stop(&self) {
        // Err only means the supervisor is already gone.
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn into_join(self) -> JoinHandle<()> {
        self.join
    }
}

/// Run `launch` until it returns cleanly or `stop` fires.
///
/// A launch that ends in a panic becomes a [`WorkerFault`]. Restartable
/// workers are relaunched after `policy.backoff`; others stay down until the
/// manager recreates them.
pub async fn supervise<F>(
    tenant_id: TenantId,
    policy: RestartPolicy,
    mut stop: watch::Receiver<bool>,
    metrics: Arc<dyn MonitorMetrics>,
    mut launch: F,
) where
    F: FnMut(watch::Receiver<bool>) -> JoinHandle<()>,
{
    loop {
        let err = match launch(stop.clone()).await {
            Ok(()) => return,
            Err(err) => err,
        };

        let fault = WorkerFault::from_join_error(tenant_id, FaultScope::Worker, err);
        metrics.record_worker_fault(tenant_id.get(), fault.scope.label());
        error!(tenant_id = %tenant_id, fault = %fault, "tenant worker faulted");

        if !policy.restartable {
            warn!(tenant_id = %tenant_id, "worker not restartable; left stopped");
            return;
        }

        tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop) => return,
            _ = tokio::time::sleep(policy.backoff) => {}
        }

        metrics.record_worker_restart(tenant_id.get());
        info!(tenant_id = %tenant_id, backoff_ms = policy.backoff.as_millis() as u64, "relaunching tenant worker");
    }
}

/// Start `worker` under a supervisor and return its handle.
pub fn spawn_worker(
    worker: Arc<TenantWorker>,
    policy: RestartPolicy,
    metrics: Arc<dyn MonitorMetrics>,
) -> WorkerHandle {
    let tenant_id = worker.tenant().id;
    let (stop_tx, stop_rx) = stop_channel();
    let join = tokio::spawn(supervise(tenant_id, policy, stop_rx, metrics, move |stop| {
        tokio::spawn(Arc::clone(&worker).run(stop))
    }));
    WorkerHandle::new(tenant_id, stop_tx, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sentinel_observability::InMemoryMetrics;

    fn crash(attempt: usize) {
        panic!("worker crash {attempt}")
    }

    fn policy(restartable: bool) -> RestartPolicy {
        RestartPolicy {
            restartable,
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn restartable_worker_is_relaunched_after_a_fault() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let launches = Arc::new(AtomicUsize::new(0));
        let (_stop_tx, stop_rx) = stop_channel();

        let counter = Arc::clone(&launches);
        supervise(TenantId::new(1), policy(true), stop_rx, metrics.clone(), move |_stop| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                if attempt < 2 {
                    crash(attempt);
                }
            })
        })
        .await;

        assert_eq!(launches.load(Ordering::SeqCst), 3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.worker_faults, 2);
        assert_eq!(snapshot.worker_restarts, 2);
    }

    #[tokio::test]
    async fn non_restartable_worker_stays_down() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let launches = Arc::new(AtomicUsize::new(0));
        let (_stop_tx, stop_rx) = stop_channel();

        let counter = Arc::clone(&launches);
        supervise(TenantId::new(1), policy(false), stop_rx, metrics.clone(), move |_stop| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move { crash(attempt) })
        })
        .await;

        assert_eq!(launches.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().worker_restarts, 0);
    }

    #[tokio::test]
    async fn stop_during_backoff_cancels_the_restart() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let launches = Arc::new(AtomicUsize::new(0));
        let (stop_tx, stop_rx) = stop_channel();
        stop_tx.send(true).unwrap();

        let counter = Arc::clone(&launches);
        let slow = RestartPolicy {
            restartable: true,
            backoff: Duration::from_secs(60),
        };
        tokio::time::timeout(
            Duration::from_secs(1),
            supervise(TenantId::new(1), slow, stop_rx, metrics, move |_stop| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move { crash(attempt) })
            }),
        )
        .await
        .unwrap();

        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }
}
