//! Error types for the monitor: per-complaint, per-tick and fault results.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

use sentinel_core::TenantId;
use sentinel_infra::{CredentialError, LockError, ProviderError, StorageError};

/// Unit of work a fault escaped from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultScope {
    Tick,
    Complaint(String),
    Worker,
}

impl FaultScope {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Complaint(_) => "complaint",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for FaultScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complaint(task_id) => write!(f, "complaint {task_id}"),
            other => f.write_str(other.label()),
        }
    }
}

/// An unexpected runtime fault (panic or cancellation) turned into a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("fault in {scope} of tenant {tenant_id}: {message}")]
pub struct WorkerFault {
    pub tenant_id: TenantId,
    pub scope: FaultScope,
    pub message: String,
}

impl WorkerFault {
    pub fn from_join_error(tenant_id: TenantId, scope: FaultScope, err: JoinError) -> Self {
        let message = if err.is_panic() {
            panic_message(err.into_panic())
        } else {
            "task cancelled".to_string()
        };
        Self {
            tenant_id,
            scope,
            message,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Failure of one complaint's pipeline.
#[derive(Debug, Error)]
pub enum ComplaintError {
    /// Coordination store failure, or [`LockError::Lost`] while ingesting.
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    /// Not yet recorded; the next tick retries from scratch.
    #[error("persisting complaint failed: {0}")]
    Persistence(#[from] StorageError),

    #[error("complaint {task_id} has no order lines")]
    NoOrderLines { task_id: String },

    #[error("complaint {task_id} has no merchant order number")]
    MissingOrderNumber { task_id: String },

    #[error(transparent)]
    Fault(#[from] WorkerFault),
}

impl ComplaintError {
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::Lock(LockError::Lost { .. }))
    }
}

/// Failure of a whole tick. Remaining pages are skipped; the next tick
/// starts over with the same window.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("tenant {0} has no stored credential")]
    MissingCredential(TenantId),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("tenant directory failed: {0}")]
    Directory(StorageError),

    #[error("listing complaints failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("tick exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error(transparent)]
    Fault(#[from] WorkerFault),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explode() {
        panic!("boom")
    }

    fn reject(task_id: String) {
        panic!("bad complaint {task_id}")
    }

    #[tokio::test]
    async fn panics_become_faults() {
        let err = tokio::spawn(async { explode() }).await.unwrap_err();
        let fault = WorkerFault::from_join_error(TenantId::new(3), FaultScope::Tick, err);
        assert_eq!(fault.message, "boom");
        assert_eq!(fault.to_string(), "fault in tick of tenant 3: boom");
    }

    #[tokio::test]
    async fn formatted_panics_keep_their_message() {
        let err = tokio::spawn(async { reject("T9".to_string()) })
            .await
            .unwrap_err();
        let fault = WorkerFault::from_join_error(
            TenantId::new(3),
            FaultScope::Complaint("T9".into()),
            err,
        );
        assert_eq!(fault.message, "bad complaint T9");
        assert!(fault.to_string().contains("complaint T9"));
    }

    #[tokio::test]
    async fn aborted_tasks_are_reported_as_cancelled() {
        let handle = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        handle.abort();
        let err = handle.await.unwrap_err();
        let fault = WorkerFault::from_join_error(TenantId::new(3), FaultScope::Worker, err);
        assert_eq!(fault.message, "task cancelled");
    }

    #[test]
    fn lock_loss_is_recognised() {
        let err = ComplaintError::from(LockError::Lost { key: "k".into() });
        assert!(err.is_lock_lost());
    }
}
