//! Outbound notification queue, consumed by an external process.
//!
//! Enqueueing is fire-and-forget from the monitor's point of view: callers
//! log failures and carry on. Delivery is at-least-once at best.

pub mod postgres;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use postgres::PostgresNotificationSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Blacklist,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blacklist => "blacklist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(i16)]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Priority {
    pub fn value(self) -> i16 {
        self as i16
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub priority: Priority,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn enqueue(
        &self,
        kind: NotificationKind,
        priority: Priority,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError>;
}

/// Records notifications in memory (for tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `enqueue` fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn enqueue(
        &self,
        kind: NotificationKind,
        priority: Priority,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("sink switched off".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                kind,
                priority,
                payload,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_map_to_queue_values() {
        assert_eq!(Priority::Low.value(), 1);
        assert_eq!(Priority::High.value(), 3);
        assert!(Priority::Urgent > Priority::High);
        assert_eq!(NotificationKind::Blacklist.as_str(), "blacklist");
        assert_eq!(
            serde_json::to_value(NotificationKind::Blacklist).unwrap(),
            NotificationKind::Blacklist.as_str()
        );
    }

    #[tokio::test]
    async fn failing_sink_reports_errors() {
        let sink = InMemoryNotificationSink::new();
        sink.set_failing(true);
        let err = sink
            .enqueue(NotificationKind::Blacklist, Priority::Normal, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Unavailable(_)));
        assert!(sink.sent().is_empty());
    }
}
