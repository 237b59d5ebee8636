//! Blacklist state machine: one entry per counterparty key, counted up on
//! every repeat.
//!
//! - key absent: insert with the complainant's complaint history as the
//!   starting risk count, then queue a `blacklist` notification
//! - key present: bump the counter and timestamp in place, no notification
//! - insert lost a race to another process: fall back to the bump

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use sentinel_core::{BlacklistEntry, BlacklistKey, NewBlacklistEntry, Tenant};
use sentinel_infra::notify::{NotificationKind, NotificationSink, Priority};
use sentinel_infra::storage::{BlacklistStore, ComplaintStore, StorageError};
use sentinel_observability::MonitorMetrics;

#[derive(Debug, Error)]
pub enum BlacklistError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The row disappeared between the conflict and the increment.
    #[error("blacklist entry for {0} vanished during update")]
    Vanished(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistOutcome {
    Inserted { id: i64, risk_count: i64 },
    Incremented,
}

/// The complaint that triggered a blacklist event.
#[derive(Debug, Clone, Copy)]
pub struct RiskContext<'a> {
    pub tenant: &'a Tenant,
    pub task_id: &'a str,
    pub complaint_no: &'a str,
    pub reason: &'a str,
}

pub struct BlacklistService {
    entries: Arc<dyn BlacklistStore>,
    complaints: Arc<dyn ComplaintStore>,
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<dyn MonitorMetrics>,
}

impl BlacklistService {
    pub fn new(
        entries: Arc<dyn BlacklistStore>,
        complaints: Arc<dyn ComplaintStore>,
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<dyn MonitorMetrics>,
    ) -> Self {
        Self {
            entries,
            complaints,
            sink,
            metrics,
        }
    }

    /// Record one risk event for `key`.
    pub async fn record(
        &self,
        key: BlacklistKey,
        ctx: &RiskContext<'_>,
    ) -> Result<BlacklistOutcome, BlacklistError> {
        let now = Utc::now();

        if self.entries.find(&key).await?.is_some() {
            return self.increment(&key, now).await;
        }

        let risk_count = self.history(ctx, &key.counterparty_id).await;
        let entry = NewBlacklistEntry {
            key: key.clone(),
            source_tenant: ctx.tenant.id,
            risk_count,
            last_risk_at: now,
            remark: format!("complaint-triggered auto blacklist, task {}", ctx.task_id),
        };

        match self.entries.insert(entry).await {
            Ok(stored) => {
                info!(
                    tenant_id = %ctx.tenant.id,
                    task_id = %ctx.task_id,
                    counterparty = %stored.key.counterparty_id,
                    risk_count = stored.risk_count,
                    "counterparty blacklisted"
                );
                self.metrics.record_blacklist(true);
                self.notify_inserted(&stored, ctx).await;
                Ok(BlacklistOutcome::Inserted {
                    id: stored.id,
                    risk_count: stored.risk_count,
                })
            }
            Err(StorageError::Conflict(_)) => {
                debug!(counterparty = %key.counterparty_id, "blacklist insert raced; incrementing");
                self.increment(&key, now).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn increment(
        &self,
        key: &BlacklistKey,
        at: DateTime<Utc>,
    ) -> Result<BlacklistOutcome, BlacklistError> {
        if !self.entries.increment(key, at).await? {
            return Err(BlacklistError::Vanished(key.counterparty_id.clone()));
        }
        debug!(counterparty = %key.counterparty_id, "blacklist risk count incremented");
        self.metrics.record_blacklist(false);
        Ok(BlacklistOutcome::Incremented)
    }

    /// Complaints this counterparty already raised against the tenant, at least 1.
    async fn history(&self, ctx: &RiskContext<'_>, counterparty: &str) -> i64 {
        match self
            .complaints
            .count_by_complainant(ctx.tenant.id, counterparty)
            .await
        {
            Ok(count) => count.max(1),
            Err(err) => {
                warn!(
                    tenant_id = %ctx.tenant.id,
                    counterparty = %counterparty,
                    error = %err,
                    "complaint history unavailable; starting risk count at 1"
                );
                1
            }
        }
    }

    async fn notify_inserted(&self, entry: &BlacklistEntry, ctx: &RiskContext<'_>) {
        let payload = json!({
            "action": "insert",
            "id": entry.id,
            "counterparty_id": entry.key.counterparty_id,
            "device_code": entry.key.device_code,
            "ip_address": entry.key.ip_address,
            "risk_count": entry.risk_count,
            "last_risk_at": entry.last_risk_at,
            "remark": entry.remark,
            "complaint_no": ctx.complaint_no,
            "reason": ctx.reason,
            "tenant_id": ctx.tenant.id,
            "tenant_name": ctx.tenant.name,
            "message": format!(
                "counterparty {} blacklisted after complaint {} against {}",
                entry.key.counterparty_id, ctx.complaint_no, ctx.tenant.name
            ),
        });

        if let Err(err) = self
            .sink
            .enqueue(NotificationKind::Blacklist, Priority::High, payload)
            .await
        {
            warn!(
                tenant_id = %ctx.tenant.id,
                task_id = %ctx.task_id,
                error = %err,
                "blacklist notification dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentinel_core::TenantId;
    use sentinel_infra::notify::InMemoryNotificationSink;
    use sentinel_infra::storage::{InMemoryBlacklistStore, InMemoryComplaintStore};
    use sentinel_observability::NoopMetrics;

    struct Fixture {
        entries: Arc<InMemoryBlacklistStore>,
        sink: Arc<InMemoryNotificationSink>,
        service: BlacklistService,
    }

    fn fixture_with(entries: Arc<dyn BlacklistStore>, raw: Arc<InMemoryBlacklistStore>) -> Fixture {
        let sink = Arc::new(InMemoryNotificationSink::new());
        let service = BlacklistService::new(
            entries,
            Arc::new(InMemoryComplaintStore::new()),
            sink.clone(),
            Arc::new(NoopMetrics),
        );
        Fixture {
            entries: raw,
            sink,
            service,
        }
    }

    fn fixture() -> Fixture {
        let entries = Arc::new(InMemoryBlacklistStore::new());
        fixture_with(entries.clone(), entries)
    }

    fn test_tenant() -> Tenant {
        Tenant::new(TenantId::new(4), "app", "Acme Store")
    }

    fn ctx(tenant: &Tenant) -> RiskContext<'_> {
        RiskContext {
            tenant,
            task_id: "T1",
            complaint_no: "BY120251022AAAA",
            reason: "goods not received",
        }
    }

    #[tokio::test]
    async fn first_event_inserts_and_notifies() {
        let f = fixture();
        let tenant = test_tenant();
        let key = BlacklistKey::new("2088", None, Some("10.0.0.1")).unwrap();

        let outcome = f.service.record(key, &ctx(&tenant)).await.unwrap();
        assert!(matches!(outcome, BlacklistOutcome::Inserted { risk_count: 1, .. }));

        let sent = f.sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Blacklist);
        assert_eq!(sent[0].priority, Priority::High);
        assert_eq!(sent[0].payload["action"], "insert");
        assert_eq!(sent[0].payload["ip_address"], "10.0.0.1");
        assert!(sent[0].payload["device_code"].is_null());
        assert_eq!(sent[0].payload["complaint_no"], "BY120251022AAAA");
    }

    #[tokio::test]
    async fn repeat_events_increment_without_notifying() {
        let f = fixture();
        let tenant = test_tenant();
        let key = BlacklistKey::new("2088", None, None).unwrap();

        f.service.record(key.clone(), &ctx(&tenant)).await.unwrap();
        let outcome = f.service.record(key, &ctx(&tenant)).await.unwrap();
        assert_eq!(outcome, BlacklistOutcome::Incremented);

        let entries = f.entries.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].risk_count, 2);
        assert_eq!(f.sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_insert() {
        let f = fixture();
        f.sink.set_failing(true);
        let tenant = test_tenant();
        let key = BlacklistKey::new("2088", None, None).unwrap();

        let outcome = f.service.record(key, &ctx(&tenant)).await.unwrap();
        assert!(matches!(outcome, BlacklistOutcome::Inserted { .. }));
        assert_eq!(f.entries.entries().len(), 1);
    }

    /// Reports every key as absent, like a reader racing another process.
    struct BlindFind(Arc<InMemoryBlacklistStore>);

    #[async_trait]
    impl BlacklistStore for BlindFind {
        async fn find(&self, _key: &BlacklistKey) -> Result<Option<BlacklistEntry>, StorageError> {
            Ok(None)
        }

        async fn insert(&self, entry: NewBlacklistEntry) -> Result<BlacklistEntry, StorageError> {
            self.0.insert(entry).await
        }

        async fn increment(&self, key: &BlacklistKey, at: DateTime<Utc>) -> Result<bool, StorageError> {
            self.0.increment(key, at).await
        }
    }

    #[tokio::test]
    async fn insert_race_falls_back_to_increment() {
        let raw = Arc::new(InMemoryBlacklistStore::new());
        let f = fixture_with(Arc::new(BlindFind(raw.clone())), raw);
        let tenant = test_tenant();
        let key = BlacklistKey::new("2088", None, None).unwrap();

        f.service.record(key.clone(), &ctx(&tenant)).await.unwrap();
        let outcome = f.service.record(key, &ctx(&tenant)).await.unwrap();
        assert_eq!(outcome, BlacklistOutcome::Incremented);
        assert_eq!(f.entries.entries()[0].risk_count, 2);
    }
}
