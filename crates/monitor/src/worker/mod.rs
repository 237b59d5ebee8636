//! Tenant worker: one timer-driven polling loop per tenant.
//!
//! Each tick lists the tenant's recent complaints page by page and runs the
//! per-complaint pipeline on every item. Ticks and pipelines each run in
//! their own task, so a panic surfaces as a [`WorkerFault`] for that unit of
//! work instead of tearing the loop down.

pub mod supervisor;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use sentinel_core::{
    BlacklistKey, Complaint, ComplaintStatus, NewComplaint, NewComplaintDetail, Order, Tenant,
    complaint::reported_at_or_now, complaint_lock_key, parse_agent_id,
};
use sentinel_infra::config::WorkerConfig;
use sentinel_infra::directory::TenantDirectory;
use sentinel_infra::provider::{ComplaintSummary, MAX_PAGE_SIZE, OrderLine};
use sentinel_infra::shutdown::{stop_channel, wait_for_stop};
use sentinel_infra::{
    ComplaintApi, ComplaintStore, CoordinationLock, CredentialCache, LockGuard, OrderStore,
    ProviderError, QueryWindow, StorageError,
};
use sentinel_observability::MonitorMetrics;

use crate::blacklist::{BlacklistService, RiskContext};
use crate::error::{ComplaintError, FaultScope, TickError, WorkerFault};

pub use supervisor::{RestartPolicy, WorkerHandle, spawn_worker, supervise};

/// Floor for timer periods; `tokio::time::interval` rejects zero.
pub(crate) const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Collaborators shared by every tenant worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub directory: Arc<dyn TenantDirectory>,
    pub credentials: Arc<CredentialCache>,
    pub lock: CoordinationLock,
    pub complaints: Arc<dyn ComplaintStore>,
    pub orders: Arc<dyn OrderStore>,
    pub blacklist: Arc<BlacklistService>,
    pub metrics: Arc<dyn MonitorMetrics>,
    pub config: WorkerConfig,
}

/// What happened to one complaint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComplaintOutcome {
    Persisted {
        complaint_id: i64,
        details: usize,
        blacklisted: usize,
    },
    /// A record for this task id already exists.
    AlreadyPersisted,
    /// Another worker holds the complaint's lock.
    HeldElsewhere,
}

impl ComplaintOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Persisted { .. } => "persisted",
            Self::AlreadyPersisted => "duplicate",
            Self::HeldElsewhere => "contended",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub pages: u32,
    pub seen: usize,
    pub persisted: usize,
    /// Empty task ids and complaints already on record.
    pub skipped: usize,
    pub contended: usize,
    pub failed: usize,
}

/// Counterparty to blacklist, with the best IP known for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistTarget {
    pub counterparty_id: String,
    pub ip_address: Option<String>,
}

pub struct TenantWorker {
    tenant: Tenant,
    ctx: WorkerContext,
}

impl TenantWorker {
    pub fn new(tenant: Tenant, ctx: WorkerContext) -> Self {
        Self { tenant, ctx }
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    /// Tick on `fetch_interval` until `stop` fires. The first tick runs at
    /// once; a stop requested mid-tick takes effect after that tick.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let tenant_id = self.tenant.id;
        let mut ticker = tokio::time::interval(self.ctx.config.fetch_interval.max(MIN_TICK_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tenant_id = %tenant_id, tenant = %self.tenant.name, "tenant worker started");

        loop {
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop) => break,
                _ = ticker.tick() => {}
            }

            match Arc::clone(&self).run_tick().await {
                Ok(summary) if summary.persisted > 0 => {
                    info!(tenant_id = %tenant_id, ?summary, "tick complete");
                }
                Ok(summary) => debug!(tenant_id = %tenant_id, ?summary, "tick complete"),
                Err(TickError::Fault(_)) => {}
                Err(err) => warn!(tenant_id = %tenant_id, error = %err, "tick abandoned"),
            }
        }

        info!(tenant_id = %tenant_id, "tenant worker stopped");
    }

    /// One tick inside its own fault boundary and the outer tick deadline.
    pub async fn run_tick(self: Arc<Self>) -> Result<TickSummary, TickError> {
        let tenant_id = self.tenant.id;
        let deadline = self.ctx.config.tick_deadline;
        let worker = Arc::clone(&self);
        let task = AbortOnDrop(tokio::spawn(async move {
            tokio::time::timeout(deadline, worker.tick()).await
        }));

        match task.join().await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(TickError::DeadlineExceeded(deadline)),
            Err(err) => {
                let fault = WorkerFault::from_join_error(tenant_id, FaultScope::Tick, err);
                self.ctx
                    .metrics
                    .record_worker_fault(tenant_id.get(), fault.scope.label());
                error!(tenant_id = %tenant_id, fault = %fault, "tick faulted; abandoned");
                Err(fault.into())
            }
        }
    }

    async fn tick(self: Arc<Self>) -> Result<TickSummary, TickError> {
        let tenant_id = self.tenant.id;
        let credential = self
            .ctx
            .directory
            .credential(tenant_id)
            .await
            .map_err(TickError::Directory)?
            .ok_or(TickError::MissingCredential(tenant_id))?;
        let client = self.ctx.credentials.obtain(&self.tenant, &credential)?;

        let window = QueryWindow::trailing(Local::now().naive_local(), self.ctx.config.query_days_back);
        let page_size = self.ctx.config.page_size.clamp(1, MAX_PAGE_SIZE);
        let mut summary = TickSummary::default();
        let mut page = 1;

        loop {
            let listing = self
                .call(client.list_complaints(&window, page, page_size))
                .await?;
            summary.pages += 1;
            debug!(
                tenant_id = %tenant_id,
                page,
                items = listing.items.len(),
                total = listing.total,
                "complaint page fetched"
            );
            let fetched = listing.items.len();

            for item in listing.items {
                summary.seen += 1;
                if item.task_id.trim().is_empty() {
                    debug!(tenant_id = %tenant_id, complaint_id = item.complaint_id, "skipping complaint without task id");
                    summary.skipped += 1;
                    continue;
                }
                if item.complaint_id == 0 {
                    warn!(tenant_id = %tenant_id, task_id = %item.task_id, "complaint listed with zero id");
                }

                let task_id = item.task_id.clone();
                let result = self.process_complaint(Arc::clone(&client), item).await;
                match &result {
                    Ok(ComplaintOutcome::Persisted { .. }) => summary.persisted += 1,
                    Ok(ComplaintOutcome::AlreadyPersisted) => summary.skipped += 1,
                    Ok(ComplaintOutcome::HeldElsewhere) => summary.contended += 1,
                    Err(err) => {
                        summary.failed += 1;
                        warn!(
                            tenant_id = %tenant_id,
                            task_id = %task_id,
                            lock_key = %complaint_lock_key(&task_id),
                            error = %err,
                            "complaint not processed"
                        );
                    }
                }
                let label = result.as_ref().map_or("failed", ComplaintOutcome::label);
                self.ctx.metrics.record_complaint(tenant_id.get(), label);
            }

            if fetched < page_size as usize {
                break;
            }
            page += 1;
        }

        Ok(summary)
    }

    /// Lock, dedup and ingest one complaint. The lock is renewed while
    /// ingestion runs and released on every path.
    pub async fn process_complaint(
        self: &Arc<Self>,
        client: Arc<dyn ComplaintApi>,
        item: ComplaintSummary,
    ) -> Result<ComplaintOutcome, ComplaintError> {
        let key = complaint_lock_key(&item.task_id);
        let Some(handle) = self.ctx.lock.acquire(&key, self.ctx.config.lock_weight).await? else {
            return Ok(ComplaintOutcome::HeldElsewhere);
        };
        let guard = LockGuard::new(self.ctx.lock.clone(), handle.clone());

        let task_id = item.task_id.clone();
        let worker = Arc::clone(self);
        let mut ingest = AbortOnDrop(tokio::spawn(async move { worker.ingest(client, item).await }));
        let (_keep_renewing, renew_stop) = stop_channel();

        let outcome = tokio::select! {
            joined = &mut ingest.0 => match joined {
                Ok(result) => result,
                Err(err) => {
                    let fault = WorkerFault::from_join_error(
                        self.tenant.id,
                        FaultScope::Complaint(task_id),
                        err,
                    );
                    self.ctx
                        .metrics
                        .record_worker_fault(self.tenant.id.get(), fault.scope.label());
                    error!(tenant_id = %self.tenant.id, lock_key = %key, fault = %fault, "complaint pipeline faulted");
                    Err(fault.into())
                }
            },
            Err(err) = self.ctx.lock.auto_renew(&handle, renew_stop) => {
                ingest.0.abort();
                error!(tenant_id = %self.tenant.id, lock_key = %key, error = %err, "lock renewal failed; ingestion aborted");
                Err(err.into())
            }
        };

        if let Err(err) = guard.release().await {
            warn!(tenant_id = %self.tenant.id, lock_key = %key, error = %err, "lock release failed; it will expire");
        }
        outcome
    }

    async fn ingest(
        self: Arc<Self>,
        client: Arc<dyn ComplaintApi>,
        item: ComplaintSummary,
    ) -> Result<ComplaintOutcome, ComplaintError> {
        let tenant_id = self.tenant.id;
        if let Some(existing) = self
            .ctx
            .complaints
            .find_by_task_id(tenant_id, &item.task_id)
            .await?
        {
            debug!(tenant_id = %tenant_id, task_id = %item.task_id, complaint_id = existing.id, "complaint already on record");
            return Ok(ComplaintOutcome::AlreadyPersisted);
        }

        let detail = self.call(client.complaint_detail(item.complaint_id)).await?;
        let Some(first_line) = detail.order_lines.first() else {
            return Err(ComplaintError::NoOrderLines {
                task_id: item.task_id,
            });
        };
        let complaint_no = first_line.merchant_order_no.trim().to_string();
        if complaint_no.is_empty() {
            return Err(ComplaintError::MissingOrderNumber {
                task_id: item.task_id,
            });
        }

        let reported = prefer(&detail.reported_at, &item.reported_at);
        let complaint = NewComplaint {
            tenant_id,
            task_id: item.task_id.clone(),
            provider_complaint_id: item.complaint_id,
            agent_id: parse_agent_id(&complaint_no),
            complaint_no,
            status: ComplaintStatus::parse(prefer(&detail.status, &item.status)),
            complainant_id: prefer(&detail.complainant_id, &item.complainant_id).to_string(),
            reason: detail.reason.trim().to_string(),
            reported_at: reported_at_or_now(reported),
            provider_created: reported.to_string(),
            provider_modified: prefer(&detail.modified_at, &item.modified_at).to_string(),
        };
        let lines: Vec<NewComplaintDetail> = detail
            .order_lines
            .iter()
            .map(|line| {
                NewComplaintDetail::new(
                    tenant_id,
                    line.merchant_order_no.trim(),
                    line.platform_order_no.trim(),
                    line.amount,
                    line.complaint_amount,
                )
            })
            .collect();
        let line_count = lines.len();

        let stored = match self.ctx.complaints.create_with_details(complaint, lines).await {
            Ok(stored) => stored,
            Err(StorageError::Conflict(reason)) => {
                // Another process may have won the insert after our dedup check.
                if self
                    .ctx
                    .complaints
                    .find_by_task_id(tenant_id, &item.task_id)
                    .await?
                    .is_some()
                {
                    debug!(tenant_id = %tenant_id, task_id = %item.task_id, "complaint persisted concurrently");
                    return Ok(ComplaintOutcome::AlreadyPersisted);
                }
                return Err(StorageError::Conflict(reason).into());
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            tenant_id = %tenant_id,
            task_id = %stored.task_id,
            complaint_id = stored.id,
            complaint_no = %stored.complaint_no,
            agent_id = stored.agent_id,
            lines = line_count,
            "complaint persisted"
        );

        let blacklisted = self.blacklist_counterparties(&stored, &detail.order_lines).await;
        Ok(ComplaintOutcome::Persisted {
            complaint_id: stored.id,
            details: line_count,
            blacklisted,
        })
    }

    /// Best-effort: failures are logged and never fail the complaint.
    async fn blacklist_counterparties(&self, complaint: &Complaint, lines: &[OrderLine]) -> usize {
        let merchant_nos = non_empty_numbers(lines.iter().map(|l| l.merchant_order_no.as_str()));
        let platform_nos = non_empty_numbers(lines.iter().map(|l| l.platform_order_no.as_str()));

        let mut targets = match self
            .ctx
            .orders
            .find_by_order_numbers(self.tenant.id, &merchant_nos, &platform_nos)
            .await
        {
            Ok(orders) => resolve_buyers(&orders),
            Err(err) => {
                warn!(
                    tenant_id = %self.tenant.id,
                    task_id = %complaint.task_id,
                    error = %err,
                    "order lookup failed; falling back to complainant"
                );
                Vec::new()
            }
        };
        if targets.is_empty() && !complaint.complainant_id.trim().is_empty() {
            targets.push(BlacklistTarget {
                counterparty_id: complaint.complainant_id.clone(),
                ip_address: None,
            });
        }

        let ctx = RiskContext {
            tenant: &self.tenant,
            task_id: &complaint.task_id,
            complaint_no: &complaint.complaint_no,
            reason: &complaint.reason,
        };
        let mut recorded = 0;
        for target in targets {
            let key = match BlacklistKey::new(
                target.counterparty_id.as_str(),
                None,
                target.ip_address.as_deref(),
            ) {
                Ok(key) => key,
                Err(err) => {
                    warn!(tenant_id = %self.tenant.id, task_id = %complaint.task_id, error = %err, "unusable blacklist key");
                    continue;
                }
            };
            match self.ctx.blacklist.record(key, &ctx).await {
                Ok(_) => recorded += 1,
                Err(err) => warn!(
                    tenant_id = %self.tenant.id,
                    task_id = %complaint.task_id,
                    counterparty = %target.counterparty_id,
                    error = %err,
                    "blacklisting failed"
                ),
            }
        }
        recorded
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        let limit = self.ctx.config.call_timeout;
        tokio::time::timeout(limit, request)
            .await
            .map_err(|_| ProviderError::Timeout(limit))?
    }
}

/// Buyers of the paid orders, first-seen order, each with the best IP
/// across all of that buyer's orders (pay IP before first-open IP).
pub fn resolve_buyers(orders: &[Order]) -> Vec<BlacklistTarget> {
    let mut targets: Vec<BlacklistTarget> = Vec::new();
    for order in orders.iter().filter(|o| o.is_paid()) {
        let Some(buyer) = order.buyer() else {
            continue;
        };
        if targets.iter().any(|t| t.counterparty_id == buyer) {
            continue;
        }
        let theirs = || orders.iter().filter(move |o| o.buyer() == Some(buyer));
        let ip_address = theirs()
            .find_map(|o| trimmed(&o.pay_ip))
            .or_else(|| theirs().find_map(|o| trimmed(&o.first_open_ip)))
            .map(str::to_string);
        targets.push(BlacklistTarget {
            counterparty_id: buyer.to_string(),
            ip_address,
        });
    }
    targets
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn prefer<'a>(primary: &'a str, fallback: &'a str) -> &'a str {
    if primary.trim().is_empty() {
        fallback.trim()
    } else {
        primary.trim()
    }
}

fn non_empty_numbers<'a>(numbers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for number in numbers.map(str::trim).filter(|n| !n.is_empty()) {
        if !out.iter().any(|n| n == number) {
            out.push(number.to_string());
        }
    }
    out
}

/// Aborts the task when dropped, so abandoned work stops with its caller.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::TenantId;
    use sentinel_core::order::PAY_STATUS_PAID;

    fn order(buyer: Option<&str>, paid: bool, pay_ip: Option<&str>, open_ip: Option<&str>) -> Order {
        Order {
            id: 1,
            tenant_id: TenantId::new(1),
            merchant_order_no: "BY120251022AAAA".into(),
            platform_order_no: "2025102222001".into(),
            buyer_id: buyer.map(str::to_string),
            pay_status: if paid { PAY_STATUS_PAID } else { 0 },
            pay_ip: pay_ip.map(str::to_string),
            first_open_ip: open_ip.map(str::to_string),
        }
    }

    #[test]
    fn buyers_come_from_paid_orders_only_and_are_deduplicated() {
        let orders = vec![
            order(Some("2088A"), true, None, Some("10.0.0.9")),
            order(Some("2088B"), false, Some("10.0.0.2"), None),
            order(Some("2088A"), true, Some("10.0.0.1"), None),
            order(None, true, Some("10.0.0.3"), None),
        ];

        let targets = resolve_buyers(&orders);
        assert_eq!(
            targets,
            vec![BlacklistTarget {
                counterparty_id: "2088A".into(),
                ip_address: Some("10.0.0.1".into()),
            }]
        );
    }

    #[test]
    fn first_open_ip_is_used_when_no_pay_ip_exists() {
        let orders = vec![order(Some("2088A"), true, Some("  "), Some("10.0.0.9"))];
        assert_eq!(resolve_buyers(&orders)[0].ip_address.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn no_paid_buyer_resolves_nobody() {
        let orders = vec![order(Some("2088B"), false, Some("10.0.0.2"), None)];
        assert!(resolve_buyers(&orders).is_empty());
        assert!(resolve_buyers(&[]).is_empty());
    }

    #[test]
    fn detail_fields_win_over_listing_fields() {
        assert_eq!(prefer("PROCESSED", "PENDING"), "PROCESSED");
        assert_eq!(prefer(" ", "PENDING"), "PENDING");
    }

    #[test]
    fn order_numbers_are_trimmed_and_deduplicated() {
        let numbers = non_empty_numbers(["A1", " A1 ", "", "B2"].into_iter());
        assert_eq!(numbers, vec!["A1".to_string(), "B2".to_string()]);
    }
}
