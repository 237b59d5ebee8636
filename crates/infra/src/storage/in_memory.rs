//! In-memory stores (for tests/dev).

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sentinel_core::{
    BlacklistEntry, BlacklistKey, Complaint, ComplaintDetail, NewBlacklistEntry, NewComplaint,
    NewComplaintDetail, Order, TenantId,
};

use super::{BlacklistStore, ComplaintStore, OrderStore, StorageError};

#[derive(Debug, Default)]
struct ComplaintTables {
    complaints: Vec<Complaint>,
    details: Vec<ComplaintDetail>,
    next_complaint_id: i64,
    next_detail_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryComplaintStore {
    tables: RwLock<ComplaintTables>,
}

impl InMemoryComplaintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complaints(&self) -> Vec<Complaint> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .complaints
            .clone()
    }

    pub fn details(&self) -> Vec<ComplaintDetail> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .details
            .clone()
    }
}

#[async_trait]
impl ComplaintStore for InMemoryComplaintStore {
    async fn find_by_task_id(
        &self,
        tenant_id: TenantId,
        task_id: &str,
    ) -> Result<Option<Complaint>, StorageError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .complaints
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.task_id == task_id)
            .cloned())
    }

    async fn create_with_details(
        &self,
        complaint: NewComplaint,
        details: Vec<NewComplaintDetail>,
    ) -> Result<Complaint, StorageError> {
        complaint.validate()?;

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables
            .complaints
            .iter()
            .any(|c| c.tenant_id == complaint.tenant_id && c.task_id == complaint.task_id)
        {
            return Err(StorageError::Conflict(format!(
                "complaint {} already exists for tenant {}",
                complaint.task_id, complaint.tenant_id
            )));
        }

        // Validate the whole batch before touching the tables.
        let mut seen = HashSet::new();
        for detail in &details {
            if detail.tenant_id != complaint.tenant_id {
                return Err(StorageError::Invalid(format!(
                    "detail for order {} belongs to tenant {}",
                    detail.merchant_order_no, detail.tenant_id
                )));
            }
            if !seen.insert(detail.merchant_order_no.as_str()) {
                return Err(StorageError::Conflict(format!(
                    "duplicate order {} in complaint {}",
                    detail.merchant_order_no, complaint.task_id
                )));
            }
        }

        tables.next_complaint_id += 1;
        let complaint_id = tables.next_complaint_id;
        let stored = Complaint::from_new(complaint_id, complaint, Utc::now());
        tables.complaints.push(stored.clone());

        for detail in details {
            tables.next_detail_id += 1;
            let detail_id = tables.next_detail_id;
            tables
                .details
                .push(ComplaintDetail::from_new(detail_id, complaint_id, detail));
        }

        Ok(stored)
    }

    async fn count_by_complainant(
        &self,
        tenant_id: TenantId,
        complainant_id: &str,
    ) -> Result<i64, StorageError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .complaints
            .iter()
            .filter(|c| c.tenant_id == tenant_id && c.complainant_id == complainant_id)
            .count() as i64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<Vec<Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) {
        self.orders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(order);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_order_numbers(
        &self,
        tenant_id: TenantId,
        merchant_order_nos: &[String],
        platform_order_nos: &[String],
    ) -> Result<Vec<Order>, StorageError> {
        let orders = self.orders.read().unwrap_or_else(PoisonError::into_inner);
        Ok(orders
            .iter()
            .filter(|o| o.tenant_id == tenant_id)
            .filter(|o| {
                merchant_order_nos.contains(&o.merchant_order_no)
                    || platform_order_nos.contains(&o.platform_order_no)
            })
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct BlacklistTable {
    entries: Vec<BlacklistEntry>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryBlacklistStore {
    table: RwLock<BlacklistTable>,
}

impl InMemoryBlacklistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<BlacklistEntry> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }
}

#[async_trait]
impl BlacklistStore for InMemoryBlacklistStore {
    async fn find(&self, key: &BlacklistKey) -> Result<Option<BlacklistEntry>, StorageError> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        Ok(table.entries.iter().find(|e| &e.key == key).cloned())
    }

    async fn insert(&self, entry: NewBlacklistEntry) -> Result<BlacklistEntry, StorageError> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.entries.iter().any(|e| e.key == entry.key) {
            return Err(StorageError::Conflict(format!(
                "blacklist entry for {} already exists",
                entry.key.counterparty_id
            )));
        }
        table.next_id += 1;
        let stored = BlacklistEntry::from_new(table.next_id, entry, Utc::now());
        table.entries.push(stored.clone());
        Ok(stored)
    }

    async fn increment(&self, key: &BlacklistKey, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        match table.entries.iter_mut().find(|e| &e.key == key) {
            Some(entry) => {
                entry.record_risk(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::ComplaintStatus;
    use sentinel_core::complaint::parse_provider_time;

    fn test_tenant() -> TenantId {
        TenantId::new(5)
    }

    fn complaint(task_id: &str) -> NewComplaint {
        NewComplaint {
            tenant_id: test_tenant(),
            task_id: task_id.into(),
            provider_complaint_id: 9,
            complaint_no: "BY120251022AAAA".into(),
            agent_id: 1,
            status: ComplaintStatus::WaitProcess,
            complainant_id: "2088".into(),
            reason: "not delivered".into(),
            reported_at: parse_provider_time("2025-10-22 08:30:00").unwrap(),
            provider_created: "2025-10-22 08:30:00".into(),
            provider_modified: "2025-10-22 08:30:00".into(),
        }
    }

    fn detail(order_no: &str) -> NewComplaintDetail {
        NewComplaintDetail::new(test_tenant(), order_no, "2025102222001", 10.0, 10.0)
    }

    #[tokio::test]
    async fn duplicate_task_ids_conflict() {
        let store = InMemoryComplaintStore::new();
        store
            .create_with_details(complaint("T1"), vec![detail("BY120251022AAAA")])
            .await
            .unwrap();

        let err = store
            .create_with_details(complaint("T1"), vec![detail("BY120251022AAAA")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(store.complaints().len(), 1);
        assert_eq!(store.details().len(), 1);
    }

    #[tokio::test]
    async fn failing_detail_leaves_nothing_behind() {
        let store = InMemoryComplaintStore::new();
        let err = store
            .create_with_details(
                complaint("T2"),
                vec![detail("BY120251022AAAA"), detail("BY120251022AAAA")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert!(store.complaints().is_empty());
        assert!(store.details().is_empty());
        assert!(store.find_by_task_id(test_tenant(), "T2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn same_task_id_is_independent_per_tenant() {
        let store = InMemoryComplaintStore::new();
        store.create_with_details(complaint("T1"), vec![]).await.unwrap();

        let mut other = complaint("T1");
        other.tenant_id = TenantId::new(6);
        store.create_with_details(other, vec![]).await.unwrap();

        assert_eq!(store.complaints().len(), 2);
        assert_eq!(store.count_by_complainant(test_tenant(), "2088").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blacklist_keys_match_nulls_literally() {
        let store = InMemoryBlacklistStore::new();
        let bare = BlacklistKey::new("2088", None, None).unwrap();
        let with_ip = BlacklistKey::new("2088", None, Some("10.0.0.1")).unwrap();

        store
            .insert(NewBlacklistEntry {
                key: bare.clone(),
                source_tenant: test_tenant(),
                risk_count: 1,
                last_risk_at: Utc::now(),
                remark: String::new(),
            })
            .await
            .unwrap();

        assert!(store.find(&bare).await.unwrap().is_some());
        assert!(store.find(&with_ip).await.unwrap().is_none());
        assert!(!store.increment(&with_ip, Utc::now()).await.unwrap());
        assert!(store.increment(&bare, Utc::now()).await.unwrap());
        assert_eq!(store.entries()[0].risk_count, 2);
    }
}
