//! Relational storage for complaints, orders and the blacklist.
//!
//! Every store comes as a trait with a Postgres implementation and an
//! in-memory implementation (for tests/dev) that honours the same uniqueness
//! rules.

pub mod in_memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use sentinel_core::{
    BlacklistEntry, BlacklistKey, Complaint, NewBlacklistEntry, NewComplaint, NewComplaintDetail,
    Order, TenantId,
};

pub use in_memory::{InMemoryBlacklistStore, InMemoryComplaintStore, InMemoryOrderStore};
pub use postgres::{PostgresBlacklistStore, PostgresComplaintStore, PostgresOrderStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A uniqueness rule rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sentinel_core::DomainError> for StorageError {
    fn from(err: sentinel_core::DomainError) -> Self {
        Self::Invalid(err.to_string())
    }
}

#[async_trait]
pub trait ComplaintStore: Send + Sync {
    async fn find_by_task_id(
        &self,
        tenant_id: TenantId,
        task_id: &str,
    ) -> Result<Option<Complaint>, StorageError>;

    /// Persist the header and every detail row in one transaction.
    ///
    /// Returns the new complaint. A second complaint with the same
    /// `(tenant, task id)` yields [`StorageError::Conflict`] and writes nothing.
    async fn create_with_details(
        &self,
        complaint: NewComplaint,
        details: Vec<NewComplaintDetail>,
    ) -> Result<Complaint, StorageError>;

    /// Complaints the complainant has raised against this tenant.
    async fn count_by_complainant(
        &self,
        tenant_id: TenantId,
        complainant_id: &str,
    ) -> Result<i64, StorageError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// The tenant's orders matching any merchant or platform order number.
    async fn find_by_order_numbers(
        &self,
        tenant_id: TenantId,
        merchant_order_nos: &[String],
        platform_order_nos: &[String],
    ) -> Result<Vec<Order>, StorageError>;
}

#[async_trait]
pub trait BlacklistStore: Send + Sync {
    /// Exact key match; absent device/IP only match absent values.
    async fn find(&self, key: &BlacklistKey) -> Result<Option<BlacklistEntry>, StorageError>;

    async fn insert(&self, entry: NewBlacklistEntry) -> Result<BlacklistEntry, StorageError>;

    /// Bump the risk counter and last-risk time. Returns `false` when no row
    /// matches the key.
    async fn increment(&self, key: &BlacklistKey, at: DateTime<Utc>) -> Result<bool, StorageError>;
}

/// Map a sqlx error for `operation` onto [`StorageError`].
///
/// | sqlx error | Postgres code | StorageError |
/// |------------|---------------|--------------|
/// | Database   | `23505`       | `Conflict`   |
/// | Database   | `23502`, `23514`, `22xxx` | `Invalid` |
/// | anything else | n/a        | `Backend`    |
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StorageError::Conflict(msg),
                Some(code) if code == "23502" || code == "23514" || code.starts_with("22") => {
                    StorageError::Invalid(msg)
                }
                _ => StorageError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StorageError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StorageError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
