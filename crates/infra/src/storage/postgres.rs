//! Postgres-backed stores.
//!
//! Every query is scoped by `subject_id` where the table carries one. The
//! blacklist is the exception: its identity is the counterparty key alone.
//!
//! ## Optional key columns
//!
//! `device_code` and `ip_address` are nullable parts of the blacklist key.
//! Lookups branch per column between `IS NULL` and `= $n` so that an absent
//! value only ever matches a stored NULL.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use sentinel_core::{
    BlacklistEntry, BlacklistKey, Complaint, ComplaintStatus, NewBlacklistEntry, NewComplaint,
    NewComplaintDetail, Order, TenantId,
};

use super::{BlacklistStore, ComplaintStore, OrderStore, StorageError, map_sqlx_error};

const COMPLAINT_COLUMNS: &str = "id, subject_id, task_id, provider_complaint_id, complaint_no, \
    agent_id, status, complainant_id, reason, reported_at, provider_created, provider_modified, \
    created_at";

const BLACKLIST_COLUMNS: &str = "id, counterparty_id, device_code, ip_address, source_subject_id, \
    risk_count, last_risk_at, remark, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresComplaintStore {
    pool: Arc<PgPool>,
}

impl PostgresComplaintStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn complaint_from_row(row: &PgRow) -> Result<Complaint, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Complaint {
        id: row.try_get("id")?,
        tenant_id: TenantId::new(row.try_get("subject_id")?),
        task_id: row.try_get("task_id")?,
        provider_complaint_id: row.try_get("provider_complaint_id")?,
        complaint_no: row.try_get("complaint_no")?,
        agent_id: row.try_get("agent_id")?,
        status: ComplaintStatus::parse(&status),
        complainant_id: row.try_get("complainant_id")?,
        reason: row.try_get("reason")?,
        reported_at: row.try_get("reported_at")?,
        provider_created: row.try_get("provider_created")?,
        provider_modified: row.try_get("provider_modified")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ComplaintStore for PostgresComplaintStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn find_by_task_id(
        &self,
        tenant_id: TenantId,
        task_id: &str,
    ) -> Result<Option<Complaint>, StorageError> {
        let sql = format!(
            "SELECT {COMPLAINT_COLUMNS} FROM complaints WHERE subject_id = $1 AND task_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.get())
            .bind(task_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_complaint", e))?;

        row.as_ref()
            .map(complaint_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("decode_complaint", e))
    }

    #[instrument(
        skip(self, complaint, details),
        fields(tenant_id = %complaint.tenant_id, task_id = %complaint.task_id, details = details.len()),
        err
    )]
    async fn create_with_details(
        &self,
        complaint: NewComplaint,
        details: Vec<NewComplaintDetail>,
    ) -> Result<Complaint, StorageError> {
        complaint.validate()?;
        if let Some(foreign) = details.iter().find(|d| d.tenant_id != complaint.tenant_id) {
            return Err(StorageError::Invalid(format!(
                "detail for order {} belongs to tenant {}",
                foreign.merchant_order_no, foreign.tenant_id
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r#"
            INSERT INTO complaints (
                subject_id,
                task_id,
                provider_complaint_id,
                complaint_no,
                agent_id,
                status,
                complainant_id,
                reason,
                reported_at,
                provider_created,
                provider_modified
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, created_at
            "#,
        )
        .bind(complaint.tenant_id.get())
        .bind(&complaint.task_id)
        .bind(complaint.provider_complaint_id)
        .bind(&complaint.complaint_no)
        .bind(complaint.agent_id)
        .bind(complaint.status.as_str())
        .bind(&complaint.complainant_id)
        .bind(&complaint.reason)
        .bind(complaint.reported_at)
        .bind(&complaint.provider_created)
        .bind(&complaint.provider_modified)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_complaint", e))?;

        let complaint_id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert_complaint", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("insert_complaint", e))?;

        for detail in &details {
            // Any failure drops `tx`, rolling back the header as well.
            sqlx::query(
                r#"
                INSERT INTO complaint_details (
                    complaint_id,
                    subject_id,
                    agent_id,
                    merchant_order_no,
                    platform_order_no,
                    order_amount,
                    complaint_amount
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(complaint_id)
            .bind(detail.tenant_id.get())
            .bind(detail.agent_id)
            .bind(&detail.merchant_order_no)
            .bind(&detail.platform_order_no)
            .bind(detail.order_amount)
            .bind(detail.complaint_amount)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_complaint_detail", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Complaint::from_new(complaint_id, complaint, created_at))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn count_by_complainant(
        &self,
        tenant_id: TenantId,
        complainant_id: &str,
    ) -> Result<i64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM complaints
            WHERE subject_id = $1 AND complainant_id = $2
            "#,
        )
        .bind(tenant_id.get())
        .bind(complainant_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_by_complainant", e))?;
        Ok(count)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self, merchant_order_nos, platform_order_nos), fields(tenant_id = %tenant_id), err)]
    async fn find_by_order_numbers(
        &self,
        tenant_id: TenantId,
        merchant_order_nos: &[String],
        platform_order_nos: &[String],
    ) -> Result<Vec<Order>, StorageError> {
        if merchant_order_nos.is_empty() && platform_order_nos.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, merchant_order_no, platform_order_no, buyer_id,
                   pay_status, pay_ip, first_open_ip
            FROM orders
            WHERE subject_id = $1
              AND (merchant_order_no = ANY($2) OR platform_order_no = ANY($3))
            ORDER BY id
            "#,
        )
        .bind(tenant_id.get())
        .bind(merchant_order_nos)
        .bind(platform_order_nos)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_orders", e))?;

        rows.iter()
            .map(|row| -> Result<Order, sqlx::Error> {
                Ok(Order {
                    id: row.try_get("id")?,
                    tenant_id: TenantId::new(row.try_get("subject_id")?),
                    merchant_order_no: row.try_get("merchant_order_no")?,
                    platform_order_no: row.try_get("platform_order_no")?,
                    buyer_id: row.try_get("buyer_id")?,
                    pay_status: row.try_get("pay_status")?,
                    pay_ip: row.try_get("pay_ip")?,
                    first_open_ip: row.try_get("first_open_ip")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("decode_order", e))
    }
}

#[derive(Debug, Clone)]
pub struct PostgresBlacklistStore {
    pool: Arc<PgPool>,
}

impl PostgresBlacklistStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

/// `WHERE` clause matching `key` exactly, numbering bind parameters from
/// `first_param`. Bind order: counterparty, then device and ip when present.
fn key_filter(key: &BlacklistKey, first_param: usize) -> String {
    let mut next = first_param;
    let mut clause = format!("counterparty_id = ${next}");
    next += 1;

    for (column, value) in [
        ("device_code", &key.device_code),
        ("ip_address", &key.ip_address),
    ] {
        match value {
            Some(_) => {
                clause.push_str(&format!(" AND {column} = ${next}"));
                next += 1;
            }
            None => clause.push_str(&format!(" AND {column} IS NULL")),
        }
    }
    clause
}

fn bind_key<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    key: &'q BlacklistKey,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query = query.bind(&key.counterparty_id);
    if let Some(device) = &key.device_code {
        query = query.bind(device);
    }
    if let Some(ip) = &key.ip_address {
        query = query.bind(ip);
    }
    query
}

fn blacklist_from_row(row: &PgRow) -> Result<BlacklistEntry, sqlx::Error> {
    Ok(BlacklistEntry {
        id: row.try_get("id")?,
        key: BlacklistKey {
            counterparty_id: row.try_get("counterparty_id")?,
            device_code: row.try_get("device_code")?,
            ip_address: row.try_get("ip_address")?,
        },
        source_tenant: TenantId::new(row.try_get("source_subject_id")?),
        risk_count: row.try_get("risk_count")?,
        last_risk_at: row.try_get("last_risk_at")?,
        remark: row.try_get("remark")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl BlacklistStore for PostgresBlacklistStore {
    #[instrument(skip(self), fields(counterparty = %key.counterparty_id), err)]
    async fn find(&self, key: &BlacklistKey) -> Result<Option<BlacklistEntry>, StorageError> {
        let sql = format!(
            "SELECT {BLACKLIST_COLUMNS} FROM blacklist WHERE {} LIMIT 1",
            key_filter(key, 1)
        );
        let row = bind_key(sqlx::query(&sql), key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_blacklist", e))?;

        row.as_ref()
            .map(blacklist_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("decode_blacklist", e))
    }

    #[instrument(skip(self, entry), fields(counterparty = %entry.key.counterparty_id), err)]
    async fn insert(&self, entry: NewBlacklistEntry) -> Result<BlacklistEntry, StorageError> {
        let sql = format!(
            r#"
            INSERT INTO blacklist (
                counterparty_id,
                device_code,
                ip_address,
                source_subject_id,
                risk_count,
                last_risk_at,
                remark
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {BLACKLIST_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&entry.key.counterparty_id)
            .bind(entry.key.device_code.as_deref())
            .bind(entry.key.ip_address.as_deref())
            .bind(entry.source_tenant.get())
            .bind(entry.risk_count)
            .bind(entry.last_risk_at)
            .bind(&entry.remark)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_blacklist", e))?;

        blacklist_from_row(&row).map_err(|e| map_sqlx_error("decode_blacklist", e))
    }

    #[instrument(skip(self), fields(counterparty = %key.counterparty_id), err)]
    async fn increment(&self, key: &BlacklistKey, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let sql = format!(
            "UPDATE blacklist \
             SET risk_count = risk_count + 1, last_risk_at = $1, updated_at = $1 \
             WHERE {}",
            key_filter(key, 2)
        );
        let result = bind_key(sqlx::query(&sql).bind(at), key)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("increment_blacklist", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_filter_uses_is_null_for_absent_parts() {
        let bare = BlacklistKey::new("2088", None, None).unwrap();
        assert_eq!(
            key_filter(&bare, 1),
            "counterparty_id = $1 AND device_code IS NULL AND ip_address IS NULL"
        );

        let with_ip = BlacklistKey::new("2088", None, Some("10.0.0.1")).unwrap();
        assert_eq!(
            key_filter(&with_ip, 2),
            "counterparty_id = $2 AND device_code IS NULL AND ip_address = $3"
        );

        let full = BlacklistKey::new("2088", Some("dev"), Some("10.0.0.1")).unwrap();
        assert_eq!(
            key_filter(&full, 1),
            "counterparty_id = $1 AND device_code = $2 AND ip_address = $3"
        );
    }
}
