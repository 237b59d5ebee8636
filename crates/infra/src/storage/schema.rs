//! Postgres schema for the monitor's tables.
//!
//! Statements are idempotent (`IF NOT EXISTS`) so `apply_schema` can run on
//! every start. The blacklist key needs Postgres 15+ for
//! `UNIQUE NULLS NOT DISTINCT`.

use sqlx::PgPool;
use tracing::info;

use super::{StorageError, map_sqlx_error};

pub const SCHEMA: &str = r#"
-- =======================================================================
-- Tenants ("subjects") and their provider credentials
-- =======================================================================
CREATE TABLE IF NOT EXISTS subjects (
    id          BIGINT PRIMARY KEY,
    app_id      VARCHAR(64)  NOT NULL,
    name        VARCHAR(255) NOT NULL DEFAULT '',
    active      BOOLEAN      NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS subject_credentials (
    subject_id          BIGINT PRIMARY KEY REFERENCES subjects (id),
    private_key         TEXT   NOT NULL DEFAULT '',
    app_cert            TEXT   NOT NULL DEFAULT '',
    provider_root_cert  TEXT   NOT NULL DEFAULT '',
    provider_cert       TEXT   NOT NULL DEFAULT '',
    version             BIGINT NOT NULL DEFAULT 1,
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- =======================================================================
-- Complaints: unique per (tenant, provider task id)
-- =======================================================================
CREATE TABLE IF NOT EXISTS complaints (
    id                     BIGSERIAL PRIMARY KEY,
    subject_id             BIGINT       NOT NULL,
    task_id                VARCHAR(64)  NOT NULL,
    provider_complaint_id  BIGINT       NOT NULL DEFAULT 0,
    complaint_no           VARCHAR(64)  NOT NULL,
    agent_id               BIGINT       NOT NULL DEFAULT 0,
    status                 VARCHAR(32)  NOT NULL,
    complainant_id         VARCHAR(64)  NOT NULL DEFAULT '',
    reason                 TEXT         NOT NULL DEFAULT '',
    reported_at            TIMESTAMP    NOT NULL,
    provider_created       VARCHAR(32)  NOT NULL DEFAULT '',
    provider_modified      VARCHAR(32)  NOT NULL DEFAULT '',
    created_at             TIMESTAMPTZ  NOT NULL DEFAULT now(),
    CONSTRAINT uniq_complaint_task UNIQUE (subject_id, task_id)
);

CREATE INDEX IF NOT EXISTS idx_complaints_complainant
    ON complaints (subject_id, complainant_id);

CREATE TABLE IF NOT EXISTS complaint_details (
    id                 BIGSERIAL PRIMARY KEY,
    complaint_id       BIGINT        NOT NULL REFERENCES complaints (id),
    subject_id         BIGINT        NOT NULL,
    agent_id           BIGINT        NOT NULL DEFAULT 0,
    merchant_order_no  VARCHAR(64)   NOT NULL,
    platform_order_no  VARCHAR(64)   NOT NULL DEFAULT '',
    order_amount       NUMERIC(12,2) NOT NULL DEFAULT 0,
    complaint_amount   NUMERIC(12,2) NOT NULL DEFAULT 0,
    pushed             BOOLEAN       NOT NULL DEFAULT FALSE,
    pushed_at          TIMESTAMPTZ,
    CONSTRAINT uniq_complaint_order UNIQUE (complaint_id, merchant_order_no)
);

-- =======================================================================
-- Orders written by the tenant's checkout (read-only here)
-- =======================================================================
CREATE TABLE IF NOT EXISTS orders (
    id                 BIGSERIAL PRIMARY KEY,
    subject_id         BIGINT      NOT NULL,
    merchant_order_no  VARCHAR(64) NOT NULL,
    platform_order_no  VARCHAR(64) NOT NULL DEFAULT '',
    buyer_id           VARCHAR(64),
    pay_status         SMALLINT    NOT NULL DEFAULT 0,
    pay_ip             VARCHAR(64),
    first_open_ip      VARCHAR(64)
);

CREATE INDEX IF NOT EXISTS idx_orders_merchant_no ON orders (subject_id, merchant_order_no);
CREATE INDEX IF NOT EXISTS idx_orders_platform_no ON orders (subject_id, platform_order_no);

-- =======================================================================
-- Blacklist: keyed by counterparty identity; NULL device/ip are values
-- =======================================================================
CREATE TABLE IF NOT EXISTS blacklist (
    id                 BIGSERIAL PRIMARY KEY,
    counterparty_id    VARCHAR(64)  NOT NULL,
    device_code        VARCHAR(128),
    ip_address         VARCHAR(64),
    source_subject_id  BIGINT       NOT NULL,
    risk_count         BIGINT       NOT NULL DEFAULT 1,
    last_risk_at       TIMESTAMPTZ,
    remark             VARCHAR(255) NOT NULL DEFAULT '',
    created_at         TIMESTAMPTZ  NOT NULL DEFAULT now(),
    updated_at         TIMESTAMPTZ  NOT NULL DEFAULT now(),
    CONSTRAINT uniq_blacklist UNIQUE NULLS NOT DISTINCT (counterparty_id, device_code, ip_address)
);

-- =======================================================================
-- Outbound notifications, drained by an external consumer
-- =======================================================================
CREATE TABLE IF NOT EXISTS notification_queue (
    id          BIGSERIAL PRIMARY KEY,
    kind        VARCHAR(32) NOT NULL,
    priority    SMALLINT    NOT NULL,
    payload     JSONB       NOT NULL,
    status      VARCHAR(16) NOT NULL DEFAULT 'pending',
    attempts    INT         NOT NULL DEFAULT 0,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_notification_pending
    ON notification_queue (status, priority DESC, id);
"#;

/// Create any missing tables and indexes.
pub async fn apply_schema(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("apply_schema", e))?;
    info!("database schema applied");
    Ok(())
}
