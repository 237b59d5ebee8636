//! Tenant directory over the `subjects` / `subject_credentials` tables.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use sentinel_core::{Credential, Tenant, TenantId};

use super::TenantDirectory;
use crate::storage::{StorageError, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresTenantDirectory {
    pool: Arc<PgPool>,
}

impl PostgresTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl TenantDirectory for PostgresTenantDirectory {
    #[instrument(skip(self), err)]
    async fn list_eligible(&self) -> Result<Vec<Tenant>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.app_id, s.name, s.active
            FROM subjects s
            JOIN subject_credentials c ON c.subject_id = s.id
            WHERE s.active
              AND c.private_key <> ''
              AND c.app_cert <> ''
              AND c.provider_root_cert <> ''
              AND c.provider_cert <> ''
            ORDER BY s.id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_eligible_tenants", e))?;

        rows.iter()
            .map(|row| -> Result<Tenant, sqlx::Error> {
                Ok(Tenant {
                    id: TenantId::new(row.try_get("id")?),
                    app_id: row.try_get("app_id")?,
                    name: row.try_get("name")?,
                    active: row.try_get("active")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("decode_tenant", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn credential(&self, tenant_id: TenantId) -> Result<Option<Credential>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT subject_id, private_key, app_cert, provider_root_cert, provider_cert, version
            FROM subject_credentials
            WHERE subject_id = $1
            "#,
        )
        .bind(tenant_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_credential", e))?;

        row.map(|row| -> Result<Credential, sqlx::Error> {
            Ok(Credential {
                tenant_id: TenantId::new(row.try_get("subject_id")?),
                private_key: row.try_get("private_key")?,
                app_cert: row.try_get("app_cert")?,
                provider_root_cert: row.try_get("provider_root_cert")?,
                provider_cert: row.try_get("provider_cert")?,
                version: row.try_get("version")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("decode_credential", e))
    }
}
