//! Tenant directory: which tenants should have a running worker.

pub mod postgres;

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use sentinel_core::{Credential, Tenant, TenantId};

use crate::storage::StorageError;

pub use postgres::PostgresTenantDirectory;

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Tenants that are active and hold a complete credential.
    async fn list_eligible(&self) -> Result<Vec<Tenant>, StorageError>;

    async fn credential(&self, tenant_id: TenantId) -> Result<Option<Credential>, StorageError>;
}

/// Directory kept in process memory (for tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    tenants: RwLock<BTreeMap<TenantId, (Tenant, Option<Credential>)>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, tenant: Tenant, credential: Option<Credential>) {
        self.tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant.id, (tenant, credential));
    }

    pub fn set_active(&self, tenant_id: TenantId, active: bool) {
        if let Some((tenant, _)) = self
            .tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&tenant_id)
        {
            tenant.active = active;
        }
    }

    /// Replace the credential, bumping its version past the previous one.
    pub fn rotate_credential(&self, mut credential: Credential) {
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, slot)) = tenants.get_mut(&credential.tenant_id) {
            let previous = slot.as_ref().map(|c| c.version).unwrap_or(0);
            credential.version = credential.version.max(previous + 1);
            *slot = Some(credential);
        }
    }

    pub fn remove(&self, tenant_id: TenantId) {
        self.tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tenant_id);
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn list_eligible(&self) -> Result<Vec<Tenant>, StorageError> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tenants
            .values()
            .filter(|(tenant, credential)| {
                tenant.active && credential.as_ref().is_some_and(Credential::is_complete)
            })
            .map(|(tenant, _)| tenant.clone())
            .collect())
    }

    async fn credential(&self, tenant_id: TenantId) -> Result<Option<Credential>, StorageError> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tenants.get(&tenant_id).and_then(|(_, c)| c.clone()))
    }
}
