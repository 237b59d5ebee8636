//! Credential cache: one provider client per tenant, built from decrypted
//! key material and reused until it expires or the credential version moves.
//!
//! Lookups take the shared lock first; a miss re-checks under the exclusive
//! lock before building, so concurrent misses for a tenant build one client.
//! Expired entries linger until `sweep` runs or the next `obtain` replaces them.

pub mod cipher;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use sentinel_core::{Credential, Tenant, TenantId};
use sentinel_observability::MonitorMetrics;

use crate::provider::{ComplaintApi, ProviderError};

pub use cipher::CredentialCipher;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential for tenant {0} is incomplete")]
    Incomplete(TenantId),

    #[error("credential of tenant {credential} presented for tenant {tenant}")]
    TenantMismatch { tenant: TenantId, credential: TenantId },

    #[error("failed to build provider client for tenant {tenant}: {source}")]
    ClientBuild {
        tenant: TenantId,
        #[source]
        source: ProviderError,
    },
}

/// Decrypted key material handed to a [`ClientFactory`].
///
/// Every field zeroizes on drop; the cache drops it as soon as the client
/// has been built.
#[derive(Debug)]
pub struct CredentialMaterial {
    pub private_key: SecretString,
    pub app_cert: SecretString,
    pub provider_root_cert: SecretString,
    pub provider_cert: SecretString,
    pub version: i64,
}

/// Builds a provider client from decrypted material.
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        tenant: &Tenant,
        material: &CredentialMaterial,
    ) -> Result<Arc<dyn ComplaintApi>, ProviderError>;
}

struct CachedClient {
    client: Arc<dyn ComplaintApi>,
    created_at: Instant,
    expires_at: Instant,
    version: i64,
}

impl CachedClient {
    fn is_fresh(&self, now: Instant, version: i64) -> bool {
        self.expires_at > now && self.version == version
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
    pub oldest_age_secs: u64,
}

pub struct CredentialCache {
    entries: RwLock<HashMap<TenantId, CachedClient>>,
    ttl: Duration,
    cipher: CredentialCipher,
    factory: Arc<dyn ClientFactory>,
    metrics: Arc<dyn MonitorMetrics>,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("ttl", &self.ttl)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl CredentialCache {
    pub fn new(
        ttl: Duration,
        cipher: CredentialCipher,
        factory: Arc<dyn ClientFactory>,
        metrics: Arc<dyn MonitorMetrics>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            cipher,
            factory,
            metrics,
        }
    }

    /// Client for `tenant`, built from `credential` on a miss.
    pub fn obtain(
        &self,
        tenant: &Tenant,
        credential: &Credential,
    ) -> Result<Arc<dyn ComplaintApi>, CredentialError> {
        if credential.tenant_id != tenant.id {
            return Err(CredentialError::TenantMismatch {
                tenant: tenant.id,
                credential: credential.tenant_id,
            });
        }
        if !credential.is_complete() {
            return Err(CredentialError::Incomplete(tenant.id));
        }

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(&tenant.id) {
                if entry.is_fresh(Instant::now(), credential.version) {
                    self.metrics.record_credential_lookup(true);
                    return Ok(entry.client.clone());
                }
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(&tenant.id) {
            if entry.is_fresh(Instant::now(), credential.version) {
                self.metrics.record_credential_lookup(true);
                return Ok(entry.client.clone());
            }
            debug!(
                tenant_id = %tenant.id,
                cached_version = entry.version,
                current_version = credential.version,
                "evicting stale provider client"
            );
            entries.remove(&tenant.id);
        }
        self.metrics.record_credential_lookup(false);

        let material = self.decrypt(credential);
        let client = self
            .factory
            .build(tenant, &material)
            .map_err(|source| CredentialError::ClientBuild {
                tenant: tenant.id,
                source,
            })?;
        drop(material);

        let now = Instant::now();
        entries.insert(
            tenant.id,
            CachedClient {
                client: client.clone(),
                created_at: now,
                expires_at: now + self.ttl,
                version: credential.version,
            },
        );
        info!(tenant_id = %tenant.id, version = credential.version, "provider client cached");
        Ok(client)
    }

    /// Evict the tenant's client regardless of its expiry.
    pub fn invalidate(&self, tenant_id: TenantId) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tenant_id)
            .is_some();
        if removed {
            info!(tenant_id = %tenant_id, "provider client invalidated");
        }
        removed
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "swept expired provider clients");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: entries.len(),
            expired: entries.values().filter(|e| e.expires_at <= now).count(),
            oldest_age_secs: entries
                .values()
                .map(|e| now.saturating_duration_since(e.created_at).as_secs())
                .max()
                .unwrap_or(0),
        }
    }

    fn decrypt(&self, credential: &Credential) -> CredentialMaterial {
        CredentialMaterial {
            private_key: self.cipher.decrypt(&credential.private_key),
            app_cert: self.cipher.decrypt(&credential.app_cert),
            provider_root_cert: self.cipher.decrypt(&credential.provider_root_cert),
            provider_cert: self.cipher.decrypt(&credential.provider_cert),
            version: credential.version,
        }
    }
}
