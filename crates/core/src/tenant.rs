//! Tenants and their provider credentials.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::id::TenantId;

/// An onboarded merchant account monitored on the provider.
///
/// Read-only to this workspace: tenants are created and updated elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Provider application id the credential was issued for.
    pub app_id: String,
    pub name: String,
    pub active: bool,
}

impl Tenant {
    pub fn new(id: TenantId, app_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            app_id: app_id.into(),
            name: name.into(),
            active: true,
        }
    }
}

/// Stored key material for one tenant (1:1).
///
/// Blobs are kept exactly as stored, which is usually AES-CFB ciphertext.
/// `version` increases every time an operator rotates any of the blobs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub tenant_id: TenantId,
    pub private_key: String,
    pub app_cert: String,
    pub provider_root_cert: String,
    pub provider_cert: String,
    pub version: i64,
}

impl Credential {
    /// All four blobs are present. Incomplete credentials never yield a client.
    pub fn is_complete(&self) -> bool {
        !self.private_key.is_empty()
            && !self.app_cert.is_empty()
            && !self.provider_root_cert.is_empty()
            && !self.provider_cert.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("tenant_id", &self.tenant_id)
            .field("version", &self.version)
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential {
            tenant_id: TenantId::new(7),
            private_key: "pk".into(),
            app_cert: "app".into(),
            provider_root_cert: "root".into(),
            provider_cert: "pub".into(),
            version: 1,
        }
    }

    #[test]
    fn complete_requires_every_blob() {
        assert!(credential().is_complete());

        let mut missing = credential();
        missing.provider_root_cert.clear();
        assert!(!missing.is_complete());
    }

    #[test]
    fn debug_hides_key_material() {
        let rendered = format!("{:?}", credential());
        assert!(rendered.contains("version: 1"));
        assert!(!rendered.contains("pk"));
    }
}
