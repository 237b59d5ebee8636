//! Blacklist entries: one risk record per counterparty identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TenantId;

/// Identity of a blacklist entry.
///
/// Absent device/IP take part in uniqueness as a literal null: the key
/// `(u, None, None)` never matches `(u, Some(d), None)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlacklistKey {
    pub counterparty_id: String,
    pub device_code: Option<String>,
    pub ip_address: Option<String>,
}

impl BlacklistKey {
    /// Build a key, storing empty device/IP strings as absent.
    pub fn new(
        counterparty_id: impl Into<String>,
        device_code: Option<&str>,
        ip_address: Option<&str>,
    ) -> DomainResult<Self> {
        let counterparty_id = counterparty_id.into().trim().to_string();
        if counterparty_id.is_empty() {
            return Err(DomainError::validation("blacklist counterparty id is empty"));
        }
        Ok(Self {
            counterparty_id,
            device_code: normalize(device_code),
            ip_address: normalize(ip_address),
        })
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A blacklist row about to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBlacklistEntry {
    pub key: BlacklistKey,
    /// Tenant whose complaint first triggered the entry. Not part of the key.
    pub source_tenant: TenantId,
    pub risk_count: i64,
    pub last_risk_at: DateTime<Utc>,
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: i64,
    pub key: BlacklistKey,
    pub source_tenant: TenantId,
    pub risk_count: i64,
    pub last_risk_at: Option<DateTime<Utc>>,
    pub remark: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlacklistEntry {
    pub fn from_new(id: i64, new: NewBlacklistEntry, now: DateTime<Utc>) -> Self {
        Self {
            id,
            key: new.key,
            source_tenant: new.source_tenant,
            risk_count: new.risk_count,
            last_risk_at: Some(new.last_risk_at),
            remark: new.remark,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record one more risk event against this entry.
    pub fn record_risk(&mut self, at: DateTime<Utc>) {
        self.risk_count += 1;
        self.last_risk_at = Some(at);
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parts_become_null() {
        let key = BlacklistKey::new("2088", Some(""), Some(" 10.0.0.1 ")).unwrap();
        assert_eq!(key.device_code, None);
        assert_eq!(key.ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn null_is_not_a_wildcard() {
        let bare = BlacklistKey::new("2088", None, None).unwrap();
        let with_ip = BlacklistKey::new("2088", None, Some("10.0.0.1")).unwrap();
        assert_ne!(bare, with_ip);
    }

    #[test]
    fn blank_counterparty_is_rejected() {
        assert!(BlacklistKey::new("  ", None, None).is_err());
    }

    #[test]
    fn risk_events_accumulate() {
        let now = Utc::now();
        let mut entry = BlacklistEntry::from_new(
            1,
            NewBlacklistEntry {
                key: BlacklistKey::new("2088", None, None).unwrap(),
                source_tenant: TenantId::new(3),
                risk_count: 2,
                last_risk_at: now,
                remark: "auto".into(),
            },
            now,
        );
        entry.record_risk(now);
        assert_eq!(entry.risk_count, 3);
    }
}
