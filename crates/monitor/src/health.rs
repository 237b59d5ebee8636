//! Health summary for monitoring collaborators.

use chrono::{DateTime, Utc};
use serde::Serialize;

use sentinel_infra::credentials::CacheStats;

use crate::manager::ManagerStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// No pass has completed yet, or the last one failed.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub workers: usize,
    pub last_reconcile_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
    pub credential_cache: CacheStats,
}

impl HealthReport {
    pub fn from_stats(stats: &ManagerStats, credential_cache: CacheStats) -> Self {
        let (status, detail) = match (&stats.last_reconcile_at, &stats.last_reconcile_error) {
            (None, _) => (HealthStatus::Degraded, Some("no reconciliation pass yet".to_string())),
            (Some(_), Some(err)) => (HealthStatus::Degraded, Some(err.clone())),
            (Some(_), None) => (HealthStatus::Healthy, None),
        };
        Self {
            status,
            workers: stats.total_workers,
            last_reconcile_at: stats.last_reconcile_at,
            detail,
            credential_cache,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
