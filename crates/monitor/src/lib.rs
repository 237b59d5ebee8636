//! `sentinel-monitor` — tenant workers, their supervisor and the worker
//! manager that keeps one worker per eligible tenant.

pub mod blacklist;
pub mod error;
pub mod health;
pub mod manager;
pub mod runtime;
pub mod worker;

pub use blacklist::{BlacklistOutcome, BlacklistService, RiskContext};
pub use error::{ComplaintError, FaultScope, TickError, WorkerFault};
pub use health::{HealthReport, HealthStatus};
pub use manager::{ManagerStats, ReconcileError, ReconcilePlan, WorkerManager};
pub use worker::{ComplaintOutcome, TenantWorker, TickSummary, WorkerContext};
