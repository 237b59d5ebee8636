//! `sentinel-core` — complaint-monitoring domain building blocks.
//!
//! This crate contains **pure domain** types (no infrastructure concerns).

pub mod blacklist;
pub mod complaint;
pub mod error;
pub mod id;
pub mod order;
pub mod tenant;

pub use blacklist::{BlacklistEntry, BlacklistKey, NewBlacklistEntry};
pub use complaint::{
    Complaint, ComplaintDetail, ComplaintStatus, NewComplaint, NewComplaintDetail,
    complaint_lock_key, parse_agent_id,
};
pub use error::{DomainError, DomainResult};
pub use id::TenantId;
pub use order::Order;
pub use tenant::{Credential, Tenant};
