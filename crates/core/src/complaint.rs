//! Complaints raised against a tenant and their per-order line items.

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TenantId;

/// Timestamp layout used by the provider for every complaint field.
pub const PROVIDER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Order numbers issued through an agent look like `BY<agent><20YYMMDD>...`.
static AGENT_ORDER_NO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^BY(\d+)(20\d{6})").expect("agent order number pattern is valid")
});

/// Extract the agent id embedded in a merchant order number.
///
/// Returns `0` when the number is too short, does not follow the agent
/// layout, or the id does not fit in an `i64`.
pub fn parse_agent_id(order_no: &str) -> i64 {
    if order_no.len() < 12 {
        return 0;
    }

    AGENT_ORDER_NO
        .captures(order_no)
        .and_then(|caps| caps.get(1))
        .and_then(|agent| agent.as_str().parse::<i64>().ok())
        .unwrap_or(0)
}

/// Coordination key guarding ingestion of one provider complaint.
pub fn complaint_lock_key(task_id: &str) -> String {
    format!("complaint:lock:{task_id}")
}

/// Parse a provider timestamp (local wall-clock time).
pub fn parse_provider_time(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(value, PROVIDER_TIME_FORMAT).ok()
}

/// Parse the reported time, falling back to "now" for missing or malformed values.
pub fn reported_at_or_now(value: &str) -> NaiveDateTime {
    match parse_provider_time(value) {
        Some(parsed) => parsed,
        None => {
            tracing::warn!(raw = %value, "unparseable complaint time; using current time");
            Local::now().naive_local()
        }
    }
}

/// Complaint status vocabulary used by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ComplaintStatus {
    WaitProcess,
    Processing,
    Processed,
    Overdue,
    OverdueProcessed,
    PartOverdue,
    DropComplain,
    DropProcessed,
    DropOverdueComplain,
    DropOverdueProcessed,
    /// Any value this build does not know about yet.
    Other(String),
}

impl ComplaintStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "WAIT_PROCESS" => Self::WaitProcess,
            "PROCESSING" => Self::Processing,
            "PROCESSED" => Self::Processed,
            "OVERDUE" => Self::Overdue,
            "OVERDUE_PROCESSED" => Self::OverdueProcessed,
            "PART_OVERDUE" => Self::PartOverdue,
            "DROP_COMPLAIN" => Self::DropComplain,
            "DROP_PROCESSED" => Self::DropProcessed,
            "DROP_OVERDUE_COMPLAIN" => Self::DropOverdueComplain,
            "DROP_OVERDUE_PROCESSED" => Self::DropOverdueProcessed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::WaitProcess => "WAIT_PROCESS",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Overdue => "OVERDUE",
            Self::OverdueProcessed => "OVERDUE_PROCESSED",
            Self::PartOverdue => "PART_OVERDUE",
            Self::DropComplain => "DROP_COMPLAIN",
            Self::DropProcessed => "DROP_PROCESSED",
            Self::DropOverdueComplain => "DROP_OVERDUE_COMPLAIN",
            Self::DropOverdueProcessed => "DROP_OVERDUE_PROCESSED",
            Self::Other(raw) => raw,
        }
    }

    /// Still waiting on the merchant.
    pub fn is_processing(&self) -> bool {
        matches!(self, Self::WaitProcess | Self::Processing)
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Processed | Self::OverdueProcessed)
    }

    /// Withdrawn by the complainant.
    pub fn is_dropped(&self) -> bool {
        matches!(
            self,
            Self::DropComplain
                | Self::DropProcessed
                | Self::DropOverdueComplain
                | Self::DropOverdueProcessed
        )
    }

    pub fn is_overdue(&self) -> bool {
        matches!(
            self,
            Self::Overdue
                | Self::OverdueProcessed
                | Self::PartOverdue
                | Self::DropOverdueComplain
                | Self::DropOverdueProcessed
        )
    }
}

impl From<String> for ComplaintStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ComplaintStatus> for String {
    fn from(value: ComplaintStatus) -> Self {
        value.as_str().to_string()
    }
}

/// A complaint about to be persisted for the first time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComplaint {
    pub tenant_id: TenantId,
    /// Provider task id; unique per tenant.
    pub task_id: String,
    /// Provider numeric complaint id. Zero is anomalous but accepted.
    pub provider_complaint_id: i64,
    /// First merchant order number of the complaint.
    pub complaint_no: String,
    pub agent_id: i64,
    pub status: ComplaintStatus,
    pub complainant_id: String,
    pub reason: String,
    pub reported_at: NaiveDateTime,
    pub provider_created: String,
    pub provider_modified: String,
}

impl NewComplaint {
    /// Validate the fields the storage layer relies on.
    pub fn validate(&self) -> DomainResult<()> {
        if self.task_id.trim().is_empty() {
            return Err(DomainError::validation("complaint task id is empty"));
        }
        if self.complaint_no.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "complaint {} has no merchant order number",
                self.task_id
            )));
        }
        Ok(())
    }

    pub fn lock_key(&self) -> String {
        complaint_lock_key(&self.task_id)
    }
}

/// A persisted complaint header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: i64,
    pub tenant_id: TenantId,
    pub task_id: String,
    pub provider_complaint_id: i64,
    pub complaint_no: String,
    pub agent_id: i64,
    pub status: ComplaintStatus,
    pub complainant_id: String,
    pub reason: String,
    pub reported_at: NaiveDateTime,
    pub provider_created: String,
    pub provider_modified: String,
    pub created_at: DateTime<Utc>,
}

impl Complaint {
    pub fn from_new(id: i64, new: NewComplaint, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id: new.tenant_id,
            task_id: new.task_id,
            provider_complaint_id: new.provider_complaint_id,
            complaint_no: new.complaint_no,
            agent_id: new.agent_id,
            status: new.status,
            complainant_id: new.complainant_id,
            reason: new.reason,
            reported_at: new.reported_at,
            provider_created: new.provider_created,
            provider_modified: new.provider_modified,
            created_at,
        }
    }

    pub fn lock_key(&self) -> String {
        complaint_lock_key(&self.task_id)
    }
}

/// One order line of a complaint, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComplaintDetail {
    pub tenant_id: TenantId,
    pub agent_id: i64,
    pub merchant_order_no: String,
    pub platform_order_no: String,
    pub order_amount: f64,
    pub complaint_amount: f64,
}

impl NewComplaintDetail {
    pub fn new(
        tenant_id: TenantId,
        merchant_order_no: impl Into<String>,
        platform_order_no: impl Into<String>,
        order_amount: f64,
        complaint_amount: f64,
    ) -> Self {
        let merchant_order_no = merchant_order_no.into();
        Self {
            tenant_id,
            agent_id: parse_agent_id(&merchant_order_no),
            merchant_order_no,
            platform_order_no: platform_order_no.into(),
            order_amount,
            complaint_amount,
        }
    }
}

/// A persisted order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplaintDetail {
    pub id: i64,
    pub complaint_id: i64,
    pub tenant_id: TenantId,
    pub agent_id: i64,
    pub merchant_order_no: String,
    pub platform_order_no: String,
    pub order_amount: f64,
    pub complaint_amount: f64,
    /// Set once the line has been forwarded to the notification consumer.
    pub pushed: bool,
    pub pushed_at: Option<DateTime<Utc>>,
}

impl ComplaintDetail {
    pub fn from_new(id: i64, complaint_id: i64, new: NewComplaintDetail) -> Self {
        Self {
            id,
            complaint_id,
            tenant_id: new.tenant_id,
            agent_id: new.agent_id,
            merchant_order_no: new.merchant_order_no,
            platform_order_no: new.platform_order_no,
            order_amount: new.order_amount,
            complaint_amount: new.complaint_amount,
            pushed: false,
            pushed_at: None,
        }
    }
}
