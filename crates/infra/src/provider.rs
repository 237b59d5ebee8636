//! Contract of the payment provider's complaint API.
//!
//! The wire format lives in whichever client a `ClientFactory` builds; this
//! module only fixes the shapes the monitor consumes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sentinel_core::complaint::PROVIDER_TIME_FORMAT;

/// Largest page the provider will serve.
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider transport failure: {0}")]
    Transport(String),

    #[error("provider rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

/// Inclusive time range a complaint listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl QueryWindow {
    /// `days_back` days before `now` through one day after it. The extra day
    /// absorbs clock skew between us and the provider.
    pub fn trailing(now: NaiveDateTime, days_back: u32) -> Self {
        let begin = now
            .checked_sub_days(Days::new(u64::from(days_back)))
            .unwrap_or(NaiveDateTime::MIN);
        let end = now.checked_add_days(Days::new(1)).unwrap_or(NaiveDateTime::MAX);
        Self { begin, end }
    }

    pub fn begin_str(&self) -> String {
        self.begin.format(PROVIDER_TIME_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(PROVIDER_TIME_FORMAT).to_string()
    }
}

/// One complaint in a listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplaintSummary {
    /// Provider numeric id; zero happens and is tolerated.
    pub complaint_id: i64,
    /// Dedup key. Items with an empty task id are skipped.
    pub task_id: String,
    pub status: String,
    pub complainant_id: String,
    pub reported_at: String,
    pub modified_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplaintPage {
    pub items: Vec<ComplaintSummary>,
    pub total: i64,
}

/// One order referenced by a complaint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub merchant_order_no: String,
    pub platform_order_no: String,
    pub amount: f64,
    pub complaint_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplaintDetailView {
    pub status: String,
    pub complainant_id: String,
    pub reason: String,
    pub reported_at: String,
    pub modified_at: String,
    pub order_lines: Vec<OrderLine>,
}

/// Complaint API for one tenant.
#[async_trait]
pub trait ComplaintApi: Send + Sync {
    async fn list_complaints(
        &self,
        window: &QueryWindow,
        page: u32,
        page_size: u32,
    ) -> Result<ComplaintPage, ProviderError>;

    async fn complaint_detail(&self, complaint_id: i64) -> Result<ComplaintDetailView, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::complaint::parse_provider_time;

    #[test]
    fn trailing_window_spans_back_and_one_day_ahead() {
        let now = parse_provider_time("2025-10-22 08:30:00").unwrap();
        let window = QueryWindow::trailing(now, 10);
        assert_eq!(window.begin_str(), "2025-10-12 08:30:00");
        assert_eq!(window.end_str(), "2025-10-23 08:30:00");
    }
}
