//! Notification queue stored in the `notification_queue` table.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use super::{NotificationKind, NotificationSink, NotifyError, Priority};

#[derive(Debug, Clone)]
pub struct PostgresNotificationSink {
    pool: Arc<PgPool>,
}

impl PostgresNotificationSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl NotificationSink for PostgresNotificationSink {
    #[instrument(skip(self, payload), fields(kind = kind.as_str(), priority = priority.value()), err)]
    async fn enqueue(
        &self,
        kind: NotificationKind,
        priority: Priority,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        sqlx::query(
            r#"
            INSERT INTO notification_queue (kind, priority, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(kind.as_str())
        .bind(priority.value())
        .bind(&payload)
        .execute(&*self.pool)
        .await
        .map_err(|e| NotifyError::Unavailable(format!("enqueue {}: {e}", kind.as_str())))?;
        Ok(())
    }
}
