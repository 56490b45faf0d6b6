//! Notification and delivery log queries.

use super::db::ServerDatabase;
use super::models::{NotificationLog, NotificationRow};
use crate::notification::{Channel, LogStatus, Notification, NotificationStatus, TriggerType};
use punchpass_core::DatabaseError;

/// A delivery attempt about to start.
#[derive(Debug, Clone, Copy)]
pub struct NewLog<'a> {
    pub notification_id: &'a str,
    pub card_id: &'a str,
    pub execution_id: &'a str,
    pub trigger_type: TriggerType,
    pub channel: Channel,
    pub scheduled_for: Option<i64>,
}

/// Terminal state of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOutcome {
    pub status: LogStatus,
    pub provider_message_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl LogOutcome {
    pub const fn sent(provider_message_id: Option<String>) -> Self {
        Self {
            status: LogStatus::Sent,
            provider_message_id,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: LogStatus::Failed,
            provider_message_id: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn skipped(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: LogStatus::Skipped,
            ..Self::failed(code, message)
        }
    }
}

impl ServerDatabase {
    // =========================================================================
    // Notifications
    // =========================================================================

    pub async fn insert_notification(&self, n: &Notification) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO notifications (id, business_id, title, message, status, delivery_mode, \
             schedule_type, scheduled_at, repeat_pattern, repeat_days, monthly_day_of_month, \
             repeat_time_local, timezone, next_run_at, last_run_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&n.id)
        .bind(&n.business_id)
        .bind(&n.title)
        .bind(&n.message)
        .bind(n.status.as_str())
        .bind(n.delivery_mode.as_str())
        .bind(n.schedule_type.as_str())
        .bind(n.scheduled_at)
        .bind(n.repeat_pattern.map(|p| p.as_str()))
        .bind(n.repeat_days.join(","))
        .bind(n.monthly_day_of_month.map(i64::from))
        .bind(&n.repeat_time_local)
        .bind(&n.timezone)
        .bind(n.next_run_at)
        .bind(n.last_run_at)
        .bind(n.created_at)
        .bind(n.updated_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_notification(&self, id: &str) -> Result<Option<Notification>, DatabaseError> {
        let row = sqlx::query_as::<_, NotificationRow>("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| Notification::from_row(r).map_err(|e| DatabaseError::Corrupt(e.to_string())))
            .transpose()
    }

    /// Up to `limit` active scheduled notifications that are due at `now`, or
    /// are REPEAT schedules still waiting for their first run time. Oldest due
    /// first, then oldest created.
    pub async fn due_notifications(
        &self,
        now: i64,
        limit: u32,
    ) -> Result<Vec<NotificationRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            "SELECT * FROM notifications \
             WHERE status = 'ACTIVE' AND delivery_mode = 'SCHEDULED' \
               AND ((next_run_at IS NOT NULL AND next_run_at <= ?) \
                 OR (schedule_type = 'REPEAT' AND next_run_at IS NULL)) \
             ORDER BY COALESCE(next_run_at, 0), created_at \
             LIMIT ?",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Store a lazily computed first run time.
    pub async fn set_next_run(
        &self,
        id: &str,
        next_run_at: i64,
        now: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE notifications SET next_run_at = ?, updated_at = ? WHERE id = ?")
            .bind(next_run_at)
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Persist the state after a scheduled run.
    pub async fn record_run(
        &self,
        id: &str,
        last_run_at: i64,
        next_run_at: Option<i64>,
        status: NotificationStatus,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE notifications SET last_run_at = ?, next_run_at = ?, status = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(last_run_at)
        .bind(next_run_at)
        .bind(status.as_str())
        .bind(last_run_at)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    // =========================================================================
    // Delivery logs
    // =========================================================================

    /// Create a QUEUED log row and return its id.
    pub async fn insert_queued_log(
        &self,
        log: NewLog<'_>,
        now: i64,
    ) -> Result<String, DatabaseError> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO notification_logs (id, notification_id, card_id, execution_id, \
             trigger_type, channel, status, scheduled_for, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(log.notification_id)
        .bind(log.card_id)
        .bind(log.execution_id)
        .bind(log.trigger_type.as_str())
        .bind(log.channel.as_str())
        .bind(LogStatus::Queued.as_str())
        .bind(log.scheduled_for)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(id)
    }

    /// Move a QUEUED log row to its terminal state. Rows already finished are
    /// left alone; returns whether the row was updated.
    pub async fn finish_log(
        &self,
        id: &str,
        outcome: &LogOutcome,
        attempted_at: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE notification_logs SET status = ?, attempted_at = ?, provider_message_id = ?, \
             error_code = ?, error_message = ? \
             WHERE id = ? AND status = 'QUEUED'",
        )
        .bind(outcome.status.as_str())
        .bind(attempted_at)
        .bind(&outcome.provider_message_id)
        .bind(&outcome.error_code)
        .bind(&outcome.error_message)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn logs_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Vec<NotificationLog>, DatabaseError> {
        let logs = sqlx::query_as::<_, NotificationLog>(
            "SELECT * FROM notification_logs WHERE execution_id = ? ORDER BY created_at, rowid",
        )
        .bind(execution_id)
        .fetch_all(self.pool())
        .await?;

        Ok(logs)
    }

    pub async fn count_logs_for_notification(
        &self,
        notification_id: &str,
    ) -> Result<i64, DatabaseError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notification_logs WHERE notification_id = ?")
                .bind(notification_id)
                .fetch_one(self.pool())
                .await?;

        Ok(count)
    }
}
