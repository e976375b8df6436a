//! Notification queue persistence (spec §4.1, §4.6).

use chrono::Utc;
use sqlx::Row;

use crate::error::Result;
use crate::ids::NotificationId;
use crate::types::{NotificationKind, NotificationStatus, Priority};

use super::model::Notification;
use super::Persistence;

impl Persistence {
    pub async fn upsert_notification(&self, n: &Notification) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (id, call_id, kind, subscriber_id, priority, status,
                retry_count, created_at, next_attempt_at, sent_at, delivery_ms, provider_message_id, payload)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                retry_count = excluded.retry_count,
                next_attempt_at = excluded.next_attempt_at,
                sent_at = excluded.sent_at,
                delivery_ms = excluded.delivery_ms,
                provider_message_id = excluded.provider_message_id",
        )
        .bind(n.id.as_str())
        .bind(n.call_id.as_str())
        .bind(n.kind.as_str())
        .bind(&n.subscriber_id)
        .bind(n.priority.as_str())
        .bind(n.status.as_str())
        .bind(n.retry_count)
        .bind(n.created_at.to_rfc3339())
        .bind(n.next_attempt_at.map(|t| t.to_rfc3339()))
        .bind(n.sent_at.map(|t| t.to_rfc3339()))
        .bind(n.delivery_ms)
        .bind(&n.provider_message_id)
        .bind(n.payload.as_ref().map(|p| p.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Select pending, currently-eligible notifications in the priority
    /// order required by spec §4.1: urgent > high > normal > low,
    /// tie-break by kind severity (`call_failed` > `call_completed` >
    /// `call_transcript`), tie-break by `created_at` ascending. SQLite has
    /// no native enum ordering, so we compute a numeric rank column in SQL
    /// via `CASE`. Rows whose `next_attempt_at` is still in the future
    /// (a backed-off retry) are skipped until they become eligible.
    pub async fn select_pending_notifications(&self, batch: i64) -> Result<Vec<Notification>> {
        let now = Utc::now().to_rfc3339();
        let rows = sqlx::query(
            "SELECT *,
                CASE priority WHEN 'urgent' THEN 3 WHEN 'high' THEN 2 WHEN 'normal' THEN 1 ELSE 0 END AS priority_rank,
                CASE kind WHEN 'call_failed' THEN 2 WHEN 'call_completed' THEN 1 ELSE 0 END AS kind_rank
             FROM notifications
             WHERE status IN ('pending', 'retrying')
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
             ORDER BY priority_rank DESC, kind_rank DESC, created_at ASC
             LIMIT ?",
        )
        .bind(&now)
        .bind(batch)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_notification).collect()
    }

    pub async fn get_notification(&self, id: &NotificationId) -> Result<Option<Notification>> {
        let row = sqlx::query("SELECT * FROM notifications WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_notification(&r)).transpose()
    }

    pub async fn increment_metric(&self, date: &str, kind: &str, outcome: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO metrics (date, kind, outcome, count) VALUES (?,?,?,1)
             ON CONFLICT(date, kind, outcome) DO UPDATE SET count = count + 1",
        )
        .bind(date)
        .bind(kind)
        .bind(outcome)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_notification(r: &sqlx::sqlite::SqliteRow) -> Result<Notification> {
    let priority_str: String = r.try_get("priority")?;
    let status_str: String = r.try_get("status")?;
    let kind_str: String = r.try_get("kind")?;
    let payload_raw: Option<String> = r.try_get("payload")?;
    Ok(Notification {
        id: NotificationId::from_string(r.try_get::<String, _>("id")?),
        call_id: crate::ids::CallId::from_string(r.try_get::<String, _>("call_id")?),
        kind: NotificationKind::from(kind_str.as_str()),
        subscriber_id: r.try_get("subscriber_id")?,
        priority: priority_str.parse::<Priority>().unwrap_or(Priority::Normal),
        status: status_str.parse::<NotificationStatus>().unwrap_or(NotificationStatus::Pending),
        retry_count: r.try_get("retry_count")?,
        created_at: super::parse_ts(r.try_get("created_at")?),
        next_attempt_at: r.try_get::<Option<String>, _>("next_attempt_at")?.map(super::parse_ts),
        sent_at: r.try_get::<Option<String>, _>("sent_at")?.map(super::parse_ts),
        delivery_ms: r.try_get("delivery_ms")?,
        provider_message_id: r.try_get("provider_message_id")?,
        payload: payload_raw.and_then(|p| serde_json::from_str(&p).ok()),
    })
}
