//! Message, bulk job, suppression, and idempotency persistence (spec §3, §4.8).

use chrono::Utc;
use sqlx::Row;

use crate::error::Result;
use crate::ids::{BulkJobId, MessageId};
use crate::types::{Channel, MessageStatus};

use super::model::{BulkJob, IdempotencyRecord, Message, SuppressionEntry};
use super::{parse_ts, Persistence};

impl Persistence {
    pub async fn insert_message(&self, m: &Message) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_messages (message_id, channel, recipient, sender, subject,
                html_body, text_body, template_id, variables, status, retry_count,
                scheduled_at, next_attempt_at, bulk_job_id, tenant_id, idempotency_key,
                request_hash, provider_message_id, created_at, updated_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(m.message_id.as_str())
        .bind(m.channel.to_string())
        .bind(&m.recipient)
        .bind(&m.sender)
        .bind(&m.subject)
        .bind(&m.html_body)
        .bind(&m.text_body)
        .bind(&m.template_id)
        .bind(m.variables.as_ref().map(|v| v.to_string()))
        .bind(m.status.as_str())
        .bind(m.retry_count)
        .bind(m.scheduled_at.to_rfc3339())
        .bind(m.next_attempt_at.to_rfc3339())
        .bind(m.bulk_job_id.as_ref().map(|b| b.as_str().to_string()))
        .bind(&m.tenant_id)
        .bind(&m.idempotency_key)
        .bind(&m.request_hash)
        .bind(&m.provider_message_id)
        .bind(m.created_at.to_rfc3339())
        .bind(m.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM email_messages WHERE message_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_message(&r)).transpose()
    }

    /// Transition a message's status. Terminal statuses (spec §3 invariant)
    /// are only overwritten by the forward-only provider-event path in
    /// `reconcile_provider_event`, never by this generic setter once
    /// terminal - callers are expected to check `is_terminal()` first.
    pub async fn update_message_status(
        &self,
        id: &MessageId,
        status: MessageStatus,
        retry_count: i64,
        next_attempt_at: chrono::DateTime<Utc>,
        provider_message_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE email_messages SET status = ?, retry_count = ?, next_attempt_at = ?,
                provider_message_id = COALESCE(?, provider_message_id), updated_at = ?
             WHERE message_id = ?",
        )
        .bind(status.as_str())
        .bind(retry_count)
        .bind(next_attempt_at.to_rfc3339())
        .bind(provider_message_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Select messages eligible for a worker pass (spec §4.8: `status in
    /// {queued,retry} AND scheduled_at <= now AND next_attempt_at <= now`).
    pub async fn select_due_messages(&self, limit: i64) -> Result<Vec<Message>> {
        let now = Utc::now().to_rfc3339();
        let rows = sqlx::query(
            "SELECT * FROM email_messages
             WHERE status IN ('queued', 'retry') AND scheduled_at <= ? AND next_attempt_at <= ?
             ORDER BY scheduled_at ASC LIMIT ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }

    pub async fn find_message_by_provider_id(&self, provider_message_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM email_messages WHERE provider_message_id = ?")
            .bind(provider_message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_message(&r)).transpose()
    }

    /// Record a permanently-failed message in the dead-letter table
    /// (spec §4.8 worker step 5: "if exhausted, write to DLQ").
    pub async fn insert_dead_letter(&self, message_id: &MessageId, channel: Channel, reason: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO dead_letters (id, message_id, channel, reason, created_at) VALUES (?,?,?,?,?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(message_id.as_str())
        .bind(channel.to_string())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query("SELECT * FROM idempotency_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_idempotency(&r)).transpose()
    }

    pub async fn insert_idempotency_record(&self, record: &IdempotencyRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO idempotency_records (key, request_hash, result_id, result_kind, created_at)
             VALUES (?,?,?,?,?)",
        )
        .bind(&record.key)
        .bind(&record.request_hash)
        .bind(&record.result_id)
        .bind(&record.result_kind)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_suppression(&self, address: &str) -> Result<Option<SuppressionEntry>> {
        let row = sqlx::query("SELECT * FROM suppression WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_suppression(&r)).transpose()
    }

    pub async fn set_suppression(&self, address: &str, reason: &str, source: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO suppression (address, kind, reason, source, updated_at) VALUES (?,'auto',?,?,?)
             ON CONFLICT(address) DO UPDATE SET reason = excluded.reason, source = excluded.source, updated_at = excluded.updated_at",
        )
        .bind(address)
        .bind(reason)
        .bind(source)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_suppression(&self, address: &str) -> Result<()> {
        sqlx::query("DELETE FROM suppression WHERE address = ?")
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_bulk_job(&self, job: &BulkJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO bulk_jobs (job_id, channel, template_id, tenant_id, total, queued,
                sending, sent, retrying, failed, suppressed, created_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&job.job_id)
        .bind(&job.channel)
        .bind(&job.template_id)
        .bind(&job.tenant_id)
        .bind(job.total)
        .bind(job.queued)
        .bind(job.sending)
        .bind(job.sent)
        .bind(job.retrying)
        .bind(job.failed)
        .bind(job.suppressed)
        .bind(job.created_at.unwrap_or_else(Utc::now).to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_bulk_job(&self, job_id: &str) -> Result<Option<BulkJob>> {
        let row = sqlx::query("SELECT * FROM bulk_jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_bulk_job(&r)).transpose()
    }

    /// Move one counted unit between two bulk-job status buckets and mark
    /// `completed_at` once nothing remains in-flight (spec §4.8).
    pub async fn move_bulk_job_counter(&self, job_id: &str, from: &str, to: &str) -> Result<()> {
        let from_col = bulk_column(from);
        let to_col = bulk_column(to);
        let stmt = format!(
            "UPDATE bulk_jobs SET {from_col} = MAX(0, {from_col} - 1), {to_col} = {to_col} + 1 WHERE job_id = ?"
        );
        sqlx::query(&stmt).bind(job_id).execute(&self.pool).await?;

        if let Some(job) = self.get_bulk_job(job_id).await? {
            if job.is_complete() && job.completed_at.is_none() {
                sqlx::query("UPDATE bulk_jobs SET completed_at = ? WHERE job_id = ?")
                    .bind(Utc::now().to_rfc3339())
                    .bind(job_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

fn bulk_column(status: &str) -> &'static str {
    match status {
        "queued" => "queued",
        "sending" => "sending",
        "sent" => "sent",
        "retrying" | "retry" => "retrying",
        "failed" => "failed",
        "suppressed" => "suppressed",
        _ => "queued",
    }
}

fn row_to_message(r: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    let channel_str: String = r.try_get("channel")?;
    let status_str: String = r.try_get("status")?;
    let variables_raw: Option<String> = r.try_get("variables")?;
    Ok(Message {
        message_id: MessageId::from_string(r.try_get::<String, _>("message_id")?),
        channel: if channel_str == "sms" { Channel::Sms } else { Channel::Email },
        recipient: r.try_get("recipient")?,
        sender: r.try_get("sender")?,
        subject: r.try_get("subject")?,
        html_body: r.try_get("html_body")?,
        text_body: r.try_get("text_body")?,
        template_id: r.try_get("template_id")?,
        variables: variables_raw.and_then(|v| serde_json::from_str(&v).ok()),
        status: status_str.parse::<MessageStatus>().unwrap_or(MessageStatus::Queued),
        retry_count: r.try_get("retry_count")?,
        scheduled_at: parse_ts(r.try_get("scheduled_at")?),
        next_attempt_at: parse_ts(r.try_get("next_attempt_at")?),
        bulk_job_id: r.try_get::<Option<String>, _>("bulk_job_id")?.map(BulkJobId::from_string),
        tenant_id: r.try_get("tenant_id")?,
        idempotency_key: r.try_get("idempotency_key")?,
        request_hash: r.try_get("request_hash")?,
        provider_message_id: r.try_get("provider_message_id")?,
        created_at: parse_ts(r.try_get("created_at")?),
        updated_at: parse_ts(r.try_get("updated_at")?),
    })
}

fn row_to_bulk_job(r: &sqlx::sqlite::SqliteRow) -> Result<BulkJob> {
    Ok(BulkJob {
        job_id: r.try_get("job_id")?,
        channel: r.try_get("channel")?,
        template_id: r.try_get("template_id")?,
        tenant_id: r.try_get("tenant_id")?,
        total: r.try_get("total")?,
        queued: r.try_get("queued")?,
        sending: r.try_get("sending")?,
        sent: r.try_get("sent")?,
        retrying: r.try_get("retrying")?,
        failed: r.try_get("failed")?,
        suppressed: r.try_get("suppressed")?,
        created_at: r.try_get::<Option<String>, _>("created_at")?.map(parse_ts),
        completed_at: r.try_get::<Option<String>, _>("completed_at")?.map(parse_ts),
    })
}

fn row_to_suppression(r: &sqlx::sqlite::SqliteRow) -> Result<SuppressionEntry> {
    let reason_str: String = r.try_get("reason")?;
    Ok(SuppressionEntry {
        address: r.try_get("address")?,
        reason: match reason_str.as_str() {
            "bounce" => crate::types::SuppressionReason::Bounce,
            "complaint" => crate::types::SuppressionReason::Complaint,
            _ => crate::types::SuppressionReason::Manual,
        },
        source: r.try_get("source")?,
        updated_at: parse_ts(r.try_get("updated_at")?),
    })
}

fn row_to_idempotency(r: &sqlx::sqlite::SqliteRow) -> Result<IdempotencyRecord> {
    Ok(IdempotencyRecord {
        key: r.try_get("key")?,
        request_hash: r.try_get("request_hash")?,
        result_id: r.try_get("result_id")?,
        result_kind: r.try_get("result_kind")?,
        created_at: parse_ts(r.try_get("created_at")?),
    })
}
