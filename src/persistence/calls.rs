//! Call, transition, transcript, and digit-event operations (spec §4.1).

use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use crate::error::{OrchestratorError, Result};
use crate::ids::{CallId, DigitEventId};
use crate::types::{AnsweredBy, CallDirection, CallState};

use super::model::{Call, CallStateTransition, DigitEvent, Transcript};
use super::Persistence;

impl Persistence {
    /// Insert a new call row, or update it if `idempotency_key` matches an
    /// existing row (originate is idempotent on the caller-supplied key,
    /// spec §4.3).
    pub async fn upsert_call(&self, call: &Call) -> Result<()> {
        sqlx::query(
            "INSERT INTO calls (call_id, phone_number, direction, prompt, first_message,
                owner_subject, status, carrier_status, created_at, started_at, ended_at,
                duration_ms, ring_ms, answer_delay_ms, summary, analysis, digit_summary,
                digit_count, last_otp, last_otp_masked, error_code, answered_by, seq,
                idempotency_key, provider_name, originate_attempts)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
             ON CONFLICT(call_id) DO UPDATE SET
                status = excluded.status,
                carrier_status = excluded.carrier_status,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                duration_ms = excluded.duration_ms,
                ring_ms = excluded.ring_ms,
                answer_delay_ms = excluded.answer_delay_ms,
                summary = excluded.summary,
                analysis = excluded.analysis,
                digit_summary = excluded.digit_summary,
                digit_count = excluded.digit_count,
                last_otp = excluded.last_otp,
                last_otp_masked = excluded.last_otp_masked,
                error_code = excluded.error_code,
                answered_by = excluded.answered_by,
                seq = excluded.seq,
                provider_name = excluded.provider_name,
                originate_attempts = excluded.originate_attempts",
        )
        .bind(call.call_id.as_str())
        .bind(&call.phone_number)
        .bind(call.direction.to_string())
        .bind(&call.prompt)
        .bind(&call.first_message)
        .bind(&call.owner_subject)
        .bind(&call.status)
        .bind(&call.carrier_status)
        .bind(call.created_at.to_rfc3339())
        .bind(call.started_at.map(|t| t.to_rfc3339()))
        .bind(call.ended_at.map(|t| t.to_rfc3339()))
        .bind(call.duration_ms)
        .bind(call.ring_ms)
        .bind(call.answer_delay_ms)
        .bind(&call.summary)
        .bind(&call.analysis)
        .bind(&call.digit_summary)
        .bind(call.digit_count)
        .bind(&call.last_otp)
        .bind(&call.last_otp_masked)
        .bind(&call.error_code)
        .bind(call.answered_by.map(|a| a.to_string()))
        .bind(call.seq)
        .bind(&call.idempotency_key)
        .bind(&call.provider_name)
        .bind(call.originate_attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_call(&self, call_id: &CallId) -> Result<Option<Call>> {
        let row = sqlx::query("SELECT * FROM calls WHERE call_id = ?")
            .bind(call_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_call(&r)).transpose()
    }

    pub async fn get_call_by_idempotency_key(&self, key: &str) -> Result<Option<Call>> {
        let row = sqlx::query("SELECT * FROM calls WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_call(&r)).transpose()
    }

    /// List recent calls with optional cursor (created_at of the last seen
    /// row, descending), status filter, and free-text phone-number search
    /// (spec §6 `GET /calls?cursor,limit,status,q`).
    pub async fn list_recent_calls(
        &self,
        cursor: Option<chrono::DateTime<Utc>>,
        limit: i64,
        status: Option<&str>,
        query: Option<&str>,
    ) -> Result<Vec<Call>> {
        let mut sql = String::from("SELECT * FROM calls WHERE 1=1");
        if cursor.is_some() {
            sql.push_str(" AND created_at < ?");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if query.is_some() {
            sql.push_str(" AND phone_number LIKE ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut q = sqlx::query(&sql);
        if let Some(c) = cursor {
            q = q.bind(c.to_rfc3339());
        }
        if let Some(s) = status {
            q = q.bind(s);
        }
        if let Some(qs) = query {
            q = q.bind(format!("%{qs}%"));
        }
        q = q.bind(limit);

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_call).collect()
    }

    /// Append a state transition inside one transaction: bump `seq`
    /// atomically, insert the transition row, and mirror the new status
    /// onto the `calls` row (spec §4.1 `append_call_transition`). Event Bus
    /// publication happens in the orchestrator, which calls this first.
    pub async fn append_call_transition(
        &self,
        call_id: &CallId,
        state: &CallState,
        data: Option<Value>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let max_seq: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM call_state_transitions WHERE call_id = ?")
            .bind(call_id.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let next_seq = max_seq.unwrap_or(0) + 1;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO call_state_transitions (call_id, seq, state, data, ts) VALUES (?,?,?,?,?)",
        )
        .bind(call_id.as_str())
        .bind(next_seq)
        .bind(state.to_string())
        .bind(data.map(|d| d.to_string()))
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE calls SET status = ?, seq = ? WHERE call_id = ?")
            .bind(state.to_string())
            .bind(next_seq)
            .bind(call_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(next_seq)
    }

    pub async fn list_transitions(&self, call_id: &CallId) -> Result<Vec<CallStateTransition>> {
        let rows = sqlx::query("SELECT * FROM call_state_transitions WHERE call_id = ? ORDER BY seq ASC")
            .bind(call_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_transition).collect()
    }

    pub async fn list_transitions_since(&self, call_id: &CallId, since: i64) -> Result<Vec<CallStateTransition>> {
        let rows = sqlx::query(
            "SELECT * FROM call_state_transitions WHERE call_id = ? AND seq > ? ORDER BY seq ASC",
        )
        .bind(call_id.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transition).collect()
    }

    pub async fn latest_transition_with_tag(&self, call_id: &CallId, tag: &str) -> Result<Option<CallStateTransition>> {
        let row = sqlx::query(
            "SELECT * FROM call_state_transitions WHERE call_id = ? AND state LIKE ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(call_id.as_str())
        .bind(format!("{tag}%"))
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_transition(&r)).transpose()
    }

    pub async fn add_transcript(&self, transcript: &Transcript) -> Result<()> {
        sqlx::query(
            "INSERT INTO transcripts (call_id, seq, speaker, message, interaction_count,
                personality, confidence, is_final, ts) VALUES (?,?,?,?,?,?,?,?,?)",
        )
        .bind(transcript.call_id.as_str())
        .bind(transcript.seq)
        .bind(&transcript.speaker)
        .bind(&transcript.message)
        .bind(transcript.interaction_count)
        .bind(&transcript.personality)
        .bind(transcript.confidence)
        .bind(transcript.is_final)
        .bind(transcript.ts.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_transcripts(&self, call_id: &CallId) -> Result<Vec<Transcript>> {
        let rows = sqlx::query("SELECT * FROM transcripts WHERE call_id = ? ORDER BY seq ASC")
            .bind(call_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_transcript).collect()
    }

    pub async fn add_digit_event(&self, event: &DigitEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO digit_events (id, call_id, source, profile, digits, len, accepted,
                reason, metadata, ts) VALUES (?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(event.id.as_str())
        .bind(event.call_id.as_str())
        .bind(&event.source)
        .bind(&event.profile)
        .bind(&event.digits)
        .bind(event.len)
        .bind(event.accepted)
        .bind(&event.reason)
        .bind(event.metadata.as_ref().map(|v| v.to_string()))
        .bind(event.ts.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_digit_events(&self, call_id: &CallId) -> Result<Vec<DigitEvent>> {
        let rows = sqlx::query("SELECT * FROM digit_events WHERE call_id = ? ORDER BY ts ASC")
            .bind(call_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_digit_event).collect()
    }

    /// Store the latest Expectation snapshot (spec §3: "persisted as
    /// latest `call_state` with kind=`expectation`").
    pub async fn save_expectation_snapshot(&self, call_id: &CallId, data: &Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO call_state (call_id, kind, data, updated_at) VALUES (?, 'expectation', ?, ?)
             ON CONFLICT(call_id, kind) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        )
        .bind(call_id.as_str())
        .bind(data.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_expectation_snapshot(&self, call_id: &CallId) -> Result<()> {
        sqlx::query("DELETE FROM call_state WHERE call_id = ? AND kind = 'expectation'")
            .bind(call_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_expectation_snapshot(&self, call_id: &CallId) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT data FROM call_state WHERE call_id = ? AND kind = 'expectation'")
            .bind(call_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let raw: String = r.try_get("data")?;
                Ok(Some(serde_json::from_str(&raw).map_err(|e| OrchestratorError::internal(e.to_string()))?))
            }
            None => Ok(None),
        }
    }

    /// Dedupe a carrier webhook inside the configured window (spec §4.3:
    /// "Deduplicate (call_id, event_type, carrier_event_seq_or_hash) inside
    /// a 2s window"). Returns `true` if this is a fresh event.
    pub async fn record_webhook_if_new(&self, call_id: &CallId, dedupe_key: &str, window: chrono::Duration) -> Result<bool> {
        let cutoff = Utc::now() - window;
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT seen_at FROM webhook_dedupe WHERE call_id = ? AND dedupe_key = ? AND seen_at > ?",
        )
        .bind(call_id.as_str())
        .bind(dedupe_key)
        .bind(cutoff.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;
        if existing.is_some() {
            return Ok(false);
        }
        sqlx::query(
            "INSERT INTO webhook_dedupe (call_id, dedupe_key, seen_at) VALUES (?,?,?)
             ON CONFLICT(call_id, dedupe_key) DO UPDATE SET seen_at = excluded.seen_at",
        )
        .bind(call_id.as_str())
        .bind(dedupe_key)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(true)
    }
}

fn row_to_call(r: &sqlx::sqlite::SqliteRow) -> Result<Call> {
    let direction_str: String = r.try_get("direction")?;
    let answered_by_str: Option<String> = r.try_get("answered_by")?;
    Ok(Call {
        call_id: CallId::from_string(r.try_get::<String, _>("call_id")?),
        phone_number: r.try_get("phone_number")?,
        direction: if direction_str == "in" { CallDirection::Inbound } else { CallDirection::Outbound },
        prompt: r.try_get("prompt")?,
        first_message: r.try_get("first_message")?,
        owner_subject: r.try_get("owner_subject")?,
        status: r.try_get("status")?,
        carrier_status: r.try_get("carrier_status")?,
        created_at: parse_ts(r.try_get("created_at")?),
        started_at: r.try_get::<Option<String>, _>("started_at")?.map(parse_ts),
        ended_at: r.try_get::<Option<String>, _>("ended_at")?.map(parse_ts),
        duration_ms: r.try_get("duration_ms")?,
        ring_ms: r.try_get("ring_ms")?,
        answer_delay_ms: r.try_get("answer_delay_ms")?,
        summary: r.try_get("summary")?,
        analysis: r.try_get("analysis")?,
        digit_summary: r.try_get("digit_summary")?,
        digit_count: r.try_get("digit_count")?,
        last_otp: r.try_get("last_otp")?,
        last_otp_masked: r.try_get("last_otp_masked")?,
        error_code: r.try_get("error_code")?,
        answered_by: answered_by_str.map(|s| match s.as_str() {
            "human" => AnsweredBy::Human,
            "machine" => AnsweredBy::Machine,
            _ => AnsweredBy::Unknown,
        }),
        seq: r.try_get("seq")?,
        idempotency_key: r.try_get("idempotency_key")?,
        provider_name: r.try_get("provider_name")?,
        originate_attempts: r.try_get("originate_attempts")?,
    })
}

fn row_to_transition(r: &sqlx::sqlite::SqliteRow) -> Result<CallStateTransition> {
    let data_raw: Option<String> = r.try_get("data")?;
    Ok(CallStateTransition {
        call_id: CallId::from_string(r.try_get::<String, _>("call_id")?),
        seq: r.try_get("seq")?,
        state: r.try_get("state")?,
        data: data_raw.and_then(|d| serde_json::from_str(&d).ok()),
        ts: parse_ts(r.try_get("ts")?),
    })
}

fn row_to_transcript(r: &sqlx::sqlite::SqliteRow) -> Result<Transcript> {
    Ok(Transcript {
        call_id: CallId::from_string(r.try_get::<String, _>("call_id")?),
        seq: r.try_get("seq")?,
        speaker: r.try_get("speaker")?,
        message: r.try_get("message")?,
        interaction_count: r.try_get("interaction_count")?,
        personality: r.try_get("personality")?,
        confidence: r.try_get("confidence")?,
        is_final: r.try_get::<i64, _>("is_final")? != 0,
        ts: parse_ts(r.try_get("ts")?),
    })
}

fn row_to_digit_event(r: &sqlx::sqlite::SqliteRow) -> Result<DigitEvent> {
    let metadata_raw: Option<String> = r.try_get("metadata")?;
    Ok(DigitEvent {
        id: DigitEventId::from_string(r.try_get::<String, _>("id")?),
        call_id: CallId::from_string(r.try_get::<String, _>("call_id")?),
        source: r.try_get("source")?,
        profile: r.try_get("profile")?,
        digits: r.try_get("digits")?,
        len: r.try_get("len")?,
        accepted: r.try_get::<i64, _>("accepted")? != 0,
        reason: r.try_get("reason")?,
        metadata: metadata_raw.and_then(|m| serde_json::from_str(&m).ok()),
        ts: parse_ts(r.try_get("ts")?),
    })
}

use super::parse_ts;
