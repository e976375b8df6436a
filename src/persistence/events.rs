//! Durable backing for `EventBus` topics (spec §4.7).

use sqlx::Row;

use crate::error::Result;

use super::model::BusEventRow;
use super::parse_ts;
use super::Persistence;

impl Persistence {
    pub async fn record_bus_event(&self, row: &BusEventRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO bus_events (topic, sequence, event_type, call_id, data, ts)
             VALUES (?,?,?,?,?,?)
             ON CONFLICT(topic, sequence) DO NOTHING",
        )
        .bind(&row.topic)
        .bind(row.sequence)
        .bind(&row.event_type)
        .bind(&row.call_id)
        .bind(row.data.to_string())
        .bind(row.ts.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Events on `topic` with `sequence > since`, optionally capped below
    /// `before` (exclusive) so a caller can fetch exactly the gap the
    /// in-memory ring no longer covers.
    pub async fn list_bus_events_since(&self, topic: &str, since: i64, before: Option<i64>) -> Result<Vec<BusEventRow>> {
        let rows = match before {
            Some(before) => {
                sqlx::query("SELECT * FROM bus_events WHERE topic = ? AND sequence > ? AND sequence < ? ORDER BY sequence ASC")
                    .bind(topic)
                    .bind(since)
                    .bind(before)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM bus_events WHERE topic = ? AND sequence > ? ORDER BY sequence ASC")
                    .bind(topic)
                    .bind(since)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_bus_event).collect()
    }
}

fn row_to_bus_event(r: &sqlx::sqlite::SqliteRow) -> Result<BusEventRow> {
    let data_raw: String = r.try_get("data")?;
    Ok(BusEventRow {
        topic: r.try_get("topic")?,
        sequence: r.try_get("sequence")?,
        event_type: r.try_get("event_type")?,
        call_id: r.try_get("call_id")?,
        data: serde_json::from_str(&data_raw).unwrap_or(serde_json::Value::Null),
        ts: parse_ts(r.try_get("ts")?),
    })
}
