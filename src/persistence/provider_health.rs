//! Provider health snapshot persistence (spec §4.2).

use chrono::Utc;
use sqlx::Row;

use crate::error::Result;

use super::model::ProviderHealthRow;
use super::{parse_ts, Persistence};

impl Persistence {
    pub async fn get_provider_health(&self, provider_name: &str) -> Result<Option<ProviderHealthRow>> {
        let row = sqlx::query("SELECT * FROM provider_health WHERE provider_name = ?")
            .bind(provider_name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_provider_health(&r)).transpose()
    }

    pub async fn list_provider_health(&self) -> Result<Vec<ProviderHealthRow>> {
        let rows = sqlx::query("SELECT * FROM provider_health")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_provider_health).collect()
    }

    /// Persist the in-memory health snapshot a `ProviderRegistry` keeps
    /// between calls, so a restart resumes cooldowns instead of treating
    /// every provider as freshly healthy (spec §4.2).
    pub async fn upsert_provider_health(&self, h: &ProviderHealthRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO provider_health (provider_name, error_count_window, last_error_at,
                last_success_at, cooldown_until, degraded, updated_at)
             VALUES (?,?,?,?,?,?,?)
             ON CONFLICT(provider_name) DO UPDATE SET
                error_count_window = excluded.error_count_window,
                last_error_at = excluded.last_error_at,
                last_success_at = excluded.last_success_at,
                cooldown_until = excluded.cooldown_until,
                degraded = excluded.degraded,
                updated_at = excluded.updated_at",
        )
        .bind(&h.provider_name)
        .bind(h.error_count_window)
        .bind(h.last_error_at.map(|t| t.to_rfc3339()))
        .bind(h.last_success_at.map(|t| t.to_rfc3339()))
        .bind(h.cooldown_until.map(|t| t.to_rfc3339()))
        .bind(h.degraded)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_provider_health(r: &sqlx::sqlite::SqliteRow) -> Result<ProviderHealthRow> {
    Ok(ProviderHealthRow {
        provider_name: r.try_get("provider_name")?,
        error_count_window: r.try_get("error_count_window")?,
        last_error_at: r.try_get::<Option<String>, _>("last_error_at")?.map(parse_ts),
        last_success_at: r.try_get::<Option<String>, _>("last_success_at")?.map(parse_ts),
        cooldown_until: r.try_get::<Option<String>, _>("cooldown_until")?.map(parse_ts),
        degraded: r.try_get::<i64, _>("degraded")? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_provider_health() {
        let db = Persistence::connect("sqlite::memory:").await.unwrap();
        db.run_migrations().await.unwrap();

        let h = ProviderHealthRow {
            provider_name: "twilio".into(),
            error_count_window: 2,
            last_error_at: Some(Utc::now()),
            last_success_at: None,
            cooldown_until: None,
            degraded: false,
        };
        db.upsert_provider_health(&h).await.unwrap();
        let back = db.get_provider_health("twilio").await.unwrap().unwrap();
        assert_eq!(back.error_count_window, 2);
        assert!(!back.degraded);
    }
}
