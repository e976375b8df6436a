//! Metrics read-side queries (spec §4.1, §7 SLO tripwires).
//!
//! Writes go through `Persistence::increment_metric` in `notifications.rs`
//! (the counter table is shared by every subsystem that reports a metric);
//! this module only adds the aggregation queries the control plane and the
//! tripwire checker read back.

use sqlx::Row;

use crate::error::Result;

/// One `(date, kind, outcome, count)` row, already aggregated.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSample {
    pub date: String,
    pub kind: String,
    pub outcome: String,
    pub count: i64,
}

impl super::Persistence {
    pub async fn metrics_for_date(&self, date: &str) -> Result<Vec<MetricSample>> {
        let rows = sqlx::query("SELECT date, kind, outcome, count FROM metrics WHERE date = ?")
            .bind(date)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| {
                Ok(MetricSample {
                    date: r.try_get("date")?,
                    kind: r.try_get("kind")?,
                    outcome: r.try_get("outcome")?,
                    count: r.try_get("count")?,
                })
            })
            .collect()
    }

    /// Ratio of `outcome` to all outcomes recorded for `kind` on `date`,
    /// used by the SLO tripwire (e.g. failed-call rate, notification
    /// failure rate). Returns `None` when there is no volume yet.
    pub async fn metric_ratio(&self, date: &str, kind: &str, outcome: &str) -> Result<Option<f64>> {
        let rows = self.metrics_for_date(date).await?;
        let total: i64 = rows.iter().filter(|r| r.kind == kind).map(|r| r.count).sum();
        if total == 0 {
            return Ok(None);
        }
        let matched: i64 = rows
            .iter()
            .filter(|r| r.kind == kind && r.outcome == outcome)
            .map(|r| r.count)
            .sum();
        Ok(Some(matched as f64 / total as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::super::Persistence;

    #[tokio::test]
    async fn ratio_tracks_incremented_counters() {
        let db = Persistence::connect("sqlite::memory:").await.unwrap();
        db.run_migrations().await.unwrap();

        db.increment_metric("2026-07-26", "call", "failed").await.unwrap();
        db.increment_metric("2026-07-26", "call", "completed").await.unwrap();
        db.increment_metric("2026-07-26", "call", "completed").await.unwrap();

        let ratio = db.metric_ratio("2026-07-26", "call", "failed").await.unwrap();
        assert!((ratio.unwrap() - (1.0 / 3.0)).abs() < 1e-9);
    }
}
