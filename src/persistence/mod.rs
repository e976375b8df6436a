//! # Persistence Layer (spec §4.1)
//!
//! Append-oriented store for calls, transcripts, state transitions, digit
//! events, webhook deliveries, SMS/email messages, bulk jobs, suppression
//! lists, idempotency keys, and metrics, built on `sqlx` + SQLite exactly as
//! the teacher's `DatabaseManager` is: fully async, `Send`-safe, no
//! `spawn_blocking`, with compile-time-checked statements where practical
//! and transaction support for the row-lock-serialized writes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use call_orchestrator::persistence::Persistence;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let db = Persistence::connect("sqlite::memory:").await?;
//! db.run_migrations().await?;
//! let calls = db.list_recent_calls(None, 20, None, None).await?;
//! println!("{} recent calls", calls.len());
//! # Ok(())
//! # }
//! ```

pub mod model;
mod calls;
mod events;
mod notifications;
mod delivery;
mod metrics;
mod provider_health;

pub use model::*;

use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::error::Result;

/// Main persistence handle. Cheap to clone (wraps a pooled connection).
#[derive(Clone)]
pub struct Persistence {
    pool: SqlitePool,
}

impl Persistence {
    /// Connect to a SQLite database. Use `"sqlite::memory:"` for tests.
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("connecting to persistence store: {}", database_url);
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| crate::error::OrchestratorError::internal(format!("connect failed: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run the embedded migrations, then ensure forward-compatible optional
    /// columns exist (spec §4.1 "schema evolution: add-column-if-absent").
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::OrchestratorError::internal(format!("migration failed: {e}")))?;
        self.ensure_forward_compatible_columns().await?;
        info!("persistence schema ready");
        Ok(())
    }

    /// Add-column-if-absent for columns introduced after the initial
    /// deployment of a table, so a new binary can run against an older
    /// database file without a blocking migration.
    async fn ensure_forward_compatible_columns(&self) -> Result<()> {
        let additions: &[(&str, &str, &str)] = &[
            ("calls", "originate_attempts", "INTEGER NOT NULL DEFAULT 0"),
            ("notifications", "next_attempt_at", "TEXT"),
            ("messages_reserved", "_reserved", "TEXT"),
        ];
        for (table, column, ddl) in additions {
            if *table == "messages_reserved" {
                continue; // placeholder demonstrating the mechanism, no-op today
            }
            if !self.column_exists(table, column).await? {
                let stmt = format!("ALTER TABLE {table} ADD COLUMN {column} {ddl}");
                if let Err(e) = sqlx::query(&stmt).execute(&self.pool).await {
                    warn!("could not add column {}.{}: {}", table, column, e);
                }
            }
        }
        Ok(())
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().any(|r| {
            r.try_get::<String, _>("name").map(|n| n == column).unwrap_or(false)
        }))
    }

    /// Delete rows older than `retention` for age-governed tables (spec
    /// §4.1: "Cleanup by age: transitions, health logs, metrics, sent
    /// notifications ... with configurable retention").
    pub async fn cleanup_by_age(&self, retention: chrono::Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now() - retention;
        let mut deleted = 0u64;
        for (table, column) in [
            ("call_state_transitions", "ts"),
            ("metrics", "date"),
            ("notifications", "created_at"),
            ("bus_events", "ts"),
        ] {
            let stmt = format!("DELETE FROM {table} WHERE {column} < ?");
            let result = sqlx::query(&stmt).bind(cutoff.to_rfc3339()).execute(&self.pool).await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }
}

pub(crate) fn parse_ts(s: String) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_migrate_in_memory() {
        let db = Persistence::connect("sqlite::memory:").await.unwrap();
        db.run_migrations().await.unwrap();
    }
}
