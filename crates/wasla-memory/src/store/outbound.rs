//! Records of admin-initiated sends, used only for the daily rate cap.

use super::{to_sql_time, Store};
use chrono::{DateTime, Duration, Utc};
use wasla_core::error::WaslaError;

/// Length of the trailing window the daily cap counts over.
pub const RATE_WINDOW_HOURS: i64 = 24;

impl Store {
    /// Record a send to `destination` at `at`, dropping records that have
    /// left the rate window.
    pub async fn record_outbound(
        &self,
        destination: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), WaslaError> {
        sqlx::query("DELETE FROM outbound_records WHERE sent_at <= ?")
            .bind(to_sql_time(Utc::now() - Duration::hours(RATE_WINDOW_HOURS)))
            .execute(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("prune outbound records failed: {e}")))?;

        sqlx::query("INSERT INTO outbound_records (destination, message, sent_at) VALUES (?, ?, ?)")
            .bind(destination)
            .bind(message)
            .bind(to_sql_time(at))
            .execute(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("insert outbound record failed: {e}")))?;
        Ok(())
    }

    /// Number of sends to `destination` strictly after `since`.
    pub async fn count_outbound_since(
        &self,
        destination: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, WaslaError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM outbound_records WHERE destination = ? AND sent_at > ?",
        )
        .bind(destination)
        .bind(to_sql_time(since))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("count outbound failed: {e}")))?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}
