//! Key/value settings and one-time verification codes.

use super::{from_sql_time, to_sql_time, Store};
use chrono::{Duration, Utc};
use wasla_core::error::WaslaError;

/// Setting holding the reply used when nothing else matches.
pub const DEFAULT_RESPONSE_KEY: &str = "default_response";
/// Setting holding the path of the menu document.
pub const MENU_DOCUMENT_KEY: &str = "menu_document";
/// How long a one-time code stays valid.
pub const OTP_TTL_MINUTES: i64 = 10;
/// Failed checks allowed before a code is dropped.
pub const OTP_MAX_ATTEMPTS: i64 = 5;

impl Store {
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, WaslaError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("select setting failed: {e}")))?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), WaslaError> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("upsert setting failed: {e}")))?;
        Ok(())
    }

    /// Store a one-time code for a phone number. Expired codes are pruned
    /// on the way in.
    pub async fn store_otp(&self, phone: &str, code: &str) -> Result<(), WaslaError> {
        let now = Utc::now();
        sqlx::query("DELETE FROM otps WHERE created_at < ?")
            .bind(to_sql_time(now - Duration::minutes(OTP_TTL_MINUTES)))
            .execute(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("prune otps failed: {e}")))?;

        sqlx::query("INSERT INTO otps (phone, code, created_at) VALUES (?, ?, ?)")
            .bind(phone)
            .bind(code)
            .bind(to_sql_time(now))
            .execute(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("insert otp failed: {e}")))?;
        Ok(())
    }

    /// Check `code` against the latest code issued to `phone`.
    ///
    /// A match consumes the code. A miss counts as a failed attempt and the
    /// code is dropped after [`OTP_MAX_ATTEMPTS`] misses. Expired codes never
    /// match.
    pub async fn consume_otp(&self, phone: &str, code: &str) -> Result<bool, WaslaError> {
        let row: Option<(i64, String, String, i64)> = sqlx::query_as(
            "SELECT id, code, created_at, attempts FROM otps \
             WHERE phone = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("select otp failed: {e}")))?;

        let Some((id, expected, created_at, attempts)) = row else {
            return Ok(false);
        };

        let expired = Utc::now() - from_sql_time(&created_at) > Duration::minutes(OTP_TTL_MINUTES);
        let matched = !expired && expected == code;

        if expired || matched || attempts + 1 >= OTP_MAX_ATTEMPTS {
            sqlx::query("DELETE FROM otps WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| WaslaError::Memory(format!("delete otp failed: {e}")))?;
        } else {
            sqlx::query("UPDATE otps SET attempts = attempts + 1 WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| WaslaError::Memory(format!("update otp failed: {e}")))?;
        }

        Ok(matched)
    }
}
