//! Keyword auto-replies.

use super::Store;
use serde::Serialize;
use wasla_core::error::WaslaError;

/// A keyword-triggered canned response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoReply {
    pub id: i64,
    pub keyword: String,
    pub response: String,
}

impl Store {
    /// Insert or replace the response for a keyword. Keywords are unique
    /// case-insensitively. Returns the row id.
    pub async fn upsert_auto_reply(&self, keyword: &str, response: &str) -> Result<i64, WaslaError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(WaslaError::InvalidInput("keyword must not be empty".into()));
        }

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO auto_replies (keyword, response) VALUES (?, ?) \
             ON CONFLICT(keyword) DO UPDATE SET response = excluded.response \
             RETURNING id",
        )
        .bind(keyword)
        .bind(response)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("upsert auto reply failed: {e}")))?;

        Ok(id)
    }

    /// All auto-replies in storage order (oldest first).
    pub async fn list_auto_replies(&self) -> Result<Vec<AutoReply>, WaslaError> {
        let rows: Vec<(i64, String, String)> =
            sqlx::query_as("SELECT id, keyword, response FROM auto_replies ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| WaslaError::Memory(format!("list auto replies failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(id, keyword, response)| AutoReply {
                id,
                keyword,
                response,
            })
            .collect())
    }

    /// Delete an auto-reply by id. Returns whether a row was removed.
    pub async fn delete_auto_reply(&self, id: i64) -> Result<bool, WaslaError> {
        let result = sqlx::query("DELETE FROM auto_replies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("delete auto reply failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}
