//! Credential bundle persistence, scoped by auth-state identifier.
//!
//! The bundle is opaque to Wasla: the link bridge emits it on every
//! credential update and receives it back on connect. It lives in its own
//! SQLite file under `{data_dir}/{auth_state}/creds.db` so that deleting the
//! directory forces a fresh pairing.

use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use wasla_core::error::WaslaError;

/// SQLx-backed credential store.
#[derive(Clone)]
pub struct AuthStateStore {
    pool: Pool<Sqlite>,
}

impl AuthStateStore {
    /// Open (or create) the store in `dir`.
    pub async fn open(dir: &str) -> Result<Self, WaslaError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| WaslaError::Memory(format!("failed to create auth dir {dir}: {e}")))?;
        let db_path = format!("{dir}/creds.db");
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&format!("sqlite:{db_path}?mode=rwc"))
            .await
            .map_err(|e| WaslaError::Memory(format!("auth store open failed: {e}")))?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests and throwaway runs.
    pub async fn in_memory() -> Result<Self, WaslaError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| WaslaError::Memory(format!("auth store open failed: {e}")))?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> Result<(), WaslaError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS auth_creds (
                auth_state TEXT PRIMARY KEY,
                creds      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("auth store schema failed: {e}")))?;
        Ok(())
    }

    /// Load the bundle for an auth state, if one was saved.
    pub async fn load(&self, auth_state: &str) -> Result<Option<Value>, WaslaError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT creds FROM auth_creds WHERE auth_state = ?")
                .bind(auth_state)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| WaslaError::Memory(format!("load creds failed: {e}")))?;

        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Replace the bundle for an auth state.
    pub async fn save(&self, auth_state: &str, creds: &Value) -> Result<(), WaslaError> {
        let raw = serde_json::to_string(creds)?;
        sqlx::query(
            "INSERT INTO auth_creds (auth_state, creds, updated_at) VALUES (?, ?, datetime('now')) \
             ON CONFLICT(auth_state) DO UPDATE SET creds = excluded.creds, updated_at = excluded.updated_at",
        )
        .bind(auth_state)
        .bind(&raw)
        .execute(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("save creds failed: {e}")))?;
        Ok(())
    }

    /// Forget the bundle so the next connect starts a fresh pairing.
    pub async fn clear(&self, auth_state: &str) -> Result<(), WaslaError> {
        sqlx::query("DELETE FROM auth_creds WHERE auth_state = ?")
            .bind(auth_state)
            .execute(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("clear creds failed: {e}")))?;
        Ok(())
    }
}
