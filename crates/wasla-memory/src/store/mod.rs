//! SQLite-backed persistent store.
//!
//! Split into focused submodules:
//! - `replies`: keyword auto-replies (upsert by keyword)
//! - `menu`: menu items
//! - `orders`: placed orders
//! - `messages`: inbound message log and chat listing
//! - `outbound`: send records for the daily rate cap
//! - `settings`: default response, menu document, one-time codes

mod menu;
mod messages;
mod orders;
mod outbound;
mod replies;
mod settings;

pub use menu::{format_price, MenuItem};
pub use messages::{ChatSummary, StoredMessage};
pub use orders::{CartItem, Order};
pub use outbound::RATE_WINDOW_HOURS;
pub use replies::AutoReply;
pub use settings::{DEFAULT_RESPONSE_KEY, MENU_DOCUMENT_KEY, OTP_MAX_ATTEMPTS, OTP_TTL_MINUTES};

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;
use wasla_core::{config::MemoryConfig, error::WaslaError, shellexpand};

/// Timestamp layout used in every table (sorts lexicographically).
const SQL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persistent store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new store, running migrations on first use.
    pub async fn new(config: &MemoryConfig) -> Result<Self, WaslaError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WaslaError::Memory(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| WaslaError::Memory(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| WaslaError::Memory(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("Store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Open a private in-memory store (single connection so every query sees
    /// the same database).
    pub async fn open_in_memory() -> Result<Self, WaslaError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| WaslaError::Memory(format!("invalid db path: {e}")))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| WaslaError::Memory(format!("failed to open sqlite: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness check used by the admin API before touching tables.
    pub async fn ping(&self) -> Result<(), WaslaError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("database unavailable: {e}")))?;
        Ok(())
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), WaslaError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_init", include_str!("../../migrations/001_init.sql")),
            ("002_otps", include_str!("../../migrations/002_otps.sql")),
            (
                "003_otp_attempts",
                include_str!("../../migrations/003_otp_attempts.sql"),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        WaslaError::Memory(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| WaslaError::Memory(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    WaslaError::Memory(format!("failed to record migration {name}: {e}"))
                })?;
        }
        Ok(())
    }
}

/// Format a UTC timestamp the way the tables store it.
pub(crate) fn to_sql_time(at: DateTime<Utc>) -> String {
    at.format(SQL_TIME_FORMAT).to_string()
}

/// Parse a stored timestamp; malformed values fall back to the epoch.
pub(crate) fn from_sql_time(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, SQL_TIME_FORMAT)
        .map(|n| n.and_utc())
        .unwrap_or_default()
}
