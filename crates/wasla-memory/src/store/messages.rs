//! Inbound message log and chat listing.

use super::{from_sql_time, to_sql_time, Store};
use chrono::{DateTime, Utc};
use serde::Serialize;
use wasla_core::{error::WaslaError, message::InboundMessage};

/// A logged inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub from_me: bool,
    pub kind: String,
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One chat seen in the message log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub chat_id: String,
    pub message_count: i64,
    pub last_message_at: DateTime<Utc>,
}

type MessageRow = (
    String,
    String,
    String,
    Option<String>,
    bool,
    String,
    Option<String>,
    String,
);

impl Store {
    /// Append an inbound message to the log.
    pub async fn log_message(&self, msg: &InboundMessage) -> Result<(), WaslaError> {
        sqlx::query(
            "INSERT INTO messages \
             (message_id, chat_id, sender, sender_name, from_me, kind, text, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.chat_id)
        .bind(&msg.sender)
        .bind(&msg.sender_name)
        .bind(msg.from_me)
        .bind(msg.content.kind())
        .bind(msg.content.text())
        .bind(to_sql_time(msg.timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("insert message failed: {e}")))?;

        Ok(())
    }

    /// Messages of one chat, oldest first.
    pub async fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<StoredMessage>, WaslaError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT message_id, chat_id, sender, sender_name, from_me, kind, text, timestamp \
             FROM messages WHERE chat_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("select messages failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(
                |(message_id, chat_id, sender, sender_name, from_me, kind, text, timestamp)| {
                    StoredMessage {
                        message_id,
                        chat_id,
                        sender,
                        sender_name,
                        from_me,
                        kind,
                        text,
                        timestamp: from_sql_time(&timestamp),
                    }
                },
            )
            .collect())
    }

    /// Distinct chats, most recently active first.
    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>, WaslaError> {
        let rows: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT chat_id, COUNT(*), MAX(timestamp) AS last_at FROM messages \
             GROUP BY chat_id ORDER BY last_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("list chats failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(chat_id, message_count, last_at)| ChatSummary {
                chat_id,
                message_count,
                last_message_at: from_sql_time(&last_at),
            })
            .collect())
    }
}
