//! Placed orders. Every order starts (and stays) `pending`.

use super::{from_sql_time, to_sql_time, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wasla_core::error::WaslaError;

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub name: String,
    #[serde(default = "one")]
    pub quantity: u32,
    #[serde(default)]
    pub price: Option<f64>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub chat_id: String,
    pub items: Vec<CartItem>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Store a pending order and return its id.
    pub async fn create_order(&self, chat_id: &str, items: &[CartItem]) -> Result<i64, WaslaError> {
        let items_json = serde_json::to_string(items)?;
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO orders (chat_id, items_json, status, created_at) \
             VALUES (?, ?, 'pending', ?) RETURNING id",
        )
        .bind(chat_id)
        .bind(&items_json)
        .bind(to_sql_time(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("insert order failed: {e}")))?;

        Ok(id)
    }

    /// All orders, newest first.
    pub async fn list_orders(&self) -> Result<Vec<Order>, WaslaError> {
        let rows: Vec<(i64, String, String, String, String)> = sqlx::query_as(
            "SELECT id, chat_id, items_json, status, created_at FROM orders ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("list orders failed: {e}")))?;

        rows.into_iter()
            .map(|(id, chat_id, items_json, status, created_at)| -> Result<Order, WaslaError> {
                Ok(Order {
                    id,
                    chat_id,
                    items: serde_json::from_str(&items_json)?,
                    status,
                    created_at: from_sql_time(&created_at),
                })
            })
            .collect()
    }
}
