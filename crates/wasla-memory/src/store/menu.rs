//! Menu items.

use super::Store;
use serde::Serialize;
use wasla_core::error::WaslaError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub image_path: Option<String>,
}

/// Render a price without a trailing `.0` for whole amounts.
pub fn format_price(price: f64) -> String {
    if price.fract() == 0.0 && price.abs() < 1e15 {
        format!("{}", price as i64)
    } else {
        format!("{price}")
    }
}

impl Store {
    /// Add a menu item. The id is the current maximum plus one (1 for an
    /// empty menu).
    pub async fn add_menu_item(
        &self,
        name: &str,
        price: f64,
        image_path: Option<&str>,
    ) -> Result<MenuItem, WaslaError> {
        let (next_id,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(id), 0) + 1 FROM menu_items")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("menu id lookup failed: {e}")))?;

        sqlx::query("INSERT INTO menu_items (id, name, price, image_path) VALUES (?, ?, ?, ?)")
            .bind(next_id)
            .bind(name)
            .bind(price)
            .bind(image_path)
            .execute(&self.pool)
            .await
            .map_err(|e| WaslaError::Memory(format!("insert menu item failed: {e}")))?;

        Ok(MenuItem {
            id: next_id,
            name: name.to_string(),
            price,
            image_path: image_path.map(str::to_string),
        })
    }

    /// All menu items in id order.
    pub async fn list_menu_items(&self) -> Result<Vec<MenuItem>, WaslaError> {
        let rows: Vec<(i64, String, f64, Option<String>)> =
            sqlx::query_as("SELECT id, name, price, image_path FROM menu_items ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| WaslaError::Memory(format!("list menu failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(id, name, price, image_path)| MenuItem {
                id,
                name,
                price,
                image_path,
            })
            .collect())
    }

    /// Find a menu item by exact name, ignoring case.
    pub async fn find_menu_item(&self, name: &str) -> Result<Option<MenuItem>, WaslaError> {
        let row: Option<(i64, String, f64, Option<String>)> = sqlx::query_as(
            "SELECT id, name, price, image_path FROM menu_items \
             WHERE name = ? COLLATE NOCASE ORDER BY id ASC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WaslaError::Memory(format!("find menu item failed: {e}")))?;

        Ok(row.map(|(id, name, price, image_path)| MenuItem {
            id,
            name,
            price,
            image_path,
        }))
    }
}
