use std::path::Path;
use std::sync::Mutex;

use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scenarios::ScenarioTemplate;
use crate::LLMError;

/// A synthetic order row. `resolution_note` doubles as the completion flag:
/// null until the resolution tool succeeds, set exactly once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub status: String,
    pub items: Vec<String>,
    pub eta: Option<String>,
    pub issue_label: String,
    pub resolution_note: Option<String>,
}

impl Order {
    pub fn is_resolved(&self) -> bool {
        self.resolution_note.is_some()
    }
}

pub struct OrderStore {
    conn: Mutex<Connection>,
}

impl OrderStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LLMError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, LLMError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LLMError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                items TEXT,
                eta TEXT,
                issue_label TEXT,
                resolution_note TEXT
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an order for the given issue label from its template.
    /// The id is a random six-digit `ORD-` number: collisions are
    /// improbable, not prevented.
    pub fn create_order(
        &self,
        issue_label: &str,
        template: &ScenarioTemplate,
    ) -> Result<Order, LLMError> {
        let order = Order {
            order_id: generate_order_id(),
            status: template.status.clone(),
            items: template.items.clone(),
            eta: template.eta.clone(),
            issue_label: issue_label.to_string(),
            resolution_note: None,
        };

        let items_json = serde_json::to_string(&order.items)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO orders (order_id, status, items, eta, issue_label, resolution_note)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![
                order.order_id,
                order.status,
                items_json,
                order.eta,
                order.issue_label
            ],
        )?;
        Ok(order)
    }

    pub fn get_order(&self, order_id: &str) -> Result<Option<Order>, LLMError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT order_id, status, items, eta, issue_label, resolution_note
                 FROM orders WHERE order_id = ?1",
                params![order_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((order_id, status, items, eta, issue_label, resolution_note)) = row else {
            return Ok(None);
        };

        let items = match items {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|error| {
                warn!(%order_id, %error, "unparseable items column, treating as empty");
                Vec::new()
            }),
            None => Vec::new(),
        };

        Ok(Some(Order {
            order_id,
            status,
            items,
            eta,
            issue_label: issue_label.unwrap_or_default(),
            resolution_note,
        }))
    }

    /// Overwrites the resolution note. Idempotent; an unknown order id is
    /// logged and ignored so a stray tool call cannot take down the loop.
    pub fn set_resolution(&self, order_id: &str, note: &str) -> Result<(), LLMError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE orders SET resolution_note = ?1 WHERE order_id = ?2",
            params![note, order_id],
        )?;
        if updated == 0 {
            warn!(%order_id, "resolution note for unknown order id, ignoring");
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LLMError> {
        self.conn
            .lock()
            .map_err(|_| LLMError::Provider("order store lock poisoned".to_string()))
    }
}

fn generate_order_id() -> String {
    let number: u32 = rand::thread_rng().gen_range(100_000..=999_999);
    format!("ORD-{number}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ScenarioTemplate {
        ScenarioTemplate {
            status: "out for delivery".to_string(),
            items: vec!["Paneer Wrap".to_string(), "Mango Lassi".to_string()],
            eta: Some("10 minutes".to_string()),
            prompt_suffix: String::new(),
        }
    }

    #[test]
    fn created_orders_carry_label_and_start_unresolved() {
        let store = OrderStore::open_in_memory().expect("store");
        for label in crate::scenarios::ISSUE_LABELS {
            let order = store.create_order(label, &template()).expect("create");
            assert!(order.order_id.starts_with("ORD-"));
            let fetched = store
                .get_order(&order.order_id)
                .expect("get")
                .expect("present");
            assert_eq!(fetched.issue_label, *label);
            assert!(fetched.resolution_note.is_none());
            assert_eq!(fetched.items.len(), 2);
        }
    }

    #[test]
    fn resolution_note_overwrites_and_persists() {
        let store = OrderStore::open_in_memory().expect("store");
        let order = store.create_order("LATE", &template()).expect("create");

        store
            .set_resolution(&order.order_id, "credits added")
            .expect("set");
        store
            .set_resolution(&order.order_id, "credits added again")
            .expect("overwrite");

        let fetched = store
            .get_order(&order.order_id)
            .expect("get")
            .expect("present");
        assert_eq!(fetched.resolution_note.as_deref(), Some("credits added again"));
    }

    #[test]
    fn unknown_order_resolution_is_a_noop() {
        let store = OrderStore::open_in_memory().expect("store");
        store
            .set_resolution("ORD-000000", "should not crash")
            .expect("noop");
        assert!(store.get_order("ORD-000000").expect("get").is_none());
    }
}
