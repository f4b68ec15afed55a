//! Work-item store — the pipeline's view of the `items` table.
//!
//! State transitions live here so the `pending → processing → terminal`
//! machine has one write path. Terminal states are sticky; re-submission
//! creates a fresh item.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::faq::types::ItemStatus;

/// A pipeline work item (message-equivalent).
#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    pub source: Option<String>,
    pub content: String,
    pub status: ItemStatus,
    pub error: Option<String>,
    pub questions_found: usize,
}

/// Submit a new item for processing. Returns the generated ID.
pub fn submit_item(conn: &Connection, source: Option<&str>, content: &str) -> Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO items (id, source, content, status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
        params![id, source, content, now],
    )?;
    Ok(id)
}

/// Fetch pending items in submission order, bounded by `limit`.
pub fn fetch_pending(conn: &Connection, limit: usize) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(
        "SELECT id, source, content, status, error, questions_found \
         FROM items WHERE status = 'pending' ORDER BY created_at ASC, id ASC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fetch a single item by ID.
pub fn get_item(conn: &Connection, item_id: &str) -> Result<Option<Item>> {
    let row = conn
        .query_row(
            "SELECT id, source, content, status, error, questions_found \
             FROM items WHERE id = ?1",
            params![item_id],
            item_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Mark an item as claimed by the current run.
pub fn mark_processing(conn: &Connection, item_id: &str) -> Result<()> {
    transition(conn, item_id, ItemStatus::Processing, None, None)
}

/// Mark an item completed, recording how many questions it produced.
pub fn mark_completed(conn: &Connection, item_id: &str, questions_found: usize) -> Result<()> {
    transition(conn, item_id, ItemStatus::Completed, None, Some(questions_found))
}

/// Mark an item failed with the error message attached.
pub fn mark_failed(conn: &Connection, item_id: &str, error: &str) -> Result<()> {
    transition(conn, item_id, ItemStatus::Failed, Some(error), None)
}

fn transition(
    conn: &Connection,
    item_id: &str,
    status: ItemStatus,
    error: Option<&str>,
    questions_found: Option<usize>,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE items SET status = ?1, error = ?2, \
         questions_found = COALESCE(?3, questions_found), updated_at = ?4 \
         WHERE id = ?5 AND status NOT IN ('completed', 'failed')",
        params![status.as_str(), error, questions_found.map(|n| n as i64), now, item_id],
    )?;
    if rows == 0 {
        bail!("item not found or already terminal: {item_id}");
    }
    Ok(())
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    let status: String = row.get(3)?;
    let questions_found: i64 = row.get(5)?;
    Ok(Item {
        id: row.get(0)?,
        source: row.get(1)?,
        content: row.get(2)?,
        status: status.parse().unwrap_or(ItemStatus::Pending),
        error: row.get(4)?,
        questions_found: questions_found as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::db::open_memory_database().unwrap()
    }

    #[test]
    fn submit_and_fetch_pending() {
        let conn = test_db();
        let id = submit_item(&conn, Some("inbox"), "How do I log in?").unwrap();

        let pending = fetch_pending(&conn, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].status, ItemStatus::Pending);
    }

    #[test]
    fn lifecycle_transitions() {
        let conn = test_db();
        let id = submit_item(&conn, None, "content").unwrap();

        mark_processing(&conn, &id).unwrap();
        assert_eq!(get_item(&conn, &id).unwrap().unwrap().status, ItemStatus::Processing);

        mark_completed(&conn, &id, 3).unwrap();
        let item = get_item(&conn, &id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.questions_found, 3);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let conn = test_db();
        let id = submit_item(&conn, None, "content").unwrap();
        mark_failed(&conn, &id, "timed out").unwrap();

        let item = get_item(&conn, &id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.error.as_deref(), Some("timed out"));

        // a failed item is never flipped back by the pipeline
        assert!(mark_processing(&conn, &id).is_err());
        assert!(mark_completed(&conn, &id, 1).is_err());
    }

    #[test]
    fn completed_items_leave_pending_queue() {
        let conn = test_db();
        let keep = submit_item(&conn, None, "a").unwrap();
        let done = submit_item(&conn, None, "b").unwrap();
        mark_completed(&conn, &done, 0).unwrap();

        let pending = fetch_pending(&conn, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, keep);
    }
}
