//! Aggregate reconciliation and corpus statistics.
//!
//! [`update_faq_statistics`] is the batch pass that reconciles every group's
//! derived columns (`question_count`, `avg_confidence`, `frequency_score`)
//! against its current association set, and repairs the one-representative
//! invariant. It runs after a generation run, not per assembly, and is
//! idempotent.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct ReconcileResult {
    pub groups_checked: usize,
    pub groups_updated: usize,
    pub representatives_repaired: usize,
}

/// Reconcile all groups' aggregates from their associations.
pub fn update_faq_statistics(conn: &mut Connection) -> Result<ReconcileResult> {
    let group_ids: Vec<String> = {
        let mut stmt = conn.prepare("SELECT id FROM faq_groups")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut result = ReconcileResult {
        groups_checked: group_ids.len(),
        groups_updated: 0,
        representatives_repaired: 0,
    };

    let tx = conn.transaction()?;
    for group_id in &group_ids {
        let (count, avg): (i64, f64) = tx.query_row(
            "SELECT COUNT(q.id), COALESCE(AVG(q.confidence), 0.0) \
             FROM question_group_associations a JOIN questions q ON q.id = a.question_id \
             WHERE a.group_id = ?1",
            params![group_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let frequency = count as f64 * avg;

        let changed = tx.execute(
            "UPDATE faq_groups SET question_count = ?1, avg_confidence = ?2, \
             frequency_score = ?3, updated_at = ?4 \
             WHERE id = ?5 AND (question_count != ?1 \
                OR ABS(avg_confidence - ?2) > 1e-9 OR ABS(frequency_score - ?3) > 1e-9)",
            params![count, avg, frequency, chrono::Utc::now().to_rfc3339(), group_id],
        )?;
        if changed > 0 {
            result.groups_updated += 1;
        }

        if repair_representative(&tx, group_id)? {
            result.representatives_repaired += 1;
        }
    }
    tx.commit()?;

    tracing::debug!(
        checked = result.groups_checked,
        updated = result.groups_updated,
        repaired = result.representatives_repaired,
        "FAQ statistics reconciled"
    );
    Ok(result)
}

/// Restore the exactly-one-representative invariant for a group.
///
/// Zero representatives: promote the association with the highest similarity
/// (ties by question ID). More than one: keep the first by question ID and
/// demote the rest. Returns whether anything changed.
fn repair_representative(tx: &rusqlite::Transaction<'_>, group_id: &str) -> Result<bool> {
    let rep_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM question_group_associations \
         WHERE group_id = ?1 AND is_representative = 1",
        params![group_id],
        |row| row.get(0),
    )?;

    if rep_count == 1 {
        return Ok(false);
    }

    if rep_count > 1 {
        tx.execute(
            "UPDATE question_group_associations SET is_representative = 0 \
             WHERE group_id = ?1 AND question_id != ( \
                 SELECT MIN(question_id) FROM question_group_associations \
                 WHERE group_id = ?1 AND is_representative = 1)",
            params![group_id],
        )?;
        return Ok(true);
    }

    // No representative at all — promote the strongest member, if any
    let changed = tx.execute(
        "UPDATE question_group_associations SET is_representative = 1 \
         WHERE group_id = ?1 AND question_id = ( \
             SELECT question_id FROM question_group_associations \
             WHERE group_id = ?1 ORDER BY similarity DESC, question_id ASC LIMIT 1)",
        params![group_id],
    )?;
    Ok(changed > 0)
}

/// Corpus statistics for `faqgen stats`.
#[derive(Debug, Serialize)]
pub struct FaqStatsResponse {
    pub total_questions: u64,
    pub embedded_questions: u64,
    pub total_groups: u64,
    pub published_groups: u64,
    pub total_associations: u64,
    pub pending_items: u64,
    pub failed_items: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_question: Option<String>,
}

/// Compute corpus statistics.
///
/// `db_path` is used for file size calculation; pass None for in-memory
/// databases.
pub fn faq_stats(conn: &Connection, db_path: Option<&Path>) -> Result<FaqStatsResponse> {
    let count = |sql: &str| -> Result<u64> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as u64)
    };

    let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(created_at), MAX(created_at) FROM questions",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(FaqStatsResponse {
        total_questions: count("SELECT COUNT(*) FROM questions")?,
        embedded_questions: count("SELECT COUNT(*) FROM questions WHERE embedding IS NOT NULL")?,
        total_groups: count("SELECT COUNT(*) FROM faq_groups")?,
        published_groups: count("SELECT COUNT(*) FROM faq_groups WHERE is_published = 1")?,
        total_associations: count("SELECT COUNT(*) FROM question_group_associations")?,
        pending_items: count("SELECT COUNT(*) FROM items WHERE status = 'pending'")?,
        failed_items: count("SELECT COUNT(*) FROM items WHERE status = 'failed'")?,
        db_size_bytes,
        oldest_question: oldest,
        newest_question: newest,
    })
}
