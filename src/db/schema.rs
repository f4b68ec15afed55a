//! SQL DDL for all faqgen tables.
//!
//! Defines the `questions`, `faq_groups`, `question_group_associations`,
//! `items`, `jobs`, and `schema_meta` tables. All DDL uses `IF NOT EXISTS`
//! for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for faqgen's core tables.
const SCHEMA_SQL: &str = r#"
-- Extracted questions, with embeddings attached asynchronously
CREATE TABLE IF NOT EXISTS questions (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    answer_text TEXT,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    embedding BLOB,
    source TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_questions_embedding_null
    ON questions(created_at) WHERE embedding IS NULL;
CREATE INDEX IF NOT EXISTS idx_questions_created ON questions(created_at);

-- Curated FAQ records, incrementally built and merged
CREATE TABLE IF NOT EXISTS faq_groups (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    representative_question TEXT NOT NULL,
    consolidated_answer TEXT NOT NULL,
    question_count INTEGER NOT NULL DEFAULT 0,
    frequency_score REAL NOT NULL DEFAULT 0.0,
    avg_confidence REAL NOT NULL DEFAULT 0.0,
    representative_embedding BLOB,
    is_published INTEGER NOT NULL DEFAULT 0,
    category TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_groups_published ON faq_groups(is_published);
CREATE INDEX IF NOT EXISTS idx_groups_category ON faq_groups(category);

-- Question <-> group membership; one representative per group
CREATE TABLE IF NOT EXISTS question_group_associations (
    question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    group_id TEXT NOT NULL REFERENCES faq_groups(id) ON DELETE CASCADE,
    similarity REAL NOT NULL,
    is_representative INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    PRIMARY KEY (question_id, group_id)
);

CREATE INDEX IF NOT EXISTS idx_assoc_group ON question_group_associations(group_id);

-- Pipeline work items (message-equivalents); terminal states are sticky
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    source TEXT,
    content TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK(status IN ('pending','processing','completed','failed')),
    error TEXT,
    questions_found INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);

-- Persistent job queue, one row per enqueued job
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lane TEXT NOT NULL,
    payload TEXT,
    priority INTEGER NOT NULL DEFAULT 0,
    run_after TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK(status IN ('pending','running','completed','failed')),
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(lane, status, run_after, priority);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
