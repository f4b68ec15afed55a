//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`].

use rusqlite::Connection;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Get the stored embedding model identifier, if any.
///
/// Embeddings from different models are not comparable; the stored identity
/// lets callers detect a model change and re-embed.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    match conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_model'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Set the stored embedding model identifier.
pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    Ok(())
}

/// Reconcile the stored embedding model with the configured one.
///
/// Embeddings from different models are not comparable, so a model change
/// invalidates every stored vector: question embeddings and representative
/// embeddings are cleared for the backfill lane to recompute, and the
/// stored identity is updated. Returns whether a change was detected.
pub fn sync_embedding_model(conn: &Connection, configured: &str) -> rusqlite::Result<bool> {
    match get_embedding_model(conn)? {
        Some(stored) if stored == configured => Ok(false),
        None => {
            set_embedding_model(conn, configured)?;
            Ok(false)
        }
        Some(stored) => {
            tracing::warn!(
                stored,
                configured,
                "embedding model changed, clearing stored embeddings for re-embedding"
            );
            conn.execute(
                "UPDATE questions SET embedding = NULL WHERE embedding IS NOT NULL",
                [],
            )?;
            conn.execute(
                "UPDATE faq_groups SET representative_embedding = NULL \
                 WHERE representative_embedding IS NOT NULL",
                [],
            )?;
            set_embedding_model(conn, configured)?;
            Ok(true)
        }
    }
}

/// Run any pending forward-only migrations.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        match next {
            2 => migrate_v1_to_v2(conn)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }

        update_schema_version(conn, next)?;
        version = next;
    }

    Ok(())
}

/// Migration v1 → v2: Store the embedding model identifier in schema_meta.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('embedding_model', 'text-embedding-3-small')",
        [],
    )?;
    Ok(())
}
