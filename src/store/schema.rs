//! Schema management.
//!
//! Runs on every open: creates the base tables, the FTS5 external-content
//! tables, the triggers that keep them synchronized, and the supporting
//! indexes, all idempotently. Also performs the one-shot migration of a
//! legacy `observations` table whose `id` column was never declared a
//! primary key.

use super::rows::OBSERVATION_COLUMNS;
use crate::{Error, Result};
use rusqlite::{Connection, params};
use std::collections::HashSet;

/// Brings the database schema fully up to date.
///
/// Safe to call on every open; existing objects are left untouched.
///
/// # Errors
///
/// Returns [`Error::Storage`] when any DDL statement or the legacy
/// migration fails. A failed migration leaves the database unchanged.
pub fn initialize(conn: &Connection) -> Result<()> {
    create_base_tables(conn)?;
    let legacy = needs_legacy_migration(conn)?;
    create_observations_table(conn, "observations")?;
    ensure_observation_columns(conn)?;
    create_fts_tables(conn)?;
    if legacy {
        migrate_legacy_observations(conn)?;
    }
    backfill_defaults(conn)?;
    create_triggers(conn)?;
    create_indexes(conn)?;
    Ok(())
}

fn create_base_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            project TEXT,
            directory TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            summary TEXT
        );
        CREATE TABLE IF NOT EXISTS user_prompts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            content TEXT NOT NULL,
            project TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sync_chunks (
            chunk_id TEXT PRIMARY KEY,
            imported_at TEXT NOT NULL
        );",
    )
    .map_err(|e| Error::storage("create_base_tables", e))
}

/// Creates the canonical observations table under the given name.
fn create_observations_table(conn: &Connection, name: &str) -> Result<()> {
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {name} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            type TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            tool_name TEXT,
            project TEXT,
            scope TEXT NOT NULL DEFAULT 'project',
            topic_key TEXT,
            normalized_hash TEXT,
            revision_count INTEGER NOT NULL DEFAULT 1,
            duplicate_count INTEGER NOT NULL DEFAULT 1,
            last_seen_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            deleted_at TEXT
        )"
    );
    conn.execute(&ddl, [])
        .map_err(|e| Error::storage("create_observations_table", e))?;
    Ok(())
}

/// Columns added after the first release, with the declarations used when
/// retrofitting them onto an older table.
const RETROFIT_COLUMNS: &[(&str, &str)] = &[
    ("tool_name", "TEXT"),
    ("project", "TEXT"),
    ("scope", "TEXT NOT NULL DEFAULT 'project'"),
    ("topic_key", "TEXT"),
    ("normalized_hash", "TEXT"),
    ("revision_count", "INTEGER NOT NULL DEFAULT 1"),
    ("duplicate_count", "INTEGER NOT NULL DEFAULT 1"),
    ("last_seen_at", "TEXT"),
    ("updated_at", "TEXT"),
    ("deleted_at", "TEXT"),
];

/// Adds any canonical column missing from an older observations table.
fn ensure_observation_columns(conn: &Connection) -> Result<()> {
    let existing = table_columns(conn, "observations")?;
    for (name, decl) in RETROFIT_COLUMNS {
        if !existing.contains(*name) {
            conn.execute(
                &format!("ALTER TABLE observations ADD COLUMN {name} {decl}"),
                [],
            )
            .map_err(|e| Error::storage("add_observation_column", e))?;
        }
    }
    Ok(())
}

fn create_fts_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
            title, content, tool_name, type, project,
            content='observations', content_rowid='id'
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS prompts_fts USING fts5(
            content, project,
            content='user_prompts', content_rowid='id'
        );",
    )
    .map_err(|e| Error::storage("create_fts_tables", e))
}

/// Backfills defaults for rows written before newer columns existed.
fn backfill_defaults(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "UPDATE observations SET scope = 'project'
           WHERE scope IS NULL OR trim(scope) = '';
         UPDATE observations SET revision_count = 1
           WHERE revision_count IS NULL OR revision_count < 1;
         UPDATE observations SET duplicate_count = 1
           WHERE duplicate_count IS NULL OR duplicate_count < 1;
         UPDATE observations SET updated_at = created_at
           WHERE updated_at IS NULL;",
    )
    .map_err(|e| Error::storage("backfill_defaults", e))
}

/// Triggers keeping the FTS shadow tables exactly in step with the live
/// rows. Created only when absent so repeated opens stay idempotent.
fn create_triggers(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS observations_ai AFTER INSERT ON observations
        BEGIN
            INSERT INTO observations_fts(rowid, title, content, tool_name, type, project)
            SELECT new.id, new.title, new.content, new.tool_name, new.type, new.project
            WHERE new.deleted_at IS NULL;
        END;

        CREATE TRIGGER IF NOT EXISTS observations_au AFTER UPDATE ON observations
        BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, content, tool_name, type, project)
            SELECT 'delete', old.id, old.title, old.content, old.tool_name, old.type, old.project
            WHERE old.deleted_at IS NULL;
            INSERT INTO observations_fts(rowid, title, content, tool_name, type, project)
            SELECT new.id, new.title, new.content, new.tool_name, new.type, new.project
            WHERE new.deleted_at IS NULL;
        END;

        CREATE TRIGGER IF NOT EXISTS observations_ad AFTER DELETE ON observations
        BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, content, tool_name, type, project)
            SELECT 'delete', old.id, old.title, old.content, old.tool_name, old.type, old.project
            WHERE old.deleted_at IS NULL;
        END;

        CREATE TRIGGER IF NOT EXISTS prompts_ai AFTER INSERT ON user_prompts
        BEGIN
            INSERT INTO prompts_fts(rowid, content, project)
            VALUES (new.id, new.content, new.project);
        END;

        CREATE TRIGGER IF NOT EXISTS prompts_au AFTER UPDATE ON user_prompts
        BEGIN
            INSERT INTO prompts_fts(prompts_fts, rowid, content, project)
            VALUES ('delete', old.id, old.content, old.project);
            INSERT INTO prompts_fts(rowid, content, project)
            VALUES (new.id, new.content, new.project);
        END;

        CREATE TRIGGER IF NOT EXISTS prompts_ad AFTER DELETE ON user_prompts
        BEGIN
            INSERT INTO prompts_fts(prompts_fts, rowid, content, project)
            VALUES ('delete', old.id, old.content, old.project);
        END;",
    )
    .map_err(|e| Error::storage("create_triggers", e))
}

fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_observations_session ON observations(session_id);
        CREATE INDEX IF NOT EXISTS idx_observations_project ON observations(project);
        CREATE INDEX IF NOT EXISTS idx_observations_created ON observations(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_observations_topic
            ON observations(topic_key, project, scope);
        CREATE INDEX IF NOT EXISTS idx_observations_hash
            ON observations(normalized_hash, project, scope);
        CREATE INDEX IF NOT EXISTS idx_observations_deleted ON observations(deleted_at);
        CREATE INDEX IF NOT EXISTS idx_prompts_session ON user_prompts(session_id);
        CREATE INDEX IF NOT EXISTS idx_prompts_created ON user_prompts(created_at DESC);",
    )
    .map_err(|e| Error::storage("create_indexes", e))
}

/// Returns the column names of `table`.
fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| Error::storage("table_info", e))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| Error::storage("table_info", e))?
        .filter_map(std::result::Result::ok)
        .collect();
    Ok(names)
}

/// Detects the legacy shape: an `observations` table whose `id` column is
/// not a declared primary key.
fn needs_legacy_migration(conn: &Connection) -> Result<bool> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'observations'",
            [],
            |_| Ok(true),
        )
        .map_or(false, |v: bool| v);
    if !exists {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare("PRAGMA table_info(observations)")
        .map_err(|e| Error::storage("table_info", e))?;
    let mut id_is_pk = None;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?))
        })
        .map_err(|e| Error::storage("table_info", e))?;
    for row in rows {
        let (name, pk) = row.map_err(|e| Error::storage("table_info", e))?;
        if name == "id" {
            id_is_pk = Some(pk > 0);
        }
    }

    Ok(matches!(id_is_pk, Some(false)))
}

/// A legacy row staged for the rebuilt table.
struct LegacyRow {
    id: Option<i64>,
    session_id: String,
    kind: String,
    title: String,
    content: String,
    tool_name: Option<String>,
    project: Option<String>,
    scope: String,
    topic_key: Option<String>,
    normalized_hash: Option<String>,
    revision_count: i64,
    duplicate_count: i64,
    last_seen_at: Option<String>,
    created_at: String,
    updated_at: Option<String>,
    deleted_at: Option<String>,
}

/// Rebuilds a legacy observations table into the canonical shape.
///
/// Each row is copied in `rowid` order; the first occurrence of any
/// duplicated id keeps the original id, later occurrences (and null ids)
/// receive fresh autoincrement values. Null or empty `type` becomes
/// `manual`, null or empty `title` becomes `Untitled observation`, and
/// timestamps are preserved. The FTS index is rebuilt from the live rows.
/// Runs inside a single transaction; failure leaves the database unchanged.
fn migrate_legacy_observations(conn: &Connection) -> Result<()> {
    super::Store::with_transaction(conn, "migrate_legacy_observations", |conn| {
        let rows = read_legacy_rows(conn)?;
        let total = rows.len();

        conn.execute("DROP TABLE IF EXISTS observations_migrated", [])
            .map_err(|e| Error::storage("drop_stale_migration_table", e))?;
        create_observations_table(conn, "observations_migrated")?;

        let mut seen_ids: HashSet<i64> = HashSet::new();
        let mut preserved = 0usize;
        for row in rows {
            let keep_id = match row.id {
                Some(id) if id > 0 && seen_ids.insert(id) => {
                    preserved += 1;
                    Some(id)
                },
                _ => None,
            };
            insert_migrated_row(conn, keep_id, &row)?;
        }

        conn.execute_batch(
            "DROP TABLE observations;
             ALTER TABLE observations_migrated RENAME TO observations;",
        )
        .map_err(|e| Error::storage("swap_observations_table", e))?;

        rebuild_observations_fts(conn)?;

        tracing::info!(total, preserved, "migrated legacy observations table");
        Ok(())
    })
}

fn read_legacy_rows(conn: &Connection) -> Result<Vec<LegacyRow>> {
    let sql = format!("SELECT {OBSERVATION_COLUMNS} FROM observations ORDER BY rowid");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| Error::storage("read_legacy_rows", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(LegacyRow {
                id: row.get(0)?,
                session_id: row
                    .get::<_, Option<String>>(1)?
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "legacy".to_string()),
                kind: row
                    .get::<_, Option<String>>(2)?
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "manual".to_string()),
                title: row
                    .get::<_, Option<String>>(3)?
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "Untitled observation".to_string()),
                content: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                tool_name: row.get(5)?,
                project: row.get(6)?,
                scope: row
                    .get::<_, Option<String>>(7)?
                    .unwrap_or_else(|| "project".to_string()),
                topic_key: row.get(8)?,
                normalized_hash: row.get(9)?,
                revision_count: row.get::<_, Option<i64>>(10)?.unwrap_or(1).max(1),
                duplicate_count: row.get::<_, Option<i64>>(11)?.unwrap_or(1).max(1),
                last_seen_at: row.get(12)?,
                created_at: row
                    .get::<_, Option<String>>(13)?
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(crate::now_utc),
                updated_at: row.get(14)?,
                deleted_at: row.get(15)?,
            })
        })
        .map_err(|e| Error::storage("read_legacy_rows", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::storage("read_legacy_rows", e))?;
    Ok(rows)
}

fn insert_migrated_row(conn: &Connection, keep_id: Option<i64>, row: &LegacyRow) -> Result<()> {
    // Referenced sessions may be missing from ancient databases.
    conn.execute(
        "INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?1, ?2)",
        params![row.session_id, row.created_at],
    )
    .map_err(|e| Error::storage("migrate_stub_session", e))?;

    conn.execute(
        "INSERT INTO observations_migrated (
            id, session_id, type, title, content, tool_name, project, scope,
            topic_key, normalized_hash, revision_count, duplicate_count,
            last_seen_at, created_at, updated_at, deleted_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            keep_id,
            row.session_id,
            row.kind,
            row.title,
            row.content,
            row.tool_name,
            row.project,
            row.scope,
            row.topic_key,
            row.normalized_hash,
            row.revision_count,
            row.duplicate_count,
            row.last_seen_at,
            row.created_at,
            row.updated_at.as_deref().unwrap_or(&row.created_at),
            row.deleted_at,
        ],
    )
    .map_err(|e| Error::storage("insert_migrated_row", e))?;
    Ok(())
}

/// Clears the observations FTS index and refills it from the live rows.
fn rebuild_observations_fts(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "INSERT INTO observations_fts(observations_fts) VALUES('delete-all');
         INSERT INTO observations_fts(rowid, title, content, tool_name, type, project)
             SELECT id, title, content, tool_name, type, project
             FROM observations WHERE deleted_at IS NULL;",
    )
    .map_err(|e| Error::storage("rebuild_observations_fts", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::configure_connection;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();
        conn
    }

    #[test]
    fn test_initialize_twice_is_idempotent() {
        let conn = fresh_conn();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();

        let triggers: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(triggers, 6);
    }

    #[test]
    fn test_fresh_schema_is_not_legacy() {
        let conn = fresh_conn();
        initialize(&conn).unwrap();
        assert!(!needs_legacy_migration(&conn).unwrap());
    }

    #[test]
    fn test_legacy_detection_on_undeclared_pk() {
        let conn = fresh_conn();
        conn.execute_batch(
            "CREATE TABLE observations (
                id INTEGER,
                session_id TEXT,
                type TEXT,
                title TEXT,
                content TEXT,
                created_at TEXT
            );",
        )
        .unwrap();
        assert!(needs_legacy_migration(&conn).unwrap());
    }

    #[test]
    fn test_retrofit_adds_missing_columns() {
        let conn = fresh_conn();
        conn.execute_batch(
            "CREATE TABLE sessions (id TEXT PRIMARY KEY, project TEXT, directory TEXT,
                started_at TEXT NOT NULL, ended_at TEXT, summary TEXT);
             CREATE TABLE observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .unwrap();
        initialize(&conn).unwrap();

        let columns = table_columns(&conn, "observations").unwrap();
        for (name, _) in RETROFIT_COLUMNS {
            assert!(columns.contains(*name), "missing retrofit column {name}");
        }
    }

    #[test]
    fn test_legacy_migration_reassigns_duplicate_ids() {
        let conn = fresh_conn();
        conn.execute_batch(
            "CREATE TABLE observations (
                id INTEGER,
                session_id TEXT,
                type TEXT,
                title TEXT,
                content TEXT,
                created_at TEXT
            );
            INSERT INTO observations VALUES (7, 's1', 'manual', 'first seven', 'legacy body one', '2024-01-01 00:00:00');
            INSERT INTO observations VALUES (7, 's1', '', '', 'legacy body two', '2024-01-02 00:00:00');
            INSERT INTO observations VALUES (NULL, NULL, 'manual', 'null id', 'legacy body three', '2024-01-03 00:00:00');",
        )
        .unwrap();

        initialize(&conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT id, type, title, session_id FROM observations ORDER BY created_at")
            .unwrap();
        let rows: Vec<(i64, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .unwrap()
            .map(std::result::Result::unwrap)
            .collect();

        assert_eq!(rows.len(), 3);
        // First occurrence keeps id 7; the others get fresh positive ids.
        assert_eq!(rows[0].0, 7);
        assert!(rows[1].0 > 0 && rows[1].0 != 7);
        assert!(rows[2].0 > 0 && rows[2].0 != rows[1].0);
        // Coercions applied.
        assert_eq!(rows[1].1, "manual");
        assert_eq!(rows[1].2, "Untitled observation");
        assert_eq!(rows[2].3, "legacy");

        // The FTS index was rebuilt from the migrated rows.
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM observations_fts WHERE observations_fts MATCH '\"legacy\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 3);

        // New inserts continue past every preserved id.
        conn.execute(
            "INSERT INTO observations (session_id, type, title, content, created_at)
             VALUES ('s1', 'manual', 'fresh', 'fresh body', '2024-01-04 00:00:00')",
            [],
        )
        .unwrap();
        let new_id: i64 = conn
            .query_row("SELECT MAX(id) FROM observations", [], |row| row.get(0))
            .unwrap();
        assert!(new_id > rows[2].0.max(7));
    }

    #[test]
    fn test_soft_deleted_rows_stay_out_of_rebuilt_fts() {
        let conn = fresh_conn();
        conn.execute_batch(
            "CREATE TABLE observations (
                id INTEGER,
                session_id TEXT,
                type TEXT,
                title TEXT,
                content TEXT,
                created_at TEXT,
                deleted_at TEXT
            );
            INSERT INTO observations VALUES (1, 's1', 'manual', 'alive', 'visible words', '2024-01-01 00:00:00', NULL);
            INSERT INTO observations VALUES (2, 's1', 'manual', 'hidden', 'invisible words', '2024-01-01 00:00:00', '2024-01-02 00:00:00');",
        )
        .unwrap();

        initialize(&conn).unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM observations_fts WHERE observations_fts MATCH '\"invisible\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);
    }
}
