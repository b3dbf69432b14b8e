//! Snapshot export/import on the store.
//!
//! The database side of the sync engine: reading a whole-database (or
//! project-filtered, watermarked) snapshot, applying one inside a single
//! transaction, and recording which sync chunks have already been applied.

use super::metrics::record_operation;
use super::rows::{
    observation_from_row, prompt_from_row, qualified_observation_columns, session_from_row,
    SESSION_COLUMNS,
};
use super::Store;
use crate::normalize::content_hash;
use crate::sync::{ImportCounts, Snapshot, SNAPSHOT_VERSION};
use crate::{now_utc, Error, Result};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::time::Instant;
use tracing::instrument;

impl Store {
    /// Reads a snapshot of the database.
    ///
    /// With a `project`, only sessions tagged with it are exported, along
    /// with the observations and prompts belonging to those sessions. With
    /// a `since` watermark, only records created strictly after it are
    /// included (sessions compare on `started_at`). Soft-deleted
    /// observations are part of the snapshot; they are state until hard
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    #[instrument(skip(self), fields(operation = "export_snapshot"))]
    pub fn export_snapshot(
        &self,
        project: Option<&str>,
        since: Option<&str>,
    ) -> Result<Snapshot> {
        let start = Instant::now();
        let result = (|| {
            let conn = self.lock();

            let sessions = {
                let mut sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE 1 = 1");
                let mut values: Vec<Box<dyn ToSql>> = Vec::new();
                append_clause(&mut sql, &mut values, "project =", project);
                append_clause(&mut sql, &mut values, "started_at >", since);
                sql.push_str(" ORDER BY started_at ASC, id ASC");
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| Error::storage("export_sessions", e))?;
                let refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
                stmt.query_map(refs.as_slice(), session_from_row)
                    .map_err(|e| Error::storage("export_sessions", e))?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::storage("export_sessions", e))?
            };

            let observations = {
                let mut sql = format!(
                    "SELECT {} FROM observations o
                     JOIN sessions s ON s.id = o.session_id
                     WHERE 1 = 1",
                    qualified_observation_columns("o")
                );
                let mut values: Vec<Box<dyn ToSql>> = Vec::new();
                append_clause(&mut sql, &mut values, "s.project =", project);
                append_clause(&mut sql, &mut values, "o.created_at >", since);
                sql.push_str(" ORDER BY o.id ASC");
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| Error::storage("export_observations", e))?;
                let refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
                stmt.query_map(refs.as_slice(), observation_from_row)
                    .map_err(|e| Error::storage("export_observations", e))?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::storage("export_observations", e))?
            };

            let prompts = {
                let mut sql = String::from(
                    "SELECT p.id, p.session_id, p.content, p.project, p.created_at
                     FROM user_prompts p
                     JOIN sessions s ON s.id = p.session_id
                     WHERE 1 = 1",
                );
                let mut values: Vec<Box<dyn ToSql>> = Vec::new();
                append_clause(&mut sql, &mut values, "s.project =", project);
                append_clause(&mut sql, &mut values, "p.created_at >", since);
                sql.push_str(" ORDER BY p.id ASC");
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| Error::storage("export_prompts", e))?;
                let refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
                stmt.query_map(refs.as_slice(), prompt_from_row)
                    .map_err(|e| Error::storage("export_prompts", e))?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::storage("export_prompts", e))?
            };

            Ok(Snapshot {
                version: SNAPSHOT_VERSION,
                exported_at: now_utc(),
                sessions,
                observations,
                prompts,
            })
        })();
        record_operation("export_snapshot", start, status_of(&result));
        result
    }

    /// Applies a snapshot inside a single transaction.
    ///
    /// Sessions are inserted with `INSERT OR IGNORE` (dedup on id).
    /// Observations keep every field except `id`, which the autoincrement
    /// reassigns, and `normalized_hash`, which is recomputed from the
    /// content. Prompts are appended with fresh ids. Returns counts of rows
    /// actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure; the transaction is
    /// rolled back and nothing is imported.
    #[instrument(skip(self, snapshot), fields(operation = "import_snapshot"))]
    pub fn import_snapshot(&self, snapshot: &Snapshot) -> Result<ImportCounts> {
        let start = Instant::now();
        let result = (|| {
            let conn = self.lock();
            Self::with_transaction(&conn, "import_snapshot", |conn| {
                apply_snapshot(conn, snapshot)
            })
        })();
        record_operation("import_snapshot", start, status_of(&result));
        result
    }

    /// Applies one sync chunk's records and marks the chunk as imported,
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    #[instrument(skip(self, records), fields(operation = "apply_chunk", chunk = chunk_id))]
    pub fn apply_chunk(&self, records: &Snapshot, chunk_id: &str) -> Result<ImportCounts> {
        let start = Instant::now();
        let result = (|| {
            let conn = self.lock();
            Self::with_transaction(&conn, "apply_chunk", |conn| {
                let counts = apply_snapshot(conn, records)?;
                conn.execute(
                    "INSERT OR IGNORE INTO sync_chunks (chunk_id, imported_at) VALUES (?1, ?2)",
                    params![chunk_id, now_utc()],
                )
                .map_err(|e| Error::storage("record_sync_chunk", e))?;
                Ok(counts)
            })
        })();
        record_operation("apply_chunk", start, status_of(&result));
        result
    }

    /// Returns whether a chunk id has already been applied to this database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    pub fn is_chunk_applied(&self, chunk_id: &str) -> Result<bool> {
        let conn = self.lock();
        let applied: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sync_chunks WHERE chunk_id = ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::storage("is_chunk_applied", e))?;
        Ok(applied.is_some())
    }
}

fn apply_snapshot(conn: &Connection, snapshot: &Snapshot) -> Result<ImportCounts> {
    let mut counts = ImportCounts::default();

    for session in &snapshot.sessions {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO sessions (id, project, directory, started_at, ended_at, summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.id,
                    session.project,
                    session.directory,
                    session.started_at,
                    session.ended_at,
                    session.summary
                ],
            )
            .map_err(|e| Error::storage("import_session", e))?;
        counts.sessions += inserted;
    }

    for obs in &snapshot.observations {
        // Observations may reference sessions the snapshot does not carry.
        conn.execute(
            "INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?1, ?2)",
            params![obs.session_id, obs.created_at],
        )
        .map_err(|e| Error::storage("import_stub_session", e))?;

        conn.execute(
            "INSERT INTO observations (
                session_id, type, title, content, tool_name, project, scope,
                topic_key, normalized_hash, revision_count, duplicate_count,
                last_seen_at, created_at, updated_at, deleted_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                obs.session_id,
                obs.kind,
                obs.title,
                obs.content,
                obs.tool_name,
                obs.project,
                obs.scope.as_str(),
                obs.topic_key,
                content_hash(&obs.content),
                obs.revision_count,
                obs.duplicate_count,
                obs.last_seen_at,
                obs.created_at,
                obs.updated_at,
                obs.deleted_at
            ],
        )
        .map_err(|e| Error::storage("import_observation", e))?;
        counts.observations += 1;
    }

    for prompt in &snapshot.prompts {
        conn.execute(
            "INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?1, ?2)",
            params![prompt.session_id, prompt.created_at],
        )
        .map_err(|e| Error::storage("import_stub_session", e))?;

        conn.execute(
            "INSERT INTO user_prompts (session_id, content, project, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![prompt.session_id, prompt.content, prompt.project, prompt.created_at],
        )
        .map_err(|e| Error::storage("import_prompt", e))?;
        counts.prompts += 1;
    }

    Ok(counts)
}

/// Appends `AND <column-op> ?N` when the value is present.
fn append_clause(
    sql: &mut String,
    values: &mut Vec<Box<dyn ToSql>>,
    column_op: &str,
    value: Option<&str>,
) {
    if let Some(value) = value {
        values.push(Box::new(value.to_string()));
        sql.push_str(&format!(" AND {column_op} ?{}", values.len()));
    }
}

fn status_of<T>(result: &Result<T>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}
