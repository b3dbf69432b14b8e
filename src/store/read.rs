//! Read engine.
//!
//! Ranked full-text search, scope- and project-filtered listings, timeline
//! windows, aggregate statistics, and the formatted context block. Every
//! query filters `deleted_at IS NULL`; soft-deleted rows are invisible to
//! all of these paths.

use super::metrics::record_operation;
use super::rows::{
    observation_from_row, prompt_from_row, qualified_observation_columns, session_from_row,
    OBSERVATION_COLUMNS, PROMPT_COLUMNS, SESSION_COLUMNS,
};
use super::Store;
use crate::models::{
    Observation, SearchHit, Session, SessionListing, StoreStats, Timeline, UserPrompt,
};
use crate::normalize::{normalize_scope, sanitize_fts_query};
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::time::Instant;
use tracing::instrument;

/// Optional filters for observation search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to one observation type.
    pub kind: Option<String>,
    /// Restrict to one project tag.
    pub project: Option<String>,
    /// Restrict to one scope (raw string; coerced by the normalizer).
    pub scope: Option<String>,
    /// Requested result cap; clamped to the configured hard cap.
    pub limit: Option<usize>,
}

impl SearchFilter {
    /// Restricts results to the given observation type.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Restricts results to the given project.
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Restricts results to the given scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Store {
    /// Fetches a single live observation by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a non-positive id,
    /// [`Error::NotFound`] when the row is absent or soft-deleted, and
    /// [`Error::Storage`] on database failure.
    #[instrument(skip(self), fields(operation = "get_observation"))]
    pub fn get_observation(&self, id: i64) -> Result<Observation> {
        let start = Instant::now();
        let result = (|| {
            if id <= 0 {
                return Err(Error::Validation("observation id is required".to_string()));
            }
            let conn = self.lock();
            let sql = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE id = ?1 AND deleted_at IS NULL"
            );
            conn.query_row(&sql, params![id], observation_from_row)
                .optional()
                .map_err(|e| Error::storage("get_observation", e))?
                .ok_or_else(|| Error::NotFound(format!("observation {id}")))
        })();
        record_operation("get_observation", start, status_of(&result));
        result
    }

    /// Ranked full-text search over live observations.
    ///
    /// The query is sanitized into a literal-phrase MATCH expression first,
    /// so any printable input is a valid search. Results are ordered by
    /// ascending FTS rank (best match first). A query with no searchable
    /// terms returns an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    #[instrument(skip(self, filter), fields(operation = "search_observations"))]
    pub fn search_observations(&self, query: &str, filter: &SearchFilter) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let result = (|| {
            let sanitized = sanitize_fts_query(query);
            if sanitized.is_empty() {
                return Ok(Vec::new());
            }
            let limit = self.config().clamp_search_limit(filter.limit);

            let mut sql = format!(
                "SELECT {}, observations_fts.rank
                 FROM observations_fts
                 JOIN observations o ON o.id = observations_fts.rowid
                 WHERE observations_fts MATCH ?1 AND o.deleted_at IS NULL",
                qualified_observation_columns("o")
            );
            let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(sanitized)];
            push_filter(&mut sql, &mut values, "o.type", filter.kind.as_deref());
            push_filter(&mut sql, &mut values, "o.project", filter.project.as_deref());
            push_filter(
                &mut sql,
                &mut values,
                "o.scope",
                filter.scope.as_deref().map(normalize_scope),
            );
            sql.push_str(&format!(" ORDER BY observations_fts.rank LIMIT {limit}"));

            let conn = self.lock();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_search", e))?;
            let refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
            let hits = stmt
                .query_map(refs.as_slice(), |row| {
                    Ok(SearchHit {
                        observation: observation_from_row(row)?,
                        rank: row.get(16)?,
                    })
                })
                .map_err(|e| Error::storage("search_observations", e))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::storage("search_observations", e))?;
            Ok(hits)
        })();
        record_operation("search_observations", start, status_of(&result));
        result
    }

    /// Newest-first listing capped at the configured context window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    pub fn recent_observations(
        &self,
        project: Option<&str>,
        scope: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Observation>> {
        let limit = limit.unwrap_or(self.config().context_window).max(1);
        self.list_observations(project, scope, limit, 0)
    }

    /// Newest-first paginated listing up to the caller's limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    pub fn all_observations(
        &self,
        project: Option<&str>,
        scope: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Observation>> {
        self.list_observations(project, scope, limit.max(1), offset)
    }

    fn list_observations(
        &self,
        project: Option<&str>,
        scope: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Observation>> {
        let mut sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE deleted_at IS NULL"
        );
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();
        push_filter(&mut sql, &mut values, "project", project);
        push_filter(&mut sql, &mut values, "scope", scope.map(normalize_scope));
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT {limit} OFFSET {offset}"
        ));

        let conn = self.lock();
        query_observations(&conn, &sql, &values)
    }

    /// All observations of one session in chronological order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    pub fn session_observations(&self, session_id: &str) -> Result<Vec<Observation>> {
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE session_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC"
        );
        let conn = self.lock();
        let values: Vec<Box<dyn ToSql>> = vec![Box::new(session_id.to_string())];
        query_observations(&conn, &sql, &values)
    }

    /// Newest-first sessions with their live observation counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    pub fn recent_sessions(
        &self,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionListing>> {
        self.list_sessions(project, limit.max(1), 0)
    }

    /// Newest-first paginated session listing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    pub fn all_sessions(
        &self,
        project: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionListing>> {
        self.list_sessions(project, limit.max(1), offset)
    }

    fn list_sessions(
        &self,
        project: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionListing>> {
        // Sessions have no scope column; only the project filter applies.
        let mut sql = String::from(
            "SELECT s.id, s.project, s.directory, s.started_at, s.ended_at, s.summary,
                    COUNT(o.id) AS observation_count
             FROM sessions s
             LEFT JOIN observations o ON o.session_id = s.id AND o.deleted_at IS NULL
             WHERE 1 = 1",
        );
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();
        push_filter(&mut sql, &mut values, "s.project", project);
        sql.push_str(&format!(
            " GROUP BY s.id ORDER BY s.started_at DESC, s.id DESC LIMIT {limit} OFFSET {offset}"
        ));

        let conn = self.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::storage("prepare_list_sessions", e))?;
        let refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
        let listings = stmt
            .query_map(refs.as_slice(), |row| {
                Ok(SessionListing {
                    session: session_from_row(row)?,
                    observation_count: row.get(6)?,
                })
            })
            .map_err(|e| Error::storage("list_sessions", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::storage("list_sessions", e))?;
        Ok(listings)
    }

    /// Newest-first user prompts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    pub fn recent_prompts(&self, project: Option<&str>, limit: usize) -> Result<Vec<UserPrompt>> {
        let mut sql = format!("SELECT {PROMPT_COLUMNS} FROM user_prompts WHERE 1 = 1");
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();
        push_filter(&mut sql, &mut values, "project", project);
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT {}",
            limit.max(1)
        ));

        let conn = self.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::storage("prepare_recent_prompts", e))?;
        let refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
        let prompts = stmt
            .query_map(refs.as_slice(), prompt_from_row)
            .map_err(|e| Error::storage("recent_prompts", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::storage("recent_prompts", e))?;
        Ok(prompts)
    }

    /// Ranked full-text search over user prompts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    #[instrument(skip(self), fields(operation = "search_prompts"))]
    pub fn search_prompts(
        &self,
        query: &str,
        project: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<UserPrompt>> {
        let start = Instant::now();
        let result = (|| {
            let sanitized = sanitize_fts_query(query);
            if sanitized.is_empty() {
                return Ok(Vec::new());
            }
            let limit = self.config().clamp_search_limit(limit);

            let mut sql = format!(
                "SELECT {} FROM prompts_fts
                 JOIN user_prompts p ON p.id = prompts_fts.rowid
                 WHERE prompts_fts MATCH ?1",
                PROMPT_COLUMNS
                    .split(", ")
                    .map(|c| format!("p.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(sanitized)];
            push_filter(&mut sql, &mut values, "p.project", project);
            sql.push_str(&format!(" ORDER BY prompts_fts.rank LIMIT {limit}"));

            let conn = self.lock();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_search_prompts", e))?;
            let refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
            let prompts = stmt
                .query_map(refs.as_slice(), prompt_from_row)
                .map_err(|e| Error::storage("search_prompts", e))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::storage("search_prompts", e))?;
            Ok(prompts)
        })();
        record_operation("search_prompts", start, status_of(&result));
        result
    }

    /// Chronological neighborhood of a focus observation within its session.
    ///
    /// Neighbors are selected by id rather than timestamp: ids are
    /// monotonic, cheap to index, and stable under batched inserts that
    /// share a timestamp. Soft-deleted rows are skipped in both directions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for non-positive `before`/`after`,
    /// [`Error::NotFound`] when the focus row is absent or soft-deleted,
    /// and [`Error::Storage`] on database failure.
    #[instrument(skip(self), fields(operation = "timeline"))]
    pub fn timeline(&self, observation_id: i64, before: usize, after: usize) -> Result<Timeline> {
        let start = Instant::now();
        let result = (|| {
            if before == 0 || after == 0 {
                return Err(Error::Validation(
                    "before and after must be positive".to_string(),
                ));
            }
            let focus = self.get_observation(observation_id)?;

            let conn = self.lock();
            let session: Option<Session> = conn
                .query_row(
                    &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                    params![focus.session_id],
                    session_from_row,
                )
                .optional()
                .map_err(|e| Error::storage("timeline_session", e))?;

            let sql_before = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE session_id = ?1 AND id < ?2 AND deleted_at IS NULL
                 ORDER BY id DESC LIMIT {before}"
            );
            let values: Vec<Box<dyn ToSql>> =
                vec![Box::new(focus.session_id.clone()), Box::new(focus.id)];
            let mut rows_before = query_observations(&conn, &sql_before, &values)?;
            rows_before.reverse();

            let sql_after = format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE session_id = ?1 AND id > ?2 AND deleted_at IS NULL
                 ORDER BY id ASC LIMIT {after}"
            );
            let rows_after = query_observations(&conn, &sql_after, &values)?;

            let total_in_session: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM observations
                     WHERE session_id = ?1 AND deleted_at IS NULL",
                    params![focus.session_id],
                    |row| row.get(0),
                )
                .map_err(|e| Error::storage("timeline_count", e))?;

            Ok(Timeline {
                focus,
                before: rows_before,
                after: rows_after,
                session,
                total_in_session,
            })
        })();
        record_operation("timeline", start, status_of(&result));
        result
    }

    /// Aggregate totals over the whole store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    #[instrument(skip(self), fields(operation = "stats"))]
    pub fn stats(&self) -> Result<StoreStats> {
        let start = Instant::now();
        let result = (|| {
            let conn = self.lock();
            let count = |sql: &str| -> Result<i64> {
                conn.query_row(sql, [], |row| row.get(0))
                    .map_err(|e| Error::storage("stats", e))
            };
            let total_sessions = count("SELECT COUNT(*) FROM sessions")?;
            let total_observations =
                count("SELECT COUNT(*) FROM observations WHERE deleted_at IS NULL")?;
            let total_prompts = count("SELECT COUNT(*) FROM user_prompts")?;

            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT project FROM observations
                     WHERE deleted_at IS NULL AND project IS NOT NULL
                     ORDER BY project ASC",
                )
                .map_err(|e| Error::storage("stats", e))?;
            let projects = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| Error::storage("stats", e))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::storage("stats", e))?;

            Ok(StoreStats {
                total_sessions,
                total_observations,
                total_prompts,
                projects,
            })
        })();
        record_operation("stats", start, status_of(&result));
        result
    }

    /// Builds the human-readable context block agents read back after a
    /// compaction: recent sessions, prompts, and observations with
    /// timestamps and truncated previews. An empty store yields an empty
    /// string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    pub fn format_context(&self, project: Option<&str>, scope: Option<&str>) -> Result<String> {
        let sessions = self.recent_sessions(project, 5)?;
        let prompts = self.recent_prompts(project, 10)?;
        let observations = self.recent_observations(project, scope, None)?;

        if sessions.is_empty() && prompts.is_empty() && observations.is_empty() {
            return Ok(String::new());
        }

        let mut block = String::from("# Engram memory\n");
        if !sessions.is_empty() {
            block.push_str("\n## Recent sessions\n");
            for listing in &sessions {
                let s = &listing.session;
                block.push_str(&format!(
                    "- [{}] {} ({} observations)",
                    s.started_at, s.id, listing.observation_count
                ));
                if let Some(summary) = &s.summary {
                    block.push_str(&format!(" — {}", preview(summary)));
                }
                block.push('\n');
            }
        }
        if !prompts.is_empty() {
            block.push_str("\n## Recent prompts\n");
            for prompt in &prompts {
                block.push_str(&format!(
                    "- [{}] {}\n",
                    prompt.created_at,
                    preview(&prompt.content)
                ));
            }
        }
        if !observations.is_empty() {
            block.push_str("\n## Recent observations\n");
            for obs in &observations {
                block.push_str(&format!(
                    "- [{}] ({}) {} — {}\n",
                    obs.created_at,
                    obs.kind,
                    obs.title,
                    preview(&obs.content)
                ));
            }
        }
        Ok(block)
    }
}

/// Single-line preview capped at 200 characters.
fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= 200 {
        flat
    } else {
        let head: String = flat.chars().take(200).collect();
        format!("{head}…")
    }
}

/// Appends `AND column = ?N` when the filter value is present.
fn push_filter(
    sql: &mut String,
    values: &mut Vec<Box<dyn ToSql>>,
    column: &str,
    value: Option<&str>,
) {
    if let Some(value) = value {
        values.push(Box::new(value.to_string()));
        sql.push_str(&format!(" AND {column} = ?{}", values.len()));
    }
}

fn query_observations(
    conn: &Connection,
    sql: &str,
    values: &[Box<dyn ToSql>],
) -> Result<Vec<Observation>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::storage("prepare_observation_query", e))?;
    let refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
    stmt.query_map(refs.as_slice(), observation_from_row)
        .map_err(|e| Error::storage("query_observations", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::storage("query_observations", e))
}

fn status_of<T>(result: &Result<T>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}
