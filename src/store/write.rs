//! Write engine.
//!
//! All mutations of sessions, observations, and prompts enter through the
//! methods in this module. Text is redacted and truncated before any SQL
//! runs; topic-keyed upserts take precedence over the hash-based dedupe
//! window; the FTS triggers keep the search index consistent within the
//! same transaction.

use super::metrics::record_operation;
use super::Store;
use crate::capture::extract_learnings;
use crate::models::{
    Disposition, ObservationDraft, ObservationUpdate, PassiveCaptureOutcome, SavedObservation,
};
use crate::normalize::{content_hash, normalize_scope, normalize_topic_key, truncate_content};
use crate::security::redact;
use crate::{now_utc, Error, Result, TIMESTAMP_FORMAT};
use rusqlite::{params, Connection, OptionalExtension};
use std::time::Instant;
use tracing::instrument;

/// Session id used when passive capture is invoked without one.
pub const PASSIVE_SESSION_ID: &str = "manual-save";

/// Observation type assigned to passively captured items.
pub const PASSIVE_TYPE: &str = "passive";

/// Request shape for [`Store::passive_capture`].
#[derive(Debug, Clone, Default)]
pub struct PassiveCaptureRequest {
    /// Owning session; defaults to [`PASSIVE_SESSION_ID`].
    pub session_id: Option<String>,
    /// Free text to scan for a learnings section.
    pub content: String,
    /// Project tag applied to every extracted item.
    pub project: Option<String>,
    /// Source label stored as each item's `tool_name`.
    pub source: Option<String>,
}

impl Store {
    /// Creates a session if it does not already exist.
    ///
    /// Idempotent: re-creating an existing session is not an error and
    /// leaves the stored row untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty id and [`Error::Storage`]
    /// on database failure.
    #[instrument(skip(self), fields(operation = "create_session"))]
    pub fn create_session(
        &self,
        id: &str,
        project: Option<&str>,
        directory: Option<&str>,
    ) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            if id.trim().is_empty() {
                return Err(Error::Validation("session id is required".to_string()));
            }
            let conn = self.lock();
            ensure_session(&conn, id, project, directory, &now_utc())
        })();
        record_operation("create_session", start, status_of(&result));
        result
    }

    /// Stamps a session's end time and summary.
    ///
    /// Unknown ids are silent no-ops so callers can end defensively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty id and [`Error::Storage`]
    /// on database failure.
    #[instrument(skip(self, summary), fields(operation = "end_session"))]
    pub fn end_session(&self, id: &str, summary: Option<&str>) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            if id.trim().is_empty() {
                return Err(Error::Validation("session id is required".to_string()));
            }
            let conn = self.lock();
            conn.execute(
                "UPDATE sessions SET ended_at = ?1, summary = ?2 WHERE id = ?3",
                params![now_utc(), summary, id],
            )
            .map_err(|e| Error::storage("end_session", e))?;
            Ok(())
        })();
        record_operation("end_session", start, status_of(&result));
        result
    }

    /// Adds an observation under the dedup, topic, and scope rules.
    ///
    /// Title and content are redacted first and content is truncated to the
    /// configured byte cap. A non-empty topic key upserts the current row
    /// for `(topic_key, project, scope)` in place; otherwise an identical
    /// write inside the dedupe window merges into the existing row; only
    /// then is a new row inserted. The owning session is created on demand.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when `session_id`, `title`, or
    /// `content` is empty, and [`Error::Storage`] on database failure.
    #[instrument(skip(self, draft), fields(operation = "add_observation"))]
    pub fn add_observation(&self, draft: ObservationDraft) -> Result<SavedObservation> {
        let start = Instant::now();
        let result = self.add_observation_inner(draft);
        record_operation("add_observation", start, status_of(&result));
        result
    }

    fn add_observation_inner(&self, draft: ObservationDraft) -> Result<SavedObservation> {
        if draft.session_id.trim().is_empty() {
            return Err(Error::Validation("session_id is required".to_string()));
        }
        let title = redact(&draft.title);
        if title.is_empty() {
            return Err(Error::Validation("title is required".to_string()));
        }
        let content = redact(&draft.content);
        if content.is_empty() {
            return Err(Error::Validation("content is required".to_string()));
        }
        let content = truncate_content(&content, self.config().content_max_bytes);

        let kind = if draft.kind.trim().is_empty() {
            "manual".to_string()
        } else {
            draft.kind.trim().to_string()
        };
        let scope = normalize_scope(draft.scope.as_deref().unwrap_or_default());
        let hash = content_hash(&content);
        let topic_key = draft
            .topic_key
            .as_deref()
            .and_then(normalize_topic_key);
        let now = now_utc();

        let conn = self.lock();
        Self::with_transaction(&conn, "add_observation", |conn| {
            ensure_session(
                conn,
                &draft.session_id,
                draft.project.as_deref(),
                None,
                &now,
            )?;

            if let Some(ref topic) = topic_key {
                if let Some(id) = find_topic_row(conn, topic, draft.project.as_deref(), scope)? {
                    conn.execute(
                        "UPDATE observations SET
                            type = ?1, title = ?2, content = ?3, tool_name = ?4,
                            topic_key = ?5, normalized_hash = ?6,
                            revision_count = revision_count + 1,
                            last_seen_at = ?7, updated_at = ?7
                         WHERE id = ?8",
                        params![kind, title, content, draft.tool_name, topic, hash, now, id],
                    )
                    .map_err(|e| Error::storage("upsert_topic_observation", e))?;
                    return Ok(SavedObservation {
                        id,
                        disposition: Disposition::TopicUpdated,
                    });
                }
            }

            let cutoff = self.dedupe_cutoff();
            if let Some(id) = find_duplicate_row(
                conn,
                &hash,
                draft.project.as_deref(),
                scope,
                &kind,
                &title,
                &cutoff,
            )? {
                conn.execute(
                    "UPDATE observations SET
                        duplicate_count = duplicate_count + 1,
                        last_seen_at = ?1, updated_at = ?1
                     WHERE id = ?2",
                    params![now, id],
                )
                .map_err(|e| Error::storage("absorb_duplicate_observation", e))?;
                return Ok(SavedObservation {
                    id,
                    disposition: Disposition::Deduplicated,
                });
            }

            conn.execute(
                "INSERT INTO observations (
                    session_id, type, title, content, tool_name, project, scope,
                    topic_key, normalized_hash, revision_count, duplicate_count,
                    last_seen_at, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, 1, ?10, ?10, ?10)",
                params![
                    draft.session_id,
                    kind,
                    title,
                    content,
                    draft.tool_name,
                    draft.project,
                    scope,
                    topic_key,
                    hash,
                    now
                ],
            )
            .map_err(|e| Error::storage("insert_observation", e))?;
            Ok(SavedObservation {
                id: conn.last_insert_rowid(),
                disposition: Disposition::Inserted,
            })
        })
    }

    /// Updates a live observation in place.
    ///
    /// Redacts any provided title or content, truncates content, normalizes
    /// scope and topic key, recomputes the normalized hash from the final
    /// content, bumps `revision_count`, and stamps `updated_at`. Never
    /// touches `created_at`, `duplicate_count`, or `last_seen_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a non-positive id, an empty update,
    /// or provided-but-empty title/content; [`Error::NotFound`] when the row
    /// is absent or soft-deleted; [`Error::Storage`] on database failure.
    #[instrument(skip(self, update), fields(operation = "update_observation"))]
    pub fn update_observation(&self, id: i64, update: &ObservationUpdate) -> Result<()> {
        let start = Instant::now();
        let result = self.update_observation_inner(id, update);
        record_operation("update_observation", start, status_of(&result));
        result
    }

    fn update_observation_inner(&self, id: i64, update: &ObservationUpdate) -> Result<()> {
        if id <= 0 {
            return Err(Error::Validation("observation id is required".to_string()));
        }
        if update.is_empty() {
            return Err(Error::Validation(
                "update names no field to change".to_string(),
            ));
        }

        let title = match update.title.as_deref() {
            Some(raw) => {
                let redacted = redact(raw);
                if redacted.is_empty() {
                    return Err(Error::Validation("title cannot be empty".to_string()));
                }
                Some(redacted)
            },
            None => None,
        };
        let content = match update.content.as_deref() {
            Some(raw) => {
                let redacted = redact(raw);
                if redacted.is_empty() {
                    return Err(Error::Validation("content cannot be empty".to_string()));
                }
                Some(truncate_content(&redacted, self.config().content_max_bytes))
            },
            None => None,
        };
        let scope = update.scope.as_deref().map(normalize_scope);
        let topic_provided = update.topic_key.is_some();
        let topic_key = update.topic_key.as_deref().and_then(normalize_topic_key);
        let kind = update.kind.as_deref().map(str::trim).filter(|k| !k.is_empty());

        let conn = self.lock();
        Self::with_transaction(&conn, "update_observation", |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT content FROM observations WHERE id = ?1 AND deleted_at IS NULL",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::storage("fetch_observation_for_update", e))?;
            let Some(existing_content) = existing else {
                return Err(Error::NotFound(format!("observation {id}")));
            };

            let final_content = content.as_deref().unwrap_or(&existing_content);
            let hash = content_hash(final_content);

            conn.execute(
                "UPDATE observations SET
                    type = coalesce(?1, type),
                    title = coalesce(?2, title),
                    content = coalesce(?3, content),
                    project = coalesce(?4, project),
                    scope = coalesce(?5, scope),
                    topic_key = CASE WHEN ?6 THEN ?7 ELSE topic_key END,
                    normalized_hash = ?8,
                    revision_count = revision_count + 1,
                    updated_at = ?9
                 WHERE id = ?10",
                params![
                    kind,
                    title,
                    content,
                    update.project,
                    scope,
                    topic_provided,
                    topic_key,
                    hash,
                    now_utc(),
                    id
                ],
            )
            .map_err(|e| Error::storage("update_observation", e))?;
            Ok(())
        })
    }

    /// Deletes an observation.
    ///
    /// Soft delete stamps `deleted_at` on a live row and is a silent no-op
    /// on an already-deleted one; hard delete removes the row outright.
    /// Either way the FTS index is consistent when the call returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a non-positive id,
    /// [`Error::NotFound`] when no row exists at all, and
    /// [`Error::Storage`] on database failure.
    #[instrument(skip(self), fields(operation = "delete_observation"))]
    pub fn delete_observation(&self, id: i64, hard: bool) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            if id <= 0 {
                return Err(Error::Validation("observation id is required".to_string()));
            }
            let conn = self.lock();
            if hard {
                let removed = conn
                    .execute("DELETE FROM observations WHERE id = ?1", params![id])
                    .map_err(|e| Error::storage("hard_delete_observation", e))?;
                if removed == 0 {
                    return Err(Error::NotFound(format!("observation {id}")));
                }
                return Ok(());
            }

            let now = now_utc();
            let stamped = conn
                .execute(
                    "UPDATE observations SET deleted_at = ?1, updated_at = ?1
                     WHERE id = ?2 AND deleted_at IS NULL",
                    params![now, id],
                )
                .map_err(|e| Error::storage("soft_delete_observation", e))?;
            if stamped == 0 {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM observations WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| Error::storage("soft_delete_observation", e))?;
                if exists.is_none() {
                    return Err(Error::NotFound(format!("observation {id}")));
                }
            }
            Ok(())
        })();
        record_operation("delete_observation", start, status_of(&result));
        result
    }

    /// Appends a user prompt.
    ///
    /// Content is redacted and truncated like observation content; the
    /// owning session is created on demand. Prompts are append-only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when `session_id` or `content` is
    /// empty, and [`Error::Storage`] on database failure.
    #[instrument(skip(self, content), fields(operation = "add_prompt"))]
    pub fn add_prompt(
        &self,
        session_id: &str,
        content: &str,
        project: Option<&str>,
    ) -> Result<i64> {
        let start = Instant::now();
        let result = (|| {
            if session_id.trim().is_empty() {
                return Err(Error::Validation("session_id is required".to_string()));
            }
            let content = redact(content);
            if content.is_empty() {
                return Err(Error::Validation("content is required".to_string()));
            }
            let content = truncate_content(&content, self.config().content_max_bytes);
            let now = now_utc();

            let conn = self.lock();
            Self::with_transaction(&conn, "add_prompt", |conn| {
                ensure_session(conn, session_id, project, None, &now)?;
                conn.execute(
                    "INSERT INTO user_prompts (session_id, content, project, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![session_id, content, project, now],
                )
                .map_err(|e| Error::storage("insert_prompt", e))?;
                Ok(conn.last_insert_rowid())
            })
        })();
        record_operation("add_prompt", start, status_of(&result));
        result
    }

    /// Scans free text for a learnings section and stores each item as a
    /// `passive` observation.
    ///
    /// Items shorter than the configured minimum are skipped; the rest go
    /// through the normal observation write path, so the dedupe window
    /// applies. Returns how many items were extracted, newly saved, and
    /// absorbed as duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty content and propagates the
    /// first failed insert.
    #[instrument(skip(self, request), fields(operation = "passive_capture"))]
    pub fn passive_capture(&self, request: &PassiveCaptureRequest) -> Result<PassiveCaptureOutcome> {
        let start = Instant::now();
        let result = (|| {
            if request.content.trim().is_empty() {
                return Err(Error::Validation("content is required".to_string()));
            }
            let session_id = request
                .session_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(PASSIVE_SESSION_ID);

            let items = extract_learnings(&request.content);
            let mut outcome = PassiveCaptureOutcome {
                extracted: items.len(),
                ..Default::default()
            };

            for item in items {
                if item.text.len() < self.config().passive_min_len {
                    continue;
                }
                let saved = self.add_observation(ObservationDraft {
                    session_id: session_id.to_string(),
                    kind: PASSIVE_TYPE.to_string(),
                    title: item.title(),
                    content: item.text,
                    tool_name: request.source.clone(),
                    project: request.project.clone(),
                    ..Default::default()
                })?;
                match saved.disposition {
                    Disposition::Inserted => outcome.saved += 1,
                    Disposition::Deduplicated | Disposition::TopicUpdated => {
                        outcome.duplicates += 1;
                    },
                }
            }
            Ok(outcome)
        })();
        record_operation("passive_capture", start, status_of(&result));
        result
    }

    /// Lower bound of the dedupe window in storage timestamp form.
    fn dedupe_cutoff(&self) -> String {
        let window = chrono::Duration::minutes(self.config().dedupe_window_minutes);
        (chrono::Utc::now() - window).format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Inserts the session row if missing; never overwrites an existing one.
fn ensure_session(
    conn: &Connection,
    id: &str,
    project: Option<&str>,
    directory: Option<&str>,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO sessions (id, project, directory, started_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, project, directory, now],
    )
    .map_err(|e| Error::storage("ensure_session", e))?;
    Ok(())
}

/// Most recent live row for a `(topic_key, project, scope)` triple.
fn find_topic_row(
    conn: &Connection,
    topic_key: &str,
    project: Option<&str>,
    scope: &str,
) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM observations
         WHERE topic_key = ?1 AND ifnull(project, '') = ifnull(?2, '') AND scope = ?3
           AND deleted_at IS NULL
         ORDER BY updated_at DESC, created_at DESC
         LIMIT 1",
        params![topic_key, project, scope],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| Error::storage("find_topic_observation", e))
}

/// Most recent live row with identical normalized content, metadata, and a
/// creation time inside the dedupe window.
fn find_duplicate_row(
    conn: &Connection,
    hash: &str,
    project: Option<&str>,
    scope: &str,
    kind: &str,
    title: &str,
    cutoff: &str,
) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM observations
         WHERE normalized_hash = ?1 AND ifnull(project, '') = ifnull(?2, '')
           AND scope = ?3 AND type = ?4 AND title = ?5
           AND deleted_at IS NULL AND created_at >= ?6
         ORDER BY created_at DESC
         LIMIT 1",
        params![hash, project, scope, kind, title, cutoff],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| Error::storage("find_duplicate_observation", e))
}

fn status_of<T>(result: &Result<T>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scope;

    fn draft(session: &str, kind: &str, title: &str, content: &str) -> ObservationDraft {
        ObservationDraft {
            session_id: session.to_string(),
            kind: kind.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_observation_inserts_and_creates_session() {
        let store = Store::in_memory().unwrap();
        let saved = store
            .add_observation(draft("s1", "decision", "Use WAL", "WAL mode everywhere"))
            .unwrap();
        assert_eq!(saved.disposition, Disposition::Inserted);
        assert!(saved.id > 0);

        let obs = store.get_observation(saved.id).unwrap();
        assert_eq!(obs.session_id, "s1");
        assert_eq!(obs.revision_count, 1);
        assert_eq!(obs.duplicate_count, 1);
        assert_eq!(obs.scope, Scope::Project);
        assert!(obs.normalized_hash.is_some());
    }

    #[test]
    fn test_add_observation_validation() {
        let store = Store::in_memory().unwrap();
        assert!(matches!(
            store.add_observation(draft("", "decision", "t", "c")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.add_observation(draft("s1", "decision", "", "c")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.add_observation(draft("s1", "decision", "t", "   ")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_add_observation_redacts_private_regions() {
        let store = Store::in_memory().unwrap();
        let saved = store
            .add_observation(draft(
                "s1",
                "config",
                "API key",
                "the key is <private>sk-secret</private> today",
            ))
            .unwrap();
        let obs = store.get_observation(saved.id).unwrap();
        assert!(!obs.content.contains("sk-secret"));
        assert!(obs.content.contains("[REDACTED]"));
    }

    #[test]
    fn test_add_observation_truncates_content() {
        let config = crate::EngramConfig::default().with_content_max_bytes(64);
        let store = Store::in_memory_with(config).unwrap();
        let saved = store
            .add_observation(draft("s1", "manual", "long", &"z".repeat(500)))
            .unwrap();
        let obs = store.get_observation(saved.id).unwrap();
        assert!(obs.content.ends_with("… [truncated]"));
    }

    #[test]
    fn test_dedupe_window_absorbs_whitespace_equivalent_content() {
        let store = Store::in_memory().unwrap();
        let first = store
            .add_observation(draft(
                "s1",
                "bugfix",
                "Fixed tokenizer",
                "Normalized tokenizer panic on edge case",
            ))
            .unwrap();
        let second = store
            .add_observation(draft(
                "s1",
                "bugfix",
                "Fixed tokenizer",
                "normalized   tokenizer panic on EDGE case",
            ))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.disposition, Disposition::Deduplicated);

        let obs = store.get_observation(first.id).unwrap();
        assert_eq!(obs.duplicate_count, 2);
        assert_eq!(obs.revision_count, 1);
    }

    #[test]
    fn test_dedupe_respects_title_and_type() {
        let store = Store::in_memory().unwrap();
        let a = store
            .add_observation(draft("s1", "bugfix", "Fixed tokenizer", "same body"))
            .unwrap();
        let b = store
            .add_observation(draft("s1", "bugfix", "Other title", "same body"))
            .unwrap();
        let c = store
            .add_observation(draft("s1", "discovery", "Fixed tokenizer", "same body"))
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_topic_upsert_updates_in_place() {
        let store = Store::in_memory().unwrap();
        let first = store
            .add_observation(ObservationDraft {
                topic_key: Some("architecture auth model".to_string()),
                project: Some("engram".to_string()),
                ..draft(
                    "s1",
                    "architecture",
                    "Auth architecture",
                    "Use middleware for JWT validation.",
                )
            })
            .unwrap();
        let second = store
            .add_observation(ObservationDraft {
                topic_key: Some("ARCHITECTURE   AUTH  MODEL".to_string()),
                project: Some("engram".to_string()),
                ..draft(
                    "s1",
                    "architecture",
                    "Auth architecture",
                    "Move auth to gateway + middleware chain.",
                )
            })
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.disposition, Disposition::TopicUpdated);

        let obs = store.get_observation(first.id).unwrap();
        assert_eq!(obs.revision_count, 2);
        assert_eq!(obs.topic_key.as_deref(), Some("architecture-auth-model"));
        assert!(obs.content.contains("gateway"));
    }

    #[test]
    fn test_topic_upsert_preserves_created_at() {
        let store = Store::in_memory().unwrap();
        let first = store
            .add_observation(ObservationDraft {
                topic_key: Some("config/ci".to_string()),
                ..draft("s1", "config", "CI", "initial pipeline")
            })
            .unwrap();
        let created = store.get_observation(first.id).unwrap().created_at;

        store
            .add_observation(ObservationDraft {
                topic_key: Some("config/ci".to_string()),
                ..draft("s1", "config", "CI", "revised pipeline")
            })
            .unwrap();
        let obs = store.get_observation(first.id).unwrap();
        assert_eq!(obs.created_at, created);
    }

    #[test]
    fn test_topic_separated_by_project_and_scope() {
        let store = Store::in_memory().unwrap();
        let base = |project: &str, scope: &str| ObservationDraft {
            topic_key: Some("architecture/auth-model".to_string()),
            project: Some(project.to_string()),
            scope: Some(scope.to_string()),
            ..draft("s1", "architecture", "Auth", "scoped body")
        };
        let a = store.add_observation(base("engram", "project")).unwrap();
        let b = store.add_observation(base("engram", "personal")).unwrap();
        let c = store
            .add_observation(base("another-project", "project"))
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_ne!(b.id, c.id);
    }

    #[test]
    fn test_topic_takes_precedence_over_dedup() {
        let store = Store::in_memory().unwrap();
        let keyed = store
            .add_observation(ObservationDraft {
                topic_key: Some("pattern/errors".to_string()),
                ..draft("s1", "pattern", "Errors", "wrap errors with context")
            })
            .unwrap();
        // Identical content inside the window, but the topic key matches an
        // existing row, so the upsert branch must run.
        let again = store
            .add_observation(ObservationDraft {
                topic_key: Some("pattern/errors".to_string()),
                ..draft("s1", "pattern", "Errors", "wrap errors with context")
            })
            .unwrap();
        assert_eq!(again.disposition, Disposition::TopicUpdated);
        let obs = store.get_observation(keyed.id).unwrap();
        assert_eq!(obs.revision_count, 2);
        assert_eq!(obs.duplicate_count, 1);
    }

    #[test]
    fn test_update_observation() {
        let store = Store::in_memory().unwrap();
        let saved = store
            .add_observation(draft("s1", "manual", "Original", "original body"))
            .unwrap();

        store
            .update_observation(
                saved.id,
                &ObservationUpdate {
                    title: Some("Updated".to_string()),
                    content: Some("updated body".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let obs = store.get_observation(saved.id).unwrap();
        assert_eq!(obs.title, "Updated");
        assert_eq!(obs.content, "updated body");
        assert_eq!(obs.revision_count, 2);
        assert_eq!(obs.duplicate_count, 1);
        assert_eq!(obs.normalized_hash.as_deref(), Some(&*content_hash("updated body")));
    }

    #[test]
    fn test_update_rejects_empty_and_missing() {
        let store = Store::in_memory().unwrap();
        assert!(matches!(
            store.update_observation(1, &ObservationUpdate::default()),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.update_observation(0, &ObservationUpdate {
                title: Some("x".to_string()),
                ..Default::default()
            }),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.update_observation(999, &ObservationUpdate {
                title: Some("x".to_string()),
                ..Default::default()
            }),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_update_rejects_soft_deleted_rows() {
        let store = Store::in_memory().unwrap();
        let saved = store
            .add_observation(draft("s1", "manual", "Hidden", "soon hidden"))
            .unwrap();
        store.delete_observation(saved.id, false).unwrap();
        assert!(matches!(
            store.update_observation(saved.id, &ObservationUpdate {
                title: Some("x".to_string()),
                ..Default::default()
            }),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_soft_delete_is_idempotent() {
        let store = Store::in_memory().unwrap();
        let saved = store
            .add_observation(draft("s1", "manual", "Gone", "deletable body"))
            .unwrap();
        store.delete_observation(saved.id, false).unwrap();
        // Second soft delete of the same row is a silent no-op.
        store.delete_observation(saved.id, false).unwrap();
        assert!(matches!(
            store.get_observation(saved.id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_hard_delete_removes_row() {
        let store = Store::in_memory().unwrap();
        let saved = store
            .add_observation(draft("s1", "manual", "Gone", "hard delete body"))
            .unwrap();
        store.delete_observation(saved.id, true).unwrap();
        assert!(matches!(
            store.get_observation(saved.id),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.delete_observation(saved.id, true),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_end_session_unknown_id_is_noop() {
        let store = Store::in_memory().unwrap();
        store.end_session("missing", Some("summary")).unwrap();
    }

    #[test]
    fn test_end_session_stamps_summary() {
        let store = Store::in_memory().unwrap();
        store.create_session("s1", Some("engram"), None).unwrap();
        store.end_session("s1", Some("did things")).unwrap();
        let sessions = store.recent_sessions(None, 10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].session.ended_at.is_some());
        assert_eq!(sessions[0].session.summary.as_deref(), Some("did things"));
    }

    #[test]
    fn test_create_session_idempotent() {
        let store = Store::in_memory().unwrap();
        store.create_session("s1", Some("p"), Some("/tmp")).unwrap();
        store.create_session("s1", Some("other"), None).unwrap();
        let sessions = store.recent_sessions(None, 10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session.project.as_deref(), Some("p"));
    }

    #[test]
    fn test_add_prompt() {
        let store = Store::in_memory().unwrap();
        let id = store
            .add_prompt("s1", "please fix the <private>token abc</private> bug", None)
            .unwrap();
        assert!(id > 0);
        let prompts = store.recent_prompts(None, 10).unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(!prompts[0].content.contains("abc"));
    }

    #[test]
    fn test_passive_capture_counters() {
        let store = Store::in_memory().unwrap();
        let text = "## Key Learnings\n\
            - The busy timeout is the only synchronization primitive the store relies on\n\
            - tiny\n\
            - The busy timeout is the only synchronization primitive the store relies on\n";
        let outcome = store
            .passive_capture(&PassiveCaptureRequest {
                content: text.to_string(),
                source: Some("stop-hook".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(outcome.extracted, 3);
        assert_eq!(outcome.saved, 1);
        assert_eq!(outcome.duplicates, 1);

        let obs = store.recent_observations(None, None, Some(10)).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].kind, "passive");
        assert_eq!(obs[0].session_id, PASSIVE_SESSION_ID);
        assert_eq!(obs[0].tool_name.as_deref(), Some("stop-hook"));
        assert_eq!(obs[0].duplicate_count, 2);
    }

    #[test]
    fn test_passive_capture_without_section() {
        let store = Store::in_memory().unwrap();
        let outcome = store
            .passive_capture(&PassiveCaptureRequest {
                content: "no learnings here".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome, PassiveCaptureOutcome::default());
    }
}
