//! Row conversion utilities for the store.
//!
//! The shared SELECT column list and the row-to-model mapping live here so
//! the write and read engines cannot drift in how they read a row back.

use crate::models::{Observation, Scope, Session, UserPrompt};
use rusqlite::Row;

/// Canonical observation column list, in the order the mappers expect.
pub const OBSERVATION_COLUMNS: &str = "id, session_id, type, title, content, tool_name, project, \
     scope, topic_key, normalized_hash, revision_count, duplicate_count, \
     last_seen_at, created_at, updated_at, deleted_at";

/// [`OBSERVATION_COLUMNS`] with each column qualified by a table alias, for
/// joins where the FTS shadow table shares column names.
pub fn qualified_observation_columns(alias: &str) -> String {
    OBSERVATION_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Maps a row selected with [`OBSERVATION_COLUMNS`] to an [`Observation`].
pub fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Observation> {
    let scope: String = row.get(7)?;
    Ok(Observation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        tool_name: row.get(5)?,
        project: row.get(6)?,
        scope: Scope::parse(&scope),
        topic_key: row.get(8)?,
        normalized_hash: row.get(9)?,
        revision_count: row.get(10)?,
        duplicate_count: row.get(11)?,
        last_seen_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        deleted_at: row.get(15)?,
    })
}

/// Canonical session column list.
pub const SESSION_COLUMNS: &str = "id, project, directory, started_at, ended_at, summary";

/// Maps a row selected with [`SESSION_COLUMNS`] to a [`Session`].
pub fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        project: row.get(1)?,
        directory: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        summary: row.get(5)?,
    })
}

/// Canonical user-prompt column list.
pub const PROMPT_COLUMNS: &str = "id, session_id, content, project, created_at";

/// Maps a row selected with [`PROMPT_COLUMNS`] to a [`UserPrompt`].
pub fn prompt_from_row(row: &Row<'_>) -> rusqlite::Result<UserPrompt> {
    Ok(UserPrompt {
        id: row.get(0)?,
        session_id: row.get(1)?,
        content: row.get(2)?,
        project: row.get(3)?,
        created_at: row.get(4)?,
    })
}
