//! Domain models for the memory store.
//!
//! Plain data structs mirroring the relational schema, plus the request
//! shapes (`ObservationDraft`, `ObservationUpdate`) and read-side views
//! (`Timeline`, `SessionListing`, `StoreStats`) the engines exchange with
//! their callers.

use serde::{Deserialize, Serialize};

/// Visibility scope of an observation.
///
/// `Project` observations are shared with teammates through sync; `Personal`
/// ones stay local by convention. Unknown input coerces to `Project`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Shared with the project (default).
    #[default]
    Project,
    /// Local to this user.
    Personal,
}

impl Scope {
    /// Returns the scope as its stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Personal => "personal",
        }
    }

    /// Parses a stored or user-supplied scope string, coercing unknown
    /// values to [`Scope::Project`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if crate::normalize::normalize_scope(s) == "personal" {
            Self::Personal
        } else {
            Self::Project
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent invocation, grouping the observations made during it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Caller-supplied opaque identifier.
    pub id: String,
    /// Project tag, if known at session start.
    pub project: Option<String>,
    /// Working directory the agent ran in.
    pub directory: Option<String>,
    /// When the session was first referenced.
    pub started_at: String,
    /// When the session was explicitly ended.
    pub ended_at: Option<String>,
    /// Optional summary stamped at session end.
    pub summary: Option<String>,
}

/// One atomic unit of recalled knowledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Core-assigned monotonic id.
    pub id: i64,
    /// Owning session.
    pub session_id: String,
    /// Free-form short type (decision, bugfix, pattern, …).
    #[serde(rename = "type")]
    pub kind: String,
    /// Redacted title.
    pub title: String,
    /// Redacted, byte-capped content.
    pub content: String,
    /// Originating tool or source label.
    pub tool_name: Option<String>,
    /// Project tag.
    pub project: Option<String>,
    /// Visibility scope.
    pub scope: Scope,
    /// Normalized stable identifier for upsert-in-place.
    pub topic_key: Option<String>,
    /// Whitespace-insensitive SHA-256 of the content; internal.
    pub normalized_hash: Option<String>,
    /// Starts at 1; bumps on topic upsert and explicit update.
    pub revision_count: i64,
    /// Starts at 1; bumps when the dedupe window absorbs an insert.
    pub duplicate_count: i64,
    /// Last time this row absorbed a write.
    pub last_seen_at: Option<String>,
    /// Creation time; never rewritten.
    pub created_at: String,
    /// Last modification time.
    pub updated_at: Option<String>,
    /// Soft-delete marker; a non-null value hides the row from all reads.
    pub deleted_at: Option<String>,
}

/// Verbatim user intent captured by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrompt {
    /// Core-assigned monotonic id.
    pub id: i64,
    /// Owning session.
    pub session_id: String,
    /// Redacted, byte-capped prompt text.
    pub content: String,
    /// Project tag.
    pub project: Option<String>,
    /// Capture time.
    pub created_at: String,
}

/// Request shape for [`crate::store::Store::add_observation`].
#[derive(Debug, Clone, Default)]
pub struct ObservationDraft {
    /// Owning session; created on demand.
    pub session_id: String,
    /// Observation type.
    pub kind: String,
    /// Title text (pre-redaction).
    pub title: String,
    /// Content body (pre-redaction, pre-truncation).
    pub content: String,
    /// Originating tool or source label.
    pub tool_name: Option<String>,
    /// Project tag.
    pub project: Option<String>,
    /// Raw scope string; coerced by the normalizer.
    pub scope: Option<String>,
    /// Raw topic key; normalized before storage.
    pub topic_key: Option<String>,
}

/// Request shape for [`crate::store::Store::update_observation`].
///
/// Every field is optional, but at least one must be set.
#[derive(Debug, Clone, Default)]
pub struct ObservationUpdate {
    /// New observation type.
    pub kind: Option<String>,
    /// New title (redacted before storage).
    pub title: Option<String>,
    /// New content (redacted and truncated before storage).
    pub content: Option<String>,
    /// New project tag.
    pub project: Option<String>,
    /// New raw scope string.
    pub scope: Option<String>,
    /// New raw topic key.
    pub topic_key: Option<String>,
}

impl ObservationUpdate {
    /// Returns true when no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.title.is_none()
            && self.content.is_none()
            && self.project.is_none()
            && self.scope.is_none()
            && self.topic_key.is_none()
    }
}

/// How a write was absorbed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A new row was inserted.
    Inserted,
    /// An existing topic-keyed row was updated in place.
    TopicUpdated,
    /// The dedupe window absorbed the write into an existing row.
    Deduplicated,
}

/// Result of a single observation write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedObservation {
    /// Id of the row the write landed on.
    pub id: i64,
    /// How the write was absorbed.
    pub disposition: Disposition,
}

/// Counters returned by passive capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassiveCaptureOutcome {
    /// Items found in the learnings section.
    pub extracted: usize,
    /// Items stored as new observations.
    pub saved: usize,
    /// Items absorbed by deduplication.
    pub duplicates: usize,
}

/// A session row joined with its live observation count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionListing {
    /// The session row.
    #[serde(flatten)]
    pub session: Session,
    /// Number of non-deleted observations in the session.
    pub observation_count: i64,
}

/// A search hit with its FTS rank (lower is better).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// The matching observation.
    #[serde(flatten)]
    pub observation: Observation,
    /// FTS5 rank; ascending order is best-first.
    pub rank: f64,
}

/// Chronological neighborhood of a focus observation within its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    /// The observation the window centers on.
    pub focus: Observation,
    /// Older observations, chronological order.
    pub before: Vec<Observation>,
    /// Newer observations, chronological order.
    pub after: Vec<Observation>,
    /// The owning session, when it still exists.
    pub session: Option<Session>,
    /// Total non-deleted observations in the session.
    pub total_in_session: i64,
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Total sessions.
    pub total_sessions: i64,
    /// Total non-deleted observations.
    pub total_observations: i64,
    /// Total user prompts.
    pub total_prompts: i64,
    /// Sorted distinct non-null projects among non-deleted observations.
    pub projects: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse_coercion() {
        assert_eq!(Scope::parse("personal"), Scope::Personal);
        assert_eq!(Scope::parse(" PERSONAL "), Scope::Personal);
        assert_eq!(Scope::parse("project"), Scope::Project);
        assert_eq!(Scope::parse("global"), Scope::Project);
        assert_eq!(Scope::parse(""), Scope::Project);
    }

    #[test]
    fn test_scope_roundtrip() {
        for scope in [Scope::Project, Scope::Personal] {
            assert_eq!(Scope::parse(scope.as_str()), scope);
        }
    }

    #[test]
    fn test_update_is_empty() {
        assert!(ObservationUpdate::default().is_empty());
        let update = ObservationUpdate {
            title: Some("new".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_observation_serde_type_field_name() {
        let obs = Observation {
            id: 1,
            session_id: "s1".to_string(),
            kind: "decision".to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
            tool_name: None,
            project: None,
            scope: Scope::Project,
            topic_key: None,
            normalized_hash: None,
            revision_count: 1,
            duplicate_count: 1,
            last_seen_at: None,
            created_at: "2026-01-01 00:00:00".to_string(),
            updated_at: None,
            deleted_at: None,
        };
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["type"], "decision");
        assert_eq!(json["scope"], "project");
    }
}
