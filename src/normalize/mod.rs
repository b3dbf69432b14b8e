//! Canonicalization helpers for the write and read paths.
//!
//! Pure functions, no I/O. Scope coercion, topic-key normalization,
//! whitespace-insensitive content hashing for deduplication, FTS5 query
//! sanitization, and byte-capped content truncation all live here so the
//! store itself never re-implements a text rule.

use sha2::{Digest, Sha256};

/// Maximum stored length of a normalized topic key, in bytes.
pub const TOPIC_KEY_MAX_BYTES: usize = 120;

/// Maximum length of a generated topic segment, in bytes.
pub const TOPIC_SEGMENT_MAX_BYTES: usize = 100;

/// Marker appended to content cut at the configured byte cap.
pub const TRUNCATION_MARKER: &str = "… [truncated]";

/// Coerces a scope string to one of the two valid values.
///
/// Exactly `personal` (after lowercasing and trimming) stays `personal`;
/// everything else, including empty input, becomes `project`.
///
/// # Examples
///
/// ```rust
/// use engram::normalize::normalize_scope;
///
/// assert_eq!(normalize_scope(" Personal "), "personal");
/// assert_eq!(normalize_scope("team"), "project");
/// assert_eq!(normalize_scope(""), "project");
/// ```
#[must_use]
pub fn normalize_scope(scope: &str) -> &'static str {
    if scope.trim().eq_ignore_ascii_case("personal") {
        "personal"
    } else {
        "project"
    }
}

/// Normalizes a topic key: lowercased, trimmed, internal whitespace runs
/// collapsed to a single `-`, capped at [`TOPIC_KEY_MAX_BYTES`].
///
/// Returns `None` when the normalized form is empty, so callers store NULL
/// rather than an empty string.
///
/// # Examples
///
/// ```rust
/// use engram::normalize::normalize_topic_key;
///
/// assert_eq!(
///     normalize_topic_key("ARCHITECTURE   AUTH  MODEL"),
///     Some("architecture-auth-model".to_string())
/// );
/// assert_eq!(normalize_topic_key("   "), None);
/// ```
#[must_use]
pub fn normalize_topic_key(raw: &str) -> Option<String> {
    let joined = raw
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    let capped = truncate_at_char_boundary(&joined, TOPIC_KEY_MAX_BYTES);
    if capped.is_empty() {
        None
    } else {
        Some(capped.to_string())
    }
}

/// Normalizes a topic segment: lowercased, runs of characters outside
/// `[a-z0-9]` become separators, joined with `-`, capped at
/// [`TOPIC_SEGMENT_MAX_BYTES`].
///
/// # Examples
///
/// ```rust
/// use engram::normalize::normalize_topic_segment;
///
/// assert_eq!(normalize_topic_segment("  Auth Model  "), "auth-model");
/// assert_eq!(normalize_topic_segment("Fix: tokenizer / panic!"), "fix-tokenizer-panic");
/// ```
#[must_use]
pub fn normalize_topic_segment(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let spaced: String = lowered
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("-");
    truncate_at_char_boundary(&joined, TOPIC_SEGMENT_MAX_BYTES).to_string()
}

/// Canonical topic families and the observation types that map onto them.
const CANONICAL_FAMILIES: &[(&str, &str)] = &[
    ("architecture", "architecture"),
    ("bug", "bug"),
    ("bugfix", "bug"),
    ("decision", "decision"),
    ("pattern", "pattern"),
    ("config", "config"),
    ("discovery", "discovery"),
    ("learning", "learning"),
    ("session", "session"),
    ("session_summary", "session"),
];

/// Substring cues used when the type itself does not name a family.
const FAMILY_CUES: &[(&str, &[&str])] = &[
    (
        "bug",
        &[
            "bug",
            "fix",
            "panic",
            "error",
            "crash",
            "regression",
            "incident",
            "hotfix",
        ],
    ),
    (
        "architecture",
        &[
            "architecture",
            "design",
            "adr",
            "boundary",
            "hexagonal",
            "refactor",
        ],
    ),
    (
        "decision",
        &["decision", "tradeoff", "chose", "choose", "decide"],
    ),
    ("pattern", &["pattern", "convention", "naming", "guideline"]),
    (
        "config",
        &["config", "setup", "environment", "env", "docker", "pipeline"],
    ),
    (
        "discovery",
        &["investigate", "found", "root cause", "discovery"],
    ),
    ("learning", &["learned", "learning"]),
];

/// Suggests a stable `family/segment` topic key for an observation.
///
/// The family comes from the observation type when it names a canonical
/// family, otherwise from substring cues in the title and content, otherwise
/// from the normalized type itself, falling back to `topic`. The segment
/// comes from the title, then from the first eight tokens of the content,
/// falling back to `general`. A segment that repeats the family as a prefix
/// has that prefix stripped.
///
/// Deterministic: equal inputs always produce equal output.
///
/// # Examples
///
/// ```rust
/// use engram::normalize::suggest_topic_key;
///
/// assert_eq!(
///     suggest_topic_key("Architecture", "  Auth Model  ", "ignored"),
///     "architecture/auth-model"
/// );
/// assert_eq!(
///     suggest_topic_key("manual", "", "Fix regression in auth login flow"),
///     "bug/fix-regression-in-auth-login-flow"
/// );
/// ```
#[must_use]
pub fn suggest_topic_key(kind: &str, title: &str, content: &str) -> String {
    let kind_norm = kind.trim().to_lowercase();

    let family = CANONICAL_FAMILIES
        .iter()
        .find(|(k, _)| *k == kind_norm)
        .map(|(_, family)| (*family).to_string())
        .or_else(|| {
            let haystack = format!("{} {}", title.to_lowercase(), content.to_lowercase());
            FAMILY_CUES
                .iter()
                .find(|(_, cues)| cues.iter().any(|cue| haystack.contains(cue)))
                .map(|(family, _)| (*family).to_string())
        })
        .unwrap_or_else(|| {
            let fallback = normalize_topic_segment(&kind_norm);
            if fallback.is_empty() || fallback == "manual" {
                "topic".to_string()
            } else {
                fallback
            }
        });

    let mut segment = normalize_topic_segment(title);
    if segment.is_empty() {
        let head: String = content.split_whitespace().take(8).collect::<Vec<_>>().join(" ");
        segment = normalize_topic_segment(&head);
    }
    if segment.is_empty() {
        segment = "general".to_string();
    }
    if let Some(stripped) = segment.strip_prefix(&format!("{family}-")) {
        if !stripped.is_empty() {
            segment = stripped.to_string();
        }
    }

    format!("{family}/{segment}")
}

/// Computes the whitespace-insensitive content hash used for deduplication.
///
/// The content is lowercased and whitespace runs collapse to single spaces
/// before hashing, so reformatting does not defeat the dedupe window.
///
/// # Examples
///
/// ```rust
/// use engram::normalize::content_hash;
///
/// let a = content_hash("Normalized tokenizer panic on edge case");
/// let b = content_hash("normalized   tokenizer panic on EDGE case");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
#[must_use]
pub fn content_hash(content: &str) -> String {
    let normalized = content
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sanitizes free text into a valid FTS5 `MATCH` expression.
///
/// Each whitespace-separated token has every double quote removed and is
/// wrapped in double quotes, turning operators (`AND`, `*`, `:`, parens)
/// into literal phrases. Tokens left empty are dropped. An empty return
/// value means the query has no searchable terms.
///
/// # Examples
///
/// ```rust
/// use engram::normalize::sanitize_fts_query;
///
/// assert_eq!(sanitize_fts_query("auth AND token"), "\"auth\" \"AND\" \"token\"");
/// assert_eq!(sanitize_fts_query("prefix*"), "\"prefix*\"");
/// assert_eq!(sanitize_fts_query("\"quoted\""), "\"quoted\"");
/// ```
#[must_use]
pub fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .filter_map(|token| {
            let bare: String = token.chars().filter(|c| *c != '"').collect();
            if bare.is_empty() {
                None
            } else {
                Some(format!("\"{bare}\""))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncates content to `max_bytes`, appending [`TRUNCATION_MARKER`] when
/// anything was cut.
///
/// The cut lands on a char boundary at or below the cap, and trailing
/// whitespace before the marker is trimmed.
///
/// # Examples
///
/// ```rust
/// use engram::normalize::truncate_content;
///
/// assert_eq!(truncate_content("short", 2_000), "short");
/// assert!(truncate_content(&"x".repeat(3_000), 2_000).ends_with("… [truncated]"));
/// ```
#[must_use]
pub fn truncate_content(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let head = truncate_at_char_boundary(content, max_bytes);
    format!("{}{TRUNCATION_MARKER}", head.trim_end())
}

/// Returns the longest prefix of `s` that fits in `max_bytes` without
/// splitting a character.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("personal", "personal"; "exact")]
    #[test_case("PERSONAL", "personal"; "uppercase")]
    #[test_case("  personal  ", "personal"; "padded")]
    #[test_case("project", "project"; "project stays")]
    #[test_case("shared", "project"; "unknown coerced")]
    #[test_case("", "project"; "empty coerced")]
    #[test_case("   ", "project"; "whitespace coerced")]
    fn test_normalize_scope(input: &str, expected: &str) {
        assert_eq!(normalize_scope(input), expected);
    }

    #[test]
    fn test_normalize_topic_key_collapses_whitespace() {
        assert_eq!(
            normalize_topic_key("ARCHITECTURE   AUTH  MODEL"),
            Some("architecture-auth-model".to_string())
        );
        assert_eq!(
            normalize_topic_key("architecture auth model"),
            Some("architecture-auth-model".to_string())
        );
    }

    #[test]
    fn test_normalize_topic_key_empty_is_none() {
        assert_eq!(normalize_topic_key(""), None);
        assert_eq!(normalize_topic_key("   \t\n "), None);
    }

    #[test]
    fn test_normalize_topic_key_caps_length() {
        let long = "x".repeat(500);
        let key = normalize_topic_key(&long).unwrap();
        assert!(key.len() <= TOPIC_KEY_MAX_BYTES);
    }

    #[test]
    fn test_normalize_topic_key_idempotent() {
        let once = normalize_topic_key("Architecture  Auth Model").unwrap();
        let twice = normalize_topic_key(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_topic_segment() {
        assert_eq!(normalize_topic_segment("Auth Model"), "auth-model");
        assert_eq!(
            normalize_topic_segment("Fix: tokenizer / panic!"),
            "fix-tokenizer-panic"
        );
        assert_eq!(normalize_topic_segment("___"), "");
    }

    #[test]
    fn test_suggest_topic_key_family_from_type() {
        assert_eq!(
            suggest_topic_key("Architecture", "  Auth Model  ", "ignored"),
            "architecture/auth-model"
        );
        assert_eq!(
            suggest_topic_key("bugfix", "Tokenizer panic", ""),
            "bug/tokenizer-panic"
        );
    }

    #[test]
    fn test_suggest_topic_key_family_from_cues() {
        assert_eq!(
            suggest_topic_key("manual", "", "Fix regression in auth login flow"),
            "bug/fix-regression-in-auth-login-flow"
        );
        assert_eq!(
            suggest_topic_key("note", "We chose gRPC over REST", ""),
            "decision/we-chose-grpc-over-rest"
        );
    }

    #[test]
    fn test_suggest_topic_key_family_from_type_fallback() {
        assert_eq!(
            suggest_topic_key("tool_use", "Ran formatter", ""),
            "tool-use/ran-formatter"
        );
    }

    #[test]
    fn test_suggest_topic_key_default_family_and_segment() {
        assert_eq!(suggest_topic_key("manual", "", ""), "topic/general");
    }

    #[test]
    fn test_suggest_topic_key_strips_family_prefix() {
        assert_eq!(
            suggest_topic_key("decision", "Decision record for storage", ""),
            "decision/record-for-storage"
        );
    }

    #[test]
    fn test_suggest_topic_key_segment_from_content_head() {
        let key = suggest_topic_key(
            "config",
            "",
            "docker compose profile for local development now uses one network only",
        );
        assert_eq!(key, "config/docker-compose-profile-for-local-development-now-uses");
    }

    #[test]
    fn test_content_hash_whitespace_and_case_insensitive() {
        let a = content_hash("Normalized tokenizer panic on edge case");
        let b = content_hash("normalized   tokenizer\npanic on EDGE case");
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_hash_distinct_content() {
        assert_ne!(content_hash("alpha"), content_hash("beta"));
    }

    #[test]
    fn test_sanitize_fts_query_quotes_every_token() {
        assert_eq!(
            sanitize_fts_query("auth AND token"),
            "\"auth\" \"AND\" \"token\""
        );
        assert_eq!(sanitize_fts_query("col:value (x)"), "\"col:value\" \"(x)\"");
    }

    #[test]
    fn test_sanitize_fts_query_strips_embedded_quotes() {
        assert_eq!(sanitize_fts_query("a\"b"), "\"ab\"");
        assert_eq!(sanitize_fts_query("\"\""), "");
        assert_eq!(sanitize_fts_query("   "), "");
    }

    #[test]
    fn test_truncate_content_below_cap_is_identity() {
        assert_eq!(truncate_content("short text", 2_000), "short text");
    }

    #[test]
    fn test_truncate_content_appends_marker() {
        let long = "a".repeat(2_500);
        let cut = truncate_content(&long, 2_000);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert!(cut.len() < long.len());
    }

    #[test]
    fn test_truncate_content_respects_char_boundary() {
        // Multi-byte characters near the cap must not be split.
        let long = "é".repeat(1_500);
        let cut = truncate_content(&long, 2_001);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert!(cut.is_char_boundary(cut.len() - TRUNCATION_MARKER.len()));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Hash output is always 64 hex characters.
            #[test]
            fn prop_content_hash_length(content in any::<String>()) {
                let hash = content_hash(&content);
                prop_assert_eq!(hash.len(), 64);
                prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
            }

            /// Topic-key normalization is idempotent.
            #[test]
            fn prop_topic_key_idempotent(raw in ".{0,200}") {
                if let Some(once) = normalize_topic_key(&raw) {
                    prop_assert_eq!(normalize_topic_key(&once), Some(once));
                }
            }

            /// Suggested keys are deterministic and well-formed.
            #[test]
            fn prop_suggest_topic_key_deterministic(
                kind in "[a-zA-Z_]{0,20}",
                title in ".{0,80}",
                content in ".{0,200}",
            ) {
                let a = suggest_topic_key(&kind, &title, &content);
                let b = suggest_topic_key(&kind, &title, &content);
                prop_assert_eq!(&a, &b);
                prop_assert!(a.contains('/'));
            }

            /// Sanitized queries never contain a bare token.
            #[test]
            fn prop_sanitize_wraps_all_tokens(query in ".{0,200}") {
                let sanitized = sanitize_fts_query(&query);
                for part in sanitized.split_whitespace() {
                    prop_assert!(part.starts_with('"') && part.ends_with('"'));
                    prop_assert!(!part[1..part.len() - 1].contains('"'));
                }
            }

            /// Truncation never exceeds the cap by more than the marker.
            #[test]
            fn prop_truncate_bounded(content in ".{0,4000}", cap in 8usize..3000) {
                let out = truncate_content(&content, cap);
                prop_assert!(out.len() <= cap + TRUNCATION_MARKER.len());
            }
        }
    }
}
