//! Private-content redaction.
//!
//! Any text entering the write engine passes through [`redact`] first, so
//! `<private>…</private>` regions never reach the database, the FTS index,
//! snapshot exports, or sync chunks.
// Allow expect() on the static regex pattern - it is guaranteed to compile
#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use regex::Regex;

/// Replacement token for redacted regions.
///
/// External contract: callers and downstream tooling match on this literal.
pub const REDACTED_TOKEN: &str = "[REDACTED]";

/// Matches `<private>…</private>` case-insensitively and across line breaks.
static PRIVATE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<private>.*?</private>").expect("hard-coded pattern compiles")
});

/// Removes `<private>…</private>` regions from the given text.
///
/// Each region is replaced with [`REDACTED_TOKEN`]; the result is trimmed of
/// leading and trailing whitespace. Text without the tag passes through
/// unchanged apart from the trim.
///
/// # Examples
///
/// ```rust
/// use engram::security::redact;
///
/// assert_eq!(
///     redact("token is <private>sk-12345</private> here"),
///     "token is [REDACTED] here"
/// );
/// assert_eq!(redact("  plain text  "), "plain text");
/// ```
#[must_use]
pub fn redact(text: &str) -> String {
    PRIVATE_TAG
        .replace_all(text, REDACTED_TOKEN)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_single_region() {
        let out = redact("before <private>secret</private> after");
        assert_eq!(out, "before [REDACTED] after");
    }

    #[test]
    fn test_redact_multiple_regions() {
        let out = redact("<private>a</private> mid <private>b</private>");
        assert_eq!(out, "[REDACTED] mid [REDACTED]");
        assert!(!out.contains('a'));
    }

    #[test]
    fn test_redact_case_insensitive() {
        let out = redact("x <PRIVATE>secret</Private> y");
        assert_eq!(out, "x [REDACTED] y");
    }

    #[test]
    fn test_redact_across_lines() {
        let out = redact("keep\n<private>line one\nline two</private>\nkeep");
        assert!(!out.contains("line one"));
        assert!(out.contains("[REDACTED]"));
        assert!(out.starts_with("keep"));
        assert!(out.ends_with("keep"));
    }

    #[test]
    fn test_redact_no_tag_is_identity_plus_trim() {
        assert_eq!(redact("  nothing hidden  "), "nothing hidden");
        assert_eq!(redact(""), "");
    }

    #[test]
    fn test_redact_unclosed_tag_left_alone() {
        // An unmatched opener is not a region; it stays verbatim.
        let out = redact("text <private>dangling");
        assert_eq!(out, "text <private>dangling");
    }

    #[test]
    fn test_redact_non_greedy() {
        let out = redact("<private>a</private> visible <private>b</private>");
        assert!(out.contains("visible"));
    }
}
