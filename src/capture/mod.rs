//! Passive-capture extraction.
//!
//! Free text handed to passive capture is scanned for a "learnings" section;
//! each bulleted or numbered item under it becomes a candidate observation.
//! The write side of passive capture lives on the store; this module is the
//! pure extraction step.

/// A single item lifted out of a learnings section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearningItem {
    /// The item text with its list marker stripped.
    pub text: String,
}

impl LearningItem {
    /// Derives a display title from the item: its first line, capped at 80
    /// characters.
    #[must_use]
    pub fn title(&self) -> String {
        let first_line = self.text.lines().next().unwrap_or_default().trim();
        let mut title: String = first_line.chars().take(80).collect();
        if title.is_empty() {
            title = "Untitled learning".to_string();
        }
        title
    }
}

/// Extracts bulleted and numbered items from the first "learnings" section
/// of `content`.
///
/// A section starts at any line whose lowercase text contains `learnings`
/// (for example `## Key Learnings` or `Learnings:`). From there, lines that
/// begin with a list marker (`-`, `*`, `•`, or `1.`/`1)`) are collected
/// with their markers stripped; the scan stops at the next heading. Blank
/// and non-list lines inside the section are skipped.
///
/// Returns an empty vector when no section is present.
///
/// # Examples
///
/// ```rust
/// use engram::capture::extract_learnings;
///
/// let items = extract_learnings("## Key Learnings\n- WAL mode allows concurrent readers\n");
/// assert_eq!(items.len(), 1);
/// assert_eq!(items[0].text, "WAL mode allows concurrent readers");
/// ```
#[must_use]
pub fn extract_learnings(content: &str) -> Vec<LearningItem> {
    let mut items = Vec::new();
    let mut in_section = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if !in_section {
            if trimmed.to_lowercase().contains("learnings") {
                in_section = true;
            }
            continue;
        }
        if trimmed.starts_with('#') {
            break;
        }
        if let Some(item) = strip_list_marker(trimmed) {
            if !item.is_empty() {
                items.push(LearningItem {
                    text: item.to_string(),
                });
            }
        }
    }

    items
}

/// Strips a leading bullet (`-`, `*`, `•`) or number (`1.`, `12)`) marker.
///
/// Returns `None` when the line is not a list item.
fn strip_list_marker(line: &str) -> Option<&str> {
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        return Some(rest.trim());
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return Some(rest.trim());
        }
    }

    None
}
