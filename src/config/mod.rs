//! Configuration management.
//!
//! One explicit [`EngramConfig`] struct resolved at process start and passed
//! to the store; there are no hidden singletons. The only environment
//! override the core honors is `ENGRAM_DATA_DIR`.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "ENGRAM_DATA_DIR";

/// Filename of the SQLite database inside the data directory.
pub const DB_FILENAME: &str = "engram.db";

/// Main configuration for engram.
#[derive(Debug, Clone)]
pub struct EngramConfig {
    /// Directory holding the database file.
    pub data_dir: PathBuf,
    /// Byte cap applied to observation and prompt content.
    pub content_max_bytes: usize,
    /// Row cap for "recent" listings and the formatted context block.
    pub context_window: usize,
    /// Hard cap on search result counts.
    pub search_limit_cap: usize,
    /// Minutes during which identical content merges into an existing row.
    pub dedupe_window_minutes: i64,
    /// Minimum byte length of a passive-capture item worth storing.
    pub passive_min_len: usize,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".engram"),
            content_max_bytes: 2_000,
            context_window: 20,
            search_limit_cap: 20,
            dedupe_window_minutes: 15,
            passive_min_len: 40,
        }
    }
}

impl EngramConfig {
    /// Resolves the process-wide configuration.
    ///
    /// The data directory is taken from `ENGRAM_DATA_DIR` when set and
    /// non-empty, otherwise `~/.engram`; a relative fallback is used only
    /// when no home directory can be determined.
    #[must_use]
    pub fn resolve() -> Self {
        let data_dir = std::env::var(DATA_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map_or_else(Self::default_data_dir, PathBuf::from);
        Self {
            data_dir,
            ..Self::default()
        }
    }

    /// Returns `~/.engram`, falling back to a relative `.engram`.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        directories::BaseDirs::new().map_or_else(
            || PathBuf::from(".engram"),
            |dirs| dirs.home_dir().join(".engram"),
        )
    }

    /// Path of the SQLite database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILENAME)
    }

    /// Overrides the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Overrides the content byte cap.
    #[must_use]
    pub const fn with_content_max_bytes(mut self, max: usize) -> Self {
        self.content_max_bytes = max;
        self
    }

    /// Overrides the context window row cap.
    #[must_use]
    pub const fn with_context_window(mut self, rows: usize) -> Self {
        self.context_window = rows;
        self
    }

    /// Overrides the dedupe window length.
    #[must_use]
    pub const fn with_dedupe_window_minutes(mut self, minutes: i64) -> Self {
        self.dedupe_window_minutes = minutes;
        self
    }

    /// Overrides the passive-capture minimum item length.
    #[must_use]
    pub const fn with_passive_min_len(mut self, bytes: usize) -> Self {
        self.passive_min_len = bytes;
        self
    }

    /// Clamps a caller-requested search limit to the configured hard cap.
    #[must_use]
    pub fn clamp_search_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(10)
            .clamp(1, self.search_limit_cap.max(1))
    }
}

/// Returns true when `path` exists and is a directory.
#[must_use]
pub fn is_usable_dir(path: &Path) -> bool {
    path.is_dir()
}
