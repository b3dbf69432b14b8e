//! # Engram
//!
//! A persistent memory engine for AI coding agents.
//!
//! Engram stores structured observations from coding sessions in SQLite,
//! keeps an FTS5 index consistent with the base tables, and shares memory
//! between checkouts through content-addressed gzipped chunk files.
//!
//! ## Features
//!
//! - Topic-keyed upsert: the same `family/segment` key updates one row in place
//! - Time-windowed deduplication of whitespace-equivalent content
//! - `<private>…</private>` redaction before anything touches disk
//! - Ranked full-text recall with query sanitization
//! - Forward-only migration of legacy observation tables
//! - Git-syncable chunk format with an idempotent import protocol
//!
//! ## Example
//!
//! ```rust,ignore
//! use engram::config::EngramConfig;
//! use engram::models::ObservationDraft;
//! use engram::store::Store;
//!
//! let store = Store::open(&EngramConfig::resolve()?)?;
//! let saved = store.add_observation(ObservationDraft {
//!     session_id: "s1".to_string(),
//!     kind: "decision".to_string(),
//!     title: "Use SQLite WAL mode".to_string(),
//!     content: "WAL allows concurrent readers with one writer.".to_string(),
//!     ..Default::default()
//! })?;
//! println!("observation {}", saved.id);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod capture;
pub mod commands;
pub mod config;
pub mod models;
pub mod normalize;
pub mod security;
pub mod store;
pub mod sync;

// Re-exports for convenience
pub use config::EngramConfig;
pub use models::{
    Observation, ObservationDraft, ObservationUpdate, Scope, Session, SessionListing, StoreStats,
    Timeline, UserPrompt,
};
pub use store::Store;
pub use sync::{ChunkManifest, Snapshot, SyncEngine};

/// Error type for engram operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Validation` | Missing required fields, empty updates, non-positive limits |
/// | `NotFound` | No row matches the requested id, or the row is soft-deleted |
/// | `Storage` | SQLite failures, I/O errors, chunk/manifest corruption |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Required parameters are missing (e.g. empty `session_id` or `content`)
    /// - An update names no field to change
    /// - Numeric ranges are invalid (non-positive `before`/`after`/`limit`)
    #[error("invalid input: {0}")]
    Validation(String),

    /// The requested record does not exist or is hidden.
    ///
    /// Raised when:
    /// - No observation row matches the requested id
    /// - The row exists but is soft-deleted and the operation needs a live row
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements or transactions fail
    /// - Chunk or manifest files cannot be read or written
    /// - The legacy migration cannot complete
    #[error("operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Shorthand for a [`Error::Storage`] with the given operation name.
    pub(crate) fn storage(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for engram operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current UTC time in the storage contract's
/// `YYYY-MM-DD HH:MM:SS` form.
///
/// Every timestamp persisted by the store goes through this single helper
/// so the wire format cannot drift between call sites.
///
/// # Examples
///
/// ```rust
/// let ts = engram::now_utc();
/// assert_eq!(ts.len(), 19);
/// assert_eq!(&ts[4..5], "-");
/// ```
#[must_use]
pub fn now_utc() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// `strftime` pattern for all persisted timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
