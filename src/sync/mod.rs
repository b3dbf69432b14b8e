//! Git-syncable chunk format and the snapshot wire types.
//!
//! Two serialization formats coexist. The whole-database snapshot is one
//! pretty-printed JSON object used by `export`/`import`. Sync chunks are
//! append-only, content-addressed, gzipped newline-delimited records under
//! `<work>/.engram/chunks/`, listed in `<work>/.engram/manifest.json`; the
//! manifest is the only file that receives diffs in version control.
//! Importing the same chunk twice is a no-op because applied chunk ids are
//! recorded in the database.

use crate::models::{Observation, Session, UserPrompt};
use crate::store::Store;
use crate::{now_utc, Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Directory (under the work dir) holding the manifest and chunks.
pub const SYNC_DIR: &str = ".engram";

/// Manifest filename inside [`SYNC_DIR`].
pub const MANIFEST_FILE: &str = "manifest.json";

/// Chunk subdirectory inside [`SYNC_DIR`].
pub const CHUNKS_DIR: &str = "chunks";

/// Whole-database JSON snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version.
    pub version: u32,
    /// When the snapshot was taken.
    pub exported_at: String,
    /// All exported sessions.
    pub sessions: Vec<Session>,
    /// All exported observations.
    pub observations: Vec<Observation>,
    /// All exported prompts.
    pub prompts: Vec<UserPrompt>,
}

impl Snapshot {
    /// Returns true when the snapshot carries no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.observations.is_empty() && self.prompts.is_empty()
    }
}

/// Rows inserted by a snapshot or chunk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    /// Sessions actually inserted (ignored duplicates excluded).
    pub sessions: usize,
    /// Observations inserted.
    pub observations: usize,
    /// Prompts inserted.
    pub prompts: usize,
}

impl ImportCounts {
    /// Accumulates another batch of counts.
    pub fn absorb(&mut self, other: Self) {
        self.sessions += other.sessions;
        self.observations += other.observations;
        self.prompts += other.prompts;
    }
}

/// One line of a chunk file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChunkRecord {
    /// A session row.
    Session(Session),
    /// An observation row.
    Observation(Observation),
    /// A user-prompt row.
    Prompt(UserPrompt),
}

/// Record counts carried in a manifest entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChunkCounts {
    /// Sessions in the chunk.
    pub sessions: usize,
    /// Observations in the chunk.
    pub observations: usize,
    /// Prompts in the chunk.
    pub prompts: usize,
}

/// One known chunk in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEntry {
    /// Content hash of the uncompressed chunk.
    pub id: String,
    /// Label of the checkout that wrote the chunk.
    pub created_by: String,
    /// Project filter the chunk was exported under, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Record counts per kind.
    pub counts: ChunkCounts,
    /// When the chunk was written.
    pub created_at: String,
}

/// The version-controlled chunk index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// Manifest format version.
    pub version: u32,
    /// Known chunks, append-only.
    pub chunks: Vec<ChunkEntry>,
}

impl Default for ChunkManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            chunks: Vec::new(),
        }
    }
}

impl ChunkManifest {
    /// Loads the manifest from a work directory, or an empty one when the
    /// file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the file exists but cannot be read
    /// or parsed.
    pub fn load(work_dir: &Path) -> Result<Self> {
        let path = manifest_path(work_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::storage("read_manifest", e))?;
        serde_json::from_str(&raw).map_err(|e| Error::storage("parse_manifest", e))
    }

    /// Writes the manifest back as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on I/O or serialization failure.
    pub fn save(&self, work_dir: &Path) -> Result<()> {
        let path = manifest_path(work_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage("create_sync_dir", e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::storage("serialize_manifest", e))?;
        std::fs::write(&path, json).map_err(|e| Error::storage("write_manifest", e))
    }

    /// Returns whether the manifest already lists a chunk id.
    #[must_use]
    pub fn contains(&self, chunk_id: &str) -> bool {
        self.chunks.iter().any(|entry| entry.id == chunk_id)
    }

    /// Latest chunk `created_at`, used as the export watermark.
    #[must_use]
    pub fn watermark(&self) -> Option<&str> {
        self.chunks
            .iter()
            .map(|entry| entry.created_at.as_str())
            .max()
    }
}

/// Outcome of importing every unseen chunk in a checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkImportOutcome {
    /// Chunks applied this run.
    pub chunks_applied: usize,
    /// Chunks skipped because they were already recorded.
    pub chunks_skipped: usize,
    /// Total rows inserted across applied chunks.
    pub counts: ImportCounts,
}

/// File-level sync protocol over a [`Store`].
pub struct SyncEngine<'a> {
    store: &'a Store,
}

impl<'a> SyncEngine<'a> {
    /// Creates a sync engine over the given store.
    #[must_use]
    pub const fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Exports records newer than the manifest watermark as one chunk.
    ///
    /// Returns the new chunk id, or `None` when there is nothing new: no
    /// records past the watermark, or a chunk with identical content is
    /// already listed (the id is a hash of the uncompressed content, so
    /// re-running on the same snapshot is a no-op).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database or file failure.
    pub fn export_chunk(
        &self,
        work_dir: &Path,
        project: Option<&str>,
        created_by: &str,
    ) -> Result<Option<String>> {
        let mut manifest = ChunkManifest::load(work_dir)?;
        let snapshot = self
            .store
            .export_snapshot(project, manifest.watermark())?;
        if snapshot.is_empty() {
            return Ok(None);
        }

        let body = encode_chunk(&snapshot)?;
        let chunk_id = chunk_id_for(&body);
        if manifest.contains(&chunk_id) {
            return Ok(None);
        }

        let chunks_dir = work_dir.join(SYNC_DIR).join(CHUNKS_DIR);
        std::fs::create_dir_all(&chunks_dir)
            .map_err(|e| Error::storage("create_chunks_dir", e))?;
        let chunk_path = chunks_dir.join(format!("{chunk_id}.jsonl.gz"));
        write_gzip(&chunk_path, body.as_bytes())?;

        manifest.chunks.push(ChunkEntry {
            id: chunk_id.clone(),
            created_by: created_by.to_string(),
            project: project.map(ToString::to_string),
            counts: ChunkCounts {
                sessions: snapshot.sessions.len(),
                observations: snapshot.observations.len(),
                prompts: snapshot.prompts.len(),
            },
            created_at: now_utc(),
        });
        manifest.save(work_dir)?;

        tracing::info!(chunk = %chunk_id, "wrote sync chunk");
        Ok(Some(chunk_id))
    }

    /// Applies every manifest chunk not yet recorded in this database.
    ///
    /// Chunks already present in `sync_chunks` are skipped, so repeated
    /// imports and overlapping checkouts converge without duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database or file failure.
    pub fn import_chunks(&self, work_dir: &Path) -> Result<ChunkImportOutcome> {
        let manifest = ChunkManifest::load(work_dir)?;
        let mut outcome = ChunkImportOutcome::default();

        for entry in &manifest.chunks {
            if self.store.is_chunk_applied(&entry.id)? {
                outcome.chunks_skipped += 1;
                continue;
            }

            let chunk_path = work_dir
                .join(SYNC_DIR)
                .join(CHUNKS_DIR)
                .join(format!("{}.jsonl.gz", entry.id));
            let body = read_gzip(&chunk_path)?;
            if chunk_id_for(&body) != entry.id {
                tracing::warn!(chunk = %entry.id, "chunk content does not match its id");
            }

            let records = decode_chunk(&body)?;
            let counts = self.store.apply_chunk(&records, &entry.id)?;
            outcome.counts.absorb(counts);
            outcome.chunks_applied += 1;
        }

        Ok(outcome)
    }
}

/// Serializes a snapshot as newline-delimited tagged records.
fn encode_chunk(snapshot: &Snapshot) -> Result<String> {
    let mut body = String::new();
    let mut push = |record: &ChunkRecord| -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| Error::storage("encode_chunk", e))?;
        body.push_str(&line);
        body.push('\n');
        Ok(())
    };
    for session in &snapshot.sessions {
        push(&ChunkRecord::Session(session.clone()))?;
    }
    for obs in &snapshot.observations {
        push(&ChunkRecord::Observation(obs.clone()))?;
    }
    for prompt in &snapshot.prompts {
        push(&ChunkRecord::Prompt(prompt.clone()))?;
    }
    Ok(body)
}

/// Parses newline-delimited tagged records back into a snapshot.
fn decode_chunk(body: &str) -> Result<Snapshot> {
    let mut snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        exported_at: now_utc(),
        sessions: Vec::new(),
        observations: Vec::new(),
        prompts: Vec::new(),
    };
    for line in body.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord =
            serde_json::from_str(line).map_err(|e| Error::storage("decode_chunk", e))?;
        match record {
            ChunkRecord::Session(session) => snapshot.sessions.push(session),
            ChunkRecord::Observation(obs) => snapshot.observations.push(obs),
            ChunkRecord::Prompt(prompt) => snapshot.prompts.push(prompt),
        }
    }
    Ok(snapshot)
}

/// Chunk id: hex SHA-256 of the uncompressed chunk content.
#[must_use]
pub fn chunk_id_for(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_gzip(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| Error::storage("create_chunk_file", e))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| Error::storage("write_chunk_file", e))?;
    encoder
        .finish()
        .map_err(|e| Error::storage("finish_chunk_file", e))?;
    Ok(())
}

fn read_gzip(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path).map_err(|e| Error::storage("open_chunk_file", e))?;
    let mut decoder = GzDecoder::new(file);
    let mut body = String::new();
    decoder
        .read_to_string(&mut body)
        .map_err(|e| Error::storage("read_chunk_file", e))?;
    Ok(body)
}

/// Path of the manifest inside a work directory.
#[must_use]
pub fn manifest_path(work_dir: &Path) -> PathBuf {
    work_dir.join(SYNC_DIR).join(MANIFEST_FILE)
}
