//! CLI command definitions and handlers.
//!
//! The binary is a thin adapter: each handler marshals arguments into one
//! core call and prints a human-readable report. All policy (redaction,
//! normalization, dedup, truncation) lives in the core, never here.
// Allow print_stdout in command handlers for CLI output
#![allow(clippy::print_stdout)]

use crate::config::EngramConfig;
use crate::models::{ObservationDraft, ObservationUpdate};
use crate::store::{PassiveCaptureRequest, SearchFilter, Store};
use crate::sync::SyncEngine;
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;

/// Command-line interface for the engram memory engine.
#[derive(Parser)]
#[command(
    name = "engram",
    version,
    about = "Persistent memory engine for AI coding agents"
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Save an observation.
    Save {
        /// Observation content (reads stdin when omitted).
        content: Option<String>,

        /// Session id the observation belongs to.
        #[arg(short, long)]
        session: String,

        /// Observation type (decision, bugfix, pattern, …).
        #[arg(short = 't', long = "type", default_value = "manual")]
        kind: String,

        /// Observation title.
        #[arg(long)]
        title: String,

        /// Originating tool or source label.
        #[arg(long)]
        tool: Option<String>,

        /// Project tag.
        #[arg(short, long)]
        project: Option<String>,

        /// Scope: project or personal.
        #[arg(long)]
        scope: Option<String>,

        /// Stable topic key for upsert-in-place (family/segment).
        #[arg(long)]
        topic: Option<String>,
    },

    /// Extract learnings from stdin and save them as passive observations.
    Capture {
        /// Session id (defaults to the passive-capture session).
        #[arg(short, long)]
        session: Option<String>,

        /// Source label stored as tool_name.
        #[arg(long)]
        source: Option<String>,

        /// Project tag.
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Record a user prompt.
    Prompt {
        /// Prompt text.
        content: String,

        /// Session id the prompt belongs to.
        #[arg(short, long)]
        session: String,

        /// Project tag.
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Full-text search over observations.
    Recall {
        /// Search query.
        query: String,

        /// Filter by observation type.
        #[arg(short = 't', long = "type")]
        kind: Option<String>,

        /// Filter by project.
        #[arg(short, long)]
        project: Option<String>,

        /// Filter by scope.
        #[arg(long)]
        scope: Option<String>,

        /// Maximum results.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List recent observations.
    Recent {
        /// Filter by project.
        #[arg(short, long)]
        project: Option<String>,

        /// Filter by scope.
        #[arg(long)]
        scope: Option<String>,

        /// Maximum rows.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one observation.
    Get {
        /// Observation id.
        id: i64,
    },

    /// Show the chronological neighborhood of an observation.
    Timeline {
        /// Focus observation id.
        id: i64,

        /// Rows before the focus.
        #[arg(long, default_value_t = 5)]
        before: usize,

        /// Rows after the focus.
        #[arg(long, default_value_t = 5)]
        after: usize,
    },

    /// Update an observation in place.
    Update {
        /// Observation id.
        id: i64,

        /// New observation type.
        #[arg(short = 't', long = "type")]
        kind: Option<String>,

        /// New title.
        #[arg(long)]
        title: Option<String>,

        /// New content.
        #[arg(long)]
        content: Option<String>,

        /// New project tag.
        #[arg(short, long)]
        project: Option<String>,

        /// New scope.
        #[arg(long)]
        scope: Option<String>,

        /// New topic key.
        #[arg(long)]
        topic: Option<String>,
    },

    /// Delete an observation (soft by default).
    Delete {
        /// Observation id.
        id: i64,

        /// Remove the row outright instead of hiding it.
        #[arg(long)]
        hard: bool,
    },

    /// List sessions with their observation counts.
    Sessions {
        /// Filter by project.
        #[arg(short, long)]
        project: Option<String>,

        /// Maximum rows.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Stamp a session's end time and summary.
    EndSession {
        /// Session id.
        id: String,

        /// Session summary.
        #[arg(long)]
        summary: Option<String>,
    },

    /// Print the formatted memory context block.
    Context {
        /// Filter by project.
        #[arg(short, long)]
        project: Option<String>,

        /// Filter by scope.
        #[arg(long)]
        scope: Option<String>,
    },

    /// Show store statistics.
    Status,

    /// Export a whole-database JSON snapshot.
    Export {
        /// Output file (stdout when omitted).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Export only this project (defaults to the working directory name).
        #[arg(short, long)]
        project: Option<String>,

        /// Export everything regardless of project.
        #[arg(long)]
        all: bool,
    },

    /// Import a snapshot produced by export.
    Import {
        /// Snapshot file to import.
        file: PathBuf,
    },

    /// Write or import git-syncable chunks under <dir>/.engram/.
    Sync {
        /// Import unseen chunks instead of exporting.
        #[arg(long = "import")]
        import: bool,

        /// Work directory holding the .engram tree.
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Sync only this project (defaults to the working directory name).
        #[arg(short, long)]
        project: Option<String>,

        /// Sync everything regardless of project.
        #[arg(long)]
        all: bool,

        /// Label recorded as the chunk creator.
        #[arg(long)]
        created_by: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

/// Runs a parsed command against a freshly opened store.
///
/// # Errors
///
/// Returns the first core error; `main` maps it to exit code 1.
pub fn run(command: Command, config: &EngramConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Command::Completions { shell } = &command {
        clap_complete::generate(*shell, &mut Cli::command(), "engram", &mut std::io::stdout());
        return Ok(());
    }

    let store = Store::open(config)?;
    match command {
        Command::Save {
            content,
            session,
            kind,
            title,
            tool,
            project,
            scope,
            topic,
        } => {
            let content = match content {
                Some(content) => content,
                None => read_stdin()?,
            };
            let saved = store.add_observation(ObservationDraft {
                session_id: session,
                kind,
                title,
                content,
                tool_name: tool,
                project,
                scope,
                topic_key: topic,
            })?;
            println!("Saved observation {} ({:?})", saved.id, saved.disposition);
        },

        Command::Capture {
            session,
            source,
            project,
        } => {
            let outcome = store.passive_capture(&PassiveCaptureRequest {
                session_id: session,
                content: read_stdin()?,
                project,
                source,
            })?;
            println!(
                "Extracted {} item(s): {} saved, {} duplicate(s)",
                outcome.extracted, outcome.saved, outcome.duplicates
            );
        },

        Command::Prompt {
            content,
            session,
            project,
        } => {
            let id = store.add_prompt(&session, &content, project.as_deref())?;
            println!("Saved prompt {id}");
        },

        Command::Recall {
            query,
            kind,
            project,
            scope,
            limit,
        } => {
            let filter = SearchFilter {
                kind,
                project,
                scope,
                limit,
            };
            let hits = store.search_observations(&query, &filter)?;
            println!("Found {} observation(s):", hits.len());
            println!();
            for hit in &hits {
                let obs = &hit.observation;
                println!("  [{:.4}] #{} ({}) {}", hit.rank, obs.id, obs.kind, obs.title);
                println!("       {}", preview_line(&obs.content));
                println!();
            }
        },

        Command::Recent {
            project,
            scope,
            limit,
        } => {
            let rows = store.recent_observations(project.as_deref(), scope.as_deref(), limit)?;
            for obs in &rows {
                println!(
                    "#{} [{}] ({}) {} — {}",
                    obs.id,
                    obs.created_at,
                    obs.kind,
                    obs.title,
                    preview_line(&obs.content)
                );
            }
        },

        Command::Get { id } => {
            let obs = store.get_observation(id)?;
            println!("#{} ({}) {}", obs.id, obs.kind, obs.title);
            println!("session: {}", obs.session_id);
            if let Some(project) = &obs.project {
                println!("project: {project}");
            }
            println!("scope: {}", obs.scope);
            if let Some(topic) = &obs.topic_key {
                println!("topic: {topic}");
            }
            println!(
                "revisions: {}  duplicates: {}",
                obs.revision_count, obs.duplicate_count
            );
            println!("created: {}", obs.created_at);
            println!();
            println!("{}", obs.content);
        },

        Command::Timeline { id, before, after } => {
            let timeline = store.timeline(id, before, after)?;
            for obs in &timeline.before {
                println!("  #{} [{}] {}", obs.id, obs.created_at, obs.title);
            }
            println!(
                "> #{} [{}] {}",
                timeline.focus.id, timeline.focus.created_at, timeline.focus.title
            );
            for obs in &timeline.after {
                println!("  #{} [{}] {}", obs.id, obs.created_at, obs.title);
            }
            println!(
                "session {} — {} observation(s) total",
                timeline.focus.session_id, timeline.total_in_session
            );
        },

        Command::Update {
            id,
            kind,
            title,
            content,
            project,
            scope,
            topic,
        } => {
            store.update_observation(
                id,
                &ObservationUpdate {
                    kind,
                    title,
                    content,
                    project,
                    scope,
                    topic_key: topic,
                },
            )?;
            println!("Updated observation {id}");
        },

        Command::Delete { id, hard } => {
            store.delete_observation(id, hard)?;
            println!(
                "{} observation {id}",
                if hard { "Deleted" } else { "Hid" }
            );
        },

        Command::Sessions { project, limit } => {
            let sessions = store.recent_sessions(project.as_deref(), limit)?;
            for listing in &sessions {
                let s = &listing.session;
                let state = if s.ended_at.is_some() { "ended" } else { "open" };
                println!(
                    "{} [{}] {} — {} observation(s)",
                    s.id, s.started_at, state, listing.observation_count
                );
            }
        },

        Command::EndSession { id, summary } => {
            store.end_session(&id, summary.as_deref())?;
            println!("Ended session {id}");
        },

        Command::Context { project, scope } => {
            print!(
                "{}",
                store.format_context(project.as_deref(), scope.as_deref())?
            );
        },

        Command::Status => {
            let stats = store.stats()?;
            println!("Engram status");
            println!("=============");
            if let Some(path) = store.db_path() {
                println!("database: {}", path.display());
            }
            println!("sessions: {}", stats.total_sessions);
            println!("observations: {}", stats.total_observations);
            println!("prompts: {}", stats.total_prompts);
            if !stats.projects.is_empty() {
                println!("projects: {}", stats.projects.join(", "));
            }
        },

        Command::Export { out, project, all } => {
            let project = effective_project(project, all);
            let snapshot = store.export_snapshot(project.as_deref(), None)?;
            let json = serde_json::to_string_pretty(&snapshot)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!(
                        "Exported {} session(s), {} observation(s), {} prompt(s) to {}",
                        snapshot.sessions.len(),
                        snapshot.observations.len(),
                        snapshot.prompts.len(),
                        path.display()
                    );
                },
                None => println!("{json}"),
            }
        },

        Command::Import { file } => {
            let raw = std::fs::read_to_string(&file)?;
            let snapshot = serde_json::from_str(&raw)?;
            let counts = store.import_snapshot(&snapshot)?;
            println!(
                "Imported {} session(s), {} observation(s), {} prompt(s)",
                counts.sessions, counts.observations, counts.prompts
            );
        },

        Command::Sync {
            import,
            dir,
            project,
            all,
            created_by,
        } => {
            let engine = SyncEngine::new(&store);
            if import {
                let outcome = engine.import_chunks(&dir)?;
                println!(
                    "Applied {} chunk(s) ({} skipped): {} session(s), {} observation(s), {} prompt(s)",
                    outcome.chunks_applied,
                    outcome.chunks_skipped,
                    outcome.counts.sessions,
                    outcome.counts.observations,
                    outcome.counts.prompts
                );
            } else {
                let project = effective_project(project, all);
                let created_by = created_by.unwrap_or_else(default_creator);
                match engine.export_chunk(&dir, project.as_deref(), &created_by)? {
                    Some(chunk_id) => println!("Wrote chunk {chunk_id}"),
                    None => println!("Nothing new to sync"),
                }
            }
        },

        Command::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Resolves the project selection: `--all` wins, then `--project`, then the
/// working directory's basename.
fn effective_project(project: Option<String>, all: bool) -> Option<String> {
    if all {
        return None;
    }
    project.or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
    })
}

/// Creator label for chunks written from this machine.
fn default_creator() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

fn read_stdin() -> Result<String, Box<dyn std::error::Error>> {
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

fn preview_line(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= 100 {
        flat
    } else {
        let head: String = flat.chars().take(100).collect();
        format!("{head}…")
    }
}
