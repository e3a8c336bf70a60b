//! REPL – Read-Eval-Print Loop for the Ara memory shell.
//!
//! Supported slash-commands:
//!   /remember <text>   – store a user statement
//!   /recall <query>    – list the best-ranked memories with their scores
//!   /context <query>   – show the context block handed to the chat model
//!   /import <file>     – index a legacy conversation log as context chunks
//!   /seed <path>       – load `.txt`/`.md` reference documents
//!   /consolidate       – merge near-duplicates and enforce capacity
//!   /stats             – store counters
//!   /flush             – write pending changes to disk now
//!   /help              – show this list
//!   /quit | /exit      – save and exit
//!
//! Anything else is treated as something the user said: relevant memories
//! are recalled, then the line itself is remembered.

use std::path::{Path, PathBuf};

use ara_memory::context::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use ara_memory::{MemoryEngine, SeedDocument};
use ara_types::{ConversationTurn, Metadata, RecalledMemory, Role};
use colored::Colorize;
use tokio::sync::{mpsc, watch};

/// Memories fetched per recall.
const RECALL_K: usize = 10;

/// Characters of content shown per `/recall` row.
const PREVIEW_CHARS: usize = 72;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command<'a> {
    Help,
    Quit,
    Stats,
    Flush,
    Consolidate,
    Remember(&'a str),
    Recall(&'a str),
    Context(&'a str),
    Import(&'a str),
    Seed(&'a str),
    /// A plain line of conversation.
    Say(&'a str),
    /// A known command given without its required argument.
    MissingArgument(&'a str),
    Unknown(&'a str),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::Say(line));
    }
    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    let cmd = match name {
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        "/stats" => Command::Stats,
        "/flush" => Command::Flush,
        "/consolidate" => Command::Consolidate,
        "/remember" | "/recall" | "/context" | "/import" | "/seed" if arg.is_empty() => {
            Command::MissingArgument(name)
        }
        "/remember" => Command::Remember(arg),
        "/recall" => Command::Recall(arg),
        "/context" => Command::Context(arg),
        "/import" => Command::Import(arg),
        "/seed" => Command::Seed(arg),
        other => Command::Unknown(other),
    };
    Some(cmd)
}

/// Entry point for the interactive REPL.
///
/// Returns on `/quit`, end of input, or when `shutdown` flips to `true`.
pub async fn run(
    engine: &MemoryEngine,
    mut lines: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let session = uuid::Uuid::new_v4().to_string();

    loop {
        if *shutdown.borrow() {
            break;
        }

        print!("{} ", "ara>".bold().cyan());
        std::io::Write::flush(&mut std::io::stdout()).ok();

        let line = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => line,
                None => break, // EOF
            },
            // A dropped sender (no Ctrl-C handler) disables this branch.
            Ok(()) = shutdown.changed() => break,
        };

        let Some(cmd) = parse(&line) else {
            continue;
        };
        match cmd {
            Command::Quit => {
                println!("Goodbye.");
                break;
            }
            Command::Help => cmd_help(),
            Command::Stats => cmd_stats(engine).await,
            Command::Flush => cmd_flush(engine).await,
            Command::Consolidate => cmd_consolidate(engine).await,
            Command::Remember(text) => cmd_remember(engine, text, &session).await,
            Command::Recall(query) => cmd_recall(engine, query).await,
            Command::Context(query) => cmd_context(engine, query).await,
            Command::Import(path) => cmd_import(engine, Path::new(path)).await,
            Command::Seed(path) => cmd_seed(engine, Path::new(path)).await,
            Command::Say(text) => cmd_say(engine, text, &session).await,
            Command::MissingArgument(name) => {
                println!("{} {} needs an argument.", "Usage:".yellow(), name.bold());
            }
            Command::Unknown(name) => {
                println!(
                    "{} {}  (type {} for help)",
                    "Unknown command:".red(),
                    name,
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "  Available commands:".bold());
    println!("    {}  – store a user statement", "/remember <text>".cyan());
    println!("    {}   – list ranked memories", "/recall <query>".cyan());
    println!("    {}  – show the context block", "/context <query>".cyan());
    println!("    {}    – index a conversation log", "/import <file>".cyan());
    println!("    {}      – load reference documents", "/seed <path>".cyan());
    println!("    {}       – merge near-duplicates", "/consolidate".cyan());
    println!("    {}             – store counters", "/stats".cyan());
    println!("    {}             – save to disk now", "/flush".cyan());
    println!("    {}      – save and exit", "/quit | /exit".cyan());
    println!();
    println!("  Any other line is treated as something you said.");
    println!();
}

fn user_turn(session: &str) -> Metadata {
    Metadata::new()
        .with_role(Role::User)
        .with_tag("session", session)
}

async fn cmd_remember(engine: &MemoryEngine, text: &str, session: &str) {
    match engine.remember(text, user_turn(session)).await {
        Ok(id) => println!("  {} remembered as {}", "✓".green(), id.to_string().bold()),
        Err(e) => println!("  {} {}", "✗".red(), e),
    }
}

async fn cmd_say(engine: &MemoryEngine, text: &str, session: &str) {
    let context = engine.recall_context(text, RECALL_K).await;
    if context.is_empty() {
        println!("  {}", "(no relevant memories)".dimmed());
    } else {
        println!("{}", context.trim_end().dimmed());
    }
    if let Err(e) = engine.remember(text, user_turn(session)).await {
        println!("  {} not remembered: {}", "✗".red(), e);
    }
}

async fn cmd_recall(engine: &MemoryEngine, query: &str) {
    match engine.recall(query, RECALL_K).await {
        Ok(found) if found.is_empty() => println!("  {}", "(no memories yet)".dimmed()),
        Ok(found) => {
            println!();
            for m in &found {
                println!("  {}", format_row(m));
            }
            println!();
        }
        Err(e) => println!("  {} {}", "✗".red(), e),
    }
}

async fn cmd_context(engine: &MemoryEngine, query: &str) {
    let context = engine.recall_context(query, RECALL_K).await;
    if context.is_empty() {
        println!("  {}", "(empty)".dimmed());
    } else {
        println!("{}", context.trim_end());
    }
}

async fn cmd_import(engine: &MemoryEngine, path: &Path) {
    let turns = match tokio::fs::read_to_string(path).await {
        Ok(raw) => match parse_transcript(&raw) {
            Ok(turns) => turns,
            Err(e) => {
                println!("  {} {}", "✗".red(), e);
                return;
            }
        },
        Err(e) => {
            println!("  {} cannot read {}: {}", "✗".red(), path.display(), e);
            return;
        }
    };
    match engine
        .remember_transcript(&turns, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
        .await
    {
        Ok(ids) => println!(
            "  {} {} turns indexed as {} chunks",
            "✓".green(),
            turns.len(),
            ids.len()
        ),
        Err(e) => println!("  {} {}", "✗".red(), e),
    }
}

async fn cmd_seed(engine: &MemoryEngine, path: &Path) {
    let documents = match collect_documents(path).await {
        Ok(docs) if docs.is_empty() => {
            println!("  {} no .txt or .md files in {}", "✗".red(), path.display());
            return;
        }
        Ok(docs) => docs,
        Err(e) => {
            println!("  {} cannot read {}: {}", "✗".red(), path.display(), e);
            return;
        }
    };
    let count = documents.len();
    match engine.seed(documents).await {
        Ok(ids) => println!(
            "  {} {} of {} documents stored",
            "✓".green(),
            ids.len(),
            count
        ),
        Err(e) => println!("  {} {}", "✗".red(), e),
    }
}

async fn cmd_consolidate(engine: &MemoryEngine) {
    match engine.consolidate().await {
        Ok(report) if report.is_empty() => println!("  {}", "Nothing to consolidate.".dimmed()),
        Ok(report) => println!(
            "  {} merged {} entries into {} · evicted {}",
            "✓".green(),
            report.entries_merged,
            report.merged_groups,
            report.evicted
        ),
        Err(e) => println!("  {} {}", "✗".red(), e),
    }
}

async fn cmd_stats(engine: &MemoryEngine) {
    let stats = engine.stats().await;
    println!();
    println!("{}", "  Memory:".bold());
    println!("    entries        : {} / {}", stats.entries, stats.capacity);
    println!(
        "    dimension      : {}",
        stats
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".into())
    );
    println!("    total accesses : {}", stats.total_access_count);
    println!(
        "    unsaved changes: {}",
        if stats.dirty { "yes".yellow() } else { "no".green() }
    );
    println!();
}

async fn cmd_flush(engine: &MemoryEngine) {
    match engine.flush().await {
        Ok(true) => println!("  {} saved", "✓".green()),
        Ok(false) => println!("  {}", "Nothing to save.".dimmed()),
        Err(e) => println!("  {} {}", "✗".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a legacy conversation log: a JSON array of `{role, text}` turns.
fn parse_transcript(raw: &str) -> Result<Vec<ConversationTurn>, String> {
    serde_json::from_str(raw).map_err(|e| format!("not a conversation log: {e}"))
}

fn is_document(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("txt" | "md")
    )
}

/// Read `path` as one document, or every `.txt`/`.md` file directly inside
/// it (sorted by name) when it is a directory.
async fn collect_documents(path: &Path) -> std::io::Result<Vec<SeedDocument>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if tokio::fs::metadata(path).await?.is_dir() {
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let p = entry.path();
            if is_document(&p) {
                files.push(p);
            }
        }
        files.sort();
    } else {
        files.push(path.to_path_buf());
    }

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let content = tokio::fs::read_to_string(&file).await?;
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        documents.push(SeedDocument {
            name,
            content,
            importance: None,
        });
    }
    Ok(documents)
}

fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

fn format_row(m: &RecalledMemory) -> String {
    let role = m.metadata.role.unwrap_or(Role::User);
    format!(
        "{:>6}  {:.3}  (sim {:.3})  {:<13}  {}",
        m.id.to_string(),
        m.score,
        m.similarity,
        role.as_str(),
        preview(&m.content, PREVIEW_CHARS)
    )
}
