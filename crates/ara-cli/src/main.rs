//! `ara-cli` – interactive shell over Ara's long-term memory.
//!
//! This binary wires the memory engine to real services and lets an operator
//! talk to it. It:
//!
//! 1. Checks for `~/.ara/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Probes the embedding endpoint and reports the vector dimension.
//! 3. Opens the persisted memory store (`--fresh` moves a damaged snapshot
//!    aside instead of refusing to start).
//! 4. Drops the user into an **interactive REPL** (`/remember`, `/recall`,
//!    `/context`, `/import`, `/seed`, `/consolidate`, `/stats`, `/flush`).
//! 5. Intercepts **Ctrl-C**, stops background work and flushes memory to
//!    disk before exiting.

mod config;
mod repl;

use std::io::BufRead;
use std::sync::Arc;

use ara_memory::{MemoryEngine, OnCorrupt};
use ara_runtime::{ChatSummarizer, HttpEmbeddingProvider};
use ara_types::MemoryError;
use colored::Colorize;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::config::Config;

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"), ARA_LOG_FORMAT=json switches to
    // newline-delimited JSON. User-facing output still goes through println!.
    let telemetry = ara_runtime::init_tracing("ara");

    print_banner();

    let fresh = std::env::args().skip(1).any(|a| a == "--fresh")
        || matches!(std::env::var("ARA_START_FRESH").as_deref(), Ok("1" | "true"));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – saving memory and shutting down …".yellow().bold()
        );
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; memory is only saved on /quit");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(start(cfg, fresh, stop_rx));
    drop(runtime);

    if let Err(e) = result {
        eprintln!("\n  {} {}", "✗".red().bold(), e);
        drop(telemetry);
        std::process::exit(1);
    }
}

async fn start(cfg: Config, fresh: bool, stop: watch::Receiver<bool>) -> Result<(), String> {
    let provider = HttpEmbeddingProvider::with_timeout(
        cfg.embedding_url.as_str(),
        cfg.embedding_model.as_str(),
        cfg.memory.embed_timeout(),
    )
    .map_err(|e| format!("Failed to build embedding client: {e}"))?
    .api_key(cfg.api_key.clone());

    // ── Embedding endpoint discovery ──────────────────────────────────────
    print!("\n  Probing embeddings at {} … ", cfg.embedding_url.dimmed());
    std::io::Write::flush(&mut std::io::stdout()).ok();
    match provider.request("ping").await {
        Ok(v) => println!(
            "{} ({} · {}-d)",
            "online".green(),
            provider.model().bold(),
            v.len()
        ),
        Err(e) => {
            println!("{}", "offline".yellow());
            println!("  {}  {}", "Memories cannot be stored or recalled until it is reachable:".dimmed(), e);
        }
    }

    // ── Memory engine ─────────────────────────────────────────────────────
    let state_path = cfg.resolved_state_path();
    let mut builder = MemoryEngine::builder(cfg.memory.clone(), Arc::new(provider))
        .state_path(state_path.clone())
        .on_corrupt(if fresh {
            OnCorrupt::StartFresh
        } else {
            OnCorrupt::Fail
        });
    if let Some(model) = &cfg.summarizer_model {
        let summarizer = ChatSummarizer::new(
            cfg.summarizer_url(),
            model.as_str(),
            cfg.memory.summarize_timeout(),
        )
        .map_err(|e| format!("Failed to build summarizer client: {e}"))?
        .api_key(cfg.api_key.clone());
        builder = builder.summarizer(Arc::new(summarizer));
    }

    let engine = match builder.open().await {
        Ok(engine) => engine,
        Err(e @ MemoryError::CorruptState(_)) => {
            return Err(format!(
                "{e}\n    Run `{}` to move the damaged file aside and start empty.",
                "ara --fresh".bold()
            ));
        }
        Err(e) => return Err(e.to_string()),
    };

    let stats = engine.stats().await;
    println!(
        "  Memory: {} entries (capacity {}) in {}",
        stats.entries.to_string().bold(),
        stats.capacity,
        state_path.display().to_string().dimmed()
    );
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    // stdin is read on a plain thread so a blocked read never holds up
    // runtime shutdown.
    let (line_tx, line_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    repl::run(&engine, line_rx, stop).await;

    engine
        .shutdown()
        .await
        .map_err(|e| format!("Final flush failed: {e}"))?;
    println!("{}", "  ✓ Memory saved.".green());
    println!("{}", "  ✓ Exiting Ara.".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║         Ara First-Run Wizard         ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Ara's memory.\n");

    let mut cfg = Config::default();

    cfg.embedding_url = prompt_line(
        &format!("  Embedding server URL [{}]: ", cfg.embedding_url),
        &cfg.embedding_url,
    );
    cfg.embedding_model = prompt_line(
        &format!("  Embedding model [{}]: ", cfg.embedding_model),
        &cfg.embedding_model,
    );

    let model = prompt_line("  Summarizer chat model (blank to concatenate merges): ", "");
    cfg.summarizer_model = (!model.is_empty()).then_some(model);

    let capacity = prompt_line(
        &format!("  Memory capacity [{}]: ", cfg.memory.capacity),
        &cfg.memory.capacity.to_string(),
    );
    if let Ok(n) = capacity.parse::<usize>()
        && n > 0
    {
        cfg.memory.capacity = n;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ___    ____  ___ "#.bold().cyan());
    println!("{}", r#"   /   |  / __ \/   |"#.bold().cyan());
    println!("{}", r#"  / /| | / /_/ / /| |"#.bold().cyan());
    println!("{}", r#" / ___ |/ _, _/ ___ |"#.bold().cyan());
    println!("{}", r#"/_/  |_/_/ |_/_/  |_|"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Ara".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Long-term memory for your voice assistant");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::Write;
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
