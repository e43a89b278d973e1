//! cometguard CLI
//!
//! Command-line interface for inspecting tracking backends and replaying
//! offline experiment logs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use cometguard::backend::{BackendKind, BackendProbe, EVENTS_FILE};
use cometguard::client::ClientProbe;
use cometguard::config::GuardConfig;
use cometguard::guard::TrackingGuard;
use cometguard::types::TrackingEvent;

#[derive(Parser)]
#[command(name = "cometguard")]
#[command(version, about = "cometguard - Best-effort experiment tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tracking backends and whether they can be used here
    Backends,

    /// Replay an offline experiment log into a tracking backend
    Replay {
        /// events.jsonl file, or the experiment directory holding it
        events: PathBuf,

        /// Backend to replay into (console, offline, comet)
        #[arg(long, default_value = "console")]
        backend: BackendKind,

        /// Guard settings as JSON; replaces --backend
        #[arg(long)]
        config: Option<PathBuf>,

        /// Session option forwarded to the backend, as key=value
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Read the log but send nothing
        #[arg(long)]
        disabled: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Backends => list_backends(),
        Commands::Replay {
            events,
            backend,
            config,
            options,
            disabled,
        } => {
            let mut guard_config = match config {
                Some(path) => GuardConfig::from_json_file(&path)
                    .with_context(|| format!("cannot load config {}", path.display()))?,
                None => GuardConfig::new(backend),
            };
            for pair in &options {
                guard_config.options.insert_pair(pair)?;
            }
            if disabled {
                guard_config.enabled = false;
            }
            replay(&events, &guard_config)?;
        }
    }

    Ok(())
}

fn list_backends() {
    println!("Available backends:");
    for kind in BackendKind::ALL {
        let status = if BackendProbe(kind).detect().is_some() {
            "available"
        } else {
            "not installed"
        };
        println!("  {:<8} {}", kind, status);
    }
}

fn replay(events: &Path, config: &GuardConfig) -> Result<()> {
    let events_file = if events.is_dir() {
        events.join(EVENTS_FILE)
    } else {
        events.to_path_buf()
    };
    let base = events_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let file = File::open(&events_file)
        .with_context(|| format!("cannot open {}", events_file.display()))?;
    let mut guard = TrackingGuard::from_config(config)?;

    println!(
        "Replaying {} into {} backend",
        events_file.display(),
        config.backend
    );

    let mut applied = 0usize;
    let mut skipped = 0usize;
    let mut ended = false;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TrackingEvent>(&line) {
            Ok(mut event) => {
                ended |= matches!(event, TrackingEvent::End);
                event.rebase_paths(&base);
                guard.apply(event);
                applied += 1;
            }
            Err(e) => {
                tracing::warn!(line = index + 1, "Skipping malformed event: {}", e);
                skipped += 1;
            }
        }
    }

    // Logs cut short by a crash have no end event.
    if !ended {
        guard.end();
    }

    println!("Replayed {} events ({} skipped)", applied, skipped);
    Ok(())
}
