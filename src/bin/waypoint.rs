//! # Waypoint CLI - Checkpoints for your working directory
//!
//! A command-line interface for the Waypoint checkpoint engine.
//!
//! ## Usage
//! ```bash
//! # Create the store in the current directory
//! waypoint init
//!
//! # Record a checkpoint
//! waypoint save -m "before refactor"
//!
//! # List checkpoints, newest first
//! waypoint log -n 10
//!
//! # Rewind to a checkpoint (prefix ids work)
//! waypoint restore 3f2a9c1d --hard
//! ```
//!
//! Pass `--json` to any command for machine-readable output.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use waypoint::{
    utils, Commit, InitStatus, RestoreMode, RestoreOutcome, SaveStatus, Waypoint, WaypointBuilder,
    WaypointError, DEFAULT_STORE_DIR,
};

/// Waypoint CLI - Silent checkpoints of a project directory
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version, about = "Save and restore checkpoints of a working directory")]
#[command(long_about = None)]
struct Cli {
    /// Project root (defaults to current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Store directory name under the project root
    #[arg(long, global = true, default_value = DEFAULT_STORE_DIR)]
    store_dir: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the checkpoint store
    Init {
        /// Extra ignore patterns (gitignore syntax)
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Record a checkpoint of the current state right away
        #[arg(long)]
        initial_commit: bool,

        /// Skip files larger than this many bytes (0 = no limit)
        #[arg(long, default_value_t = 0)]
        max_file_size: u64,
    },

    /// Record a checkpoint
    #[command(alias = "cp")]
    Save {
        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List checkpoints, newest first
    #[command(alias = "ls")]
    Log {
        /// Maximum number of checkpoints
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show one checkpoint
    Show {
        /// Commit id, unique prefix or HEAD
        checkpoint: String,
    },

    /// Print a file as recorded in a checkpoint
    Cat {
        /// Commit id, unique prefix or HEAD
        checkpoint: String,

        /// File path, relative to the project root
        file: PathBuf,
    },

    /// Show whether a save would record anything
    Status,

    /// Print the current head commit id
    Head,

    /// Restore the working directory to a checkpoint
    #[command(alias = "rs")]
    Restore {
        /// Commit id, unique prefix or HEAD
        checkpoint: String,

        /// Also delete files that the checkpoint does not contain
        #[arg(long)]
        hard: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "waypoint=debug" } else { "waypoint=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() || cli.json {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<WaypointError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let root = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));
    let ctx = Ctx { root, store_dir: cli.store_dir, json: cli.json };

    match cli.command {
        Commands::Init { ignore, initial_commit, max_file_size } => {
            cmd_init(&ctx, ignore, initial_commit, max_file_size)
        }
        Commands::Save { message } => cmd_save(&ctx, message),
        Commands::Log { limit } => cmd_log(&ctx, limit),
        Commands::Show { checkpoint } => cmd_show(&ctx, &checkpoint),
        Commands::Cat { checkpoint, file } => cmd_cat(&ctx, &checkpoint, &file),
        Commands::Status => cmd_status(&ctx),
        Commands::Head => cmd_head(&ctx),
        Commands::Restore { checkpoint, hard } => {
            let mode = if hard { RestoreMode::Hard } else { RestoreMode::Soft };
            cmd_restore(&ctx, &checkpoint, mode)
        }
    }
}

/// Options shared by every command
struct Ctx {
    root: PathBuf,
    store_dir: String,
    json: bool,
}

impl Ctx {
    fn open(&self) -> anyhow::Result<Waypoint> {
        Ok(WaypointBuilder::new().store_dir_name(&self.store_dir).open(&self.root)?)
    }

    fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Create the store and add it to `.gitignore`
fn cmd_init(ctx: &Ctx, ignore: Vec<String>, initial_commit: bool, max_file_size: u64) -> anyhow::Result<()> {
    let (waypoint, result) = WaypointBuilder::new()
        .store_dir_name(&ctx.store_dir)
        .ignore_patterns(ignore)
        .initial_commit(initial_commit)
        .max_file_size(max_file_size)
        .initialize(&ctx.root)?;

    if ctx.json {
        return ctx.print_json(&result);
    }

    match result.status {
        InitStatus::Skipped => {
            println!("{} Already initialized at {}", "•".yellow().bold(), waypoint.store_path().display());
        }
        InitStatus::Success => {
            println!("{} Initialized checkpoint store", "✓".green().bold());
            println!("  Store: {}", waypoint.store_path().display().to_string().cyan());
            if result.ignore_file_updated {
                println!("  Added {} to .gitignore", format!("/{}/", ctx.store_dir).cyan());
            }
            if let Some(oid) = result.initial_commit_oid {
                println!("  Initial checkpoint: {}", oid.short().yellow());
            }
        }
    }
    Ok(())
}

/// Record a checkpoint
fn cmd_save(ctx: &Ctx, message: Option<String>) -> anyhow::Result<()> {
    let waypoint = ctx.open()?;
    let start = Instant::now();
    let result = waypoint.save(message.as_deref())?;

    if ctx.json {
        return ctx.print_json(&result);
    }

    match (result.status, result.oid) {
        (SaveStatus::Success, Some(oid)) => {
            println!("{} Saved checkpoint {}", "✓".green().bold(), oid.short().yellow().bold());
            println!("  Changed: {} files", result.files_processed.to_string().cyan());
            for file in &result.files {
                println!("    {}", file.dimmed());
            }
            println!("  Time: {}", format_duration(truncate_millis(start.elapsed())).to_string().cyan());
        }
        _ => println!("{}", "No changes since the last checkpoint.".yellow()),
    }
    Ok(())
}

/// List checkpoints
fn cmd_log(ctx: &Ctx, limit: Option<usize>) -> anyhow::Result<()> {
    let waypoint = ctx.open()?;
    let log = waypoint.log(limit, None)?;

    if ctx.json {
        return ctx.print_json(&log);
    }

    if log.commits.is_empty() {
        println!("{}", "No checkpoints found.".yellow());
        return Ok(());
    }

    for (i, commit) in log.commits.iter().enumerate() {
        let marker = if i == 0 { "*".green().bold() } else { " ".normal() };
        println!(
            "{} {} {} {}",
            marker,
            commit.oid.short().yellow().bold(),
            age(commit).dimmed(),
            commit.summary().cyan()
        );
    }
    Ok(())
}

/// Show one checkpoint in detail
fn cmd_show(ctx: &Ctx, checkpoint: &str) -> anyhow::Result<()> {
    let waypoint = ctx.open()?;
    let oid = waypoint.resolve(checkpoint)?;
    let commit = waypoint.commit(&oid)?;

    if ctx.json {
        return ctx.print_json(&commit);
    }

    println!("{} {}", "checkpoint".bold(), commit.oid.to_hex().yellow());
    if let Some(parent) = commit.parent() {
        println!("Parent:  {}", parent.to_hex().dimmed());
    }
    println!("Author:  {} <{}>", commit.author.name, commit.author.email);
    println!(
        "Date:    {} ({})",
        commit.author.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        age(&commit)
    );
    println!("Tree:    {}", commit.tree.to_hex().dimmed());
    println!();
    for line in commit.message.lines() {
        println!("    {}", line);
    }
    Ok(())
}

/// Print a file from a checkpoint to stdout
fn cmd_cat(ctx: &Ctx, checkpoint: &str, file: &Path) -> anyhow::Result<()> {
    let waypoint = ctx.open()?;
    let oid = waypoint.resolve(checkpoint)?;
    let relative = if file.is_absolute() {
        utils::make_relative(file, waypoint.root())
            .with_context(|| format!("{} is outside the project root", file.display()))?
    } else {
        file.to_path_buf()
    };

    let content = waypoint.read_file_at(&oid, &relative)?;
    std::io::stdout().write_all(&content)?;
    Ok(())
}

/// Show pending changes
fn cmd_status(ctx: &Ctx) -> anyhow::Result<()> {
    let waypoint = ctx.open()?;
    let summary = waypoint.has_changes()?;

    if ctx.json {
        return ctx.print_json(&summary);
    }

    let head = match waypoint.head_oid() {
        Ok(oid) => {
            println!("Head: {}", oid.short().yellow());
            Some(oid)
        }
        Err(WaypointError::NoHead) => {
            println!("Head: {}", "no checkpoints yet".dimmed());
            None
        }
        Err(e) => return Err(e.into()),
    };
    if waypoint::refs::is_locked(waypoint.store_path()) {
        println!("{}", "A save or restore is in progress (ref lock held).".yellow());
    }

    if !summary.has_changes {
        println!("{}", "Working directory matches the last checkpoint.".green());
        return Ok(());
    }

    println!("{} changed files:", summary.changed_files.len().to_string().yellow().bold());
    for file in &summary.changed_files {
        let on_disk = waypoint.root().join(file).symlink_metadata().is_ok();
        let in_head = head.is_some_and(|oid| waypoint.read_file_at(&oid, file).is_ok());
        let marker = match (on_disk, in_head) {
            (false, _) => "D",
            (true, false) => "A",
            (true, true) => "M",
        };
        println!("  {} {}", marker.yellow(), file);
    }
    Ok(())
}

/// Print the head commit id
fn cmd_head(ctx: &Ctx) -> anyhow::Result<()> {
    let waypoint = ctx.open()?;
    let oid = waypoint.head_oid()?;
    if ctx.json {
        return ctx.print_json(&oid);
    }
    println!("{}", oid);
    Ok(())
}

/// Restore the working directory
fn cmd_restore(ctx: &Ctx, checkpoint: &str, mode: RestoreMode) -> anyhow::Result<()> {
    let waypoint = ctx.open()?;
    let outcome = waypoint.restore(checkpoint, mode)?;

    if ctx.json {
        ctx.print_json(&outcome)?;
    }

    let result = match outcome {
        RestoreOutcome::Restored(result) => result,
        RestoreOutcome::CommitNotFound(target) => {
            anyhow::bail!("Checkpoint '{}' not found", target);
        }
    };
    if ctx.json {
        return Ok(());
    }

    println!("{} Restored to {}", "✓".green().bold(), result.target_oid.short().yellow().bold());
    println!("  Files restored: {}", result.files_restored.to_string().cyan());
    if mode == RestoreMode::Hard {
        println!("  Files deleted: {}", result.files_deleted.to_string().yellow());
    }
    if result.commits_removed > 0 {
        println!("  Rewound {} checkpoints", result.commits_removed.to_string().yellow());
    }

    if !result.warnings.is_empty() {
        println!("\n{}", "Warnings:".yellow().bold());
        for warning in &result.warnings {
            println!("  - {}", warning.yellow());
        }
    }
    Ok(())
}

/// Human-readable age of a commit, e.g. `5m 12s ago`
fn age(commit: &Commit) -> String {
    let seconds = (Utc::now() - commit.author.timestamp).num_seconds().max(0) as u64;
    format!("{} ago", format_duration(Duration::from_secs(seconds)))
}

fn truncate_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
