//! # Rewind CLI - inspect and operate a project's history
//!
//! ## Usage
//! ```bash
//! # Initialize storage in the current directory
//! rewind init
//!
//! # Take a restore point
//! rewind snapshot -m "Before screening" --phase screening
//!
//! # List and restore (id prefixes work)
//! rewind list
//! rewind restore 3f2a9c1e
//!
//! # Command history and rollback
//! rewind history
//! rewind rollback 3f2a9c1e
//!
//! # Checkpoints and the resume prompt
//! rewind checkpoints
//! rewind resume
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use rewind::utils::format_bytes;
use rewind::{CompressionStrategy, RestorePointKind, RestorePointOptions, Rewind, RewindBuilder};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Rewind CLI - restore points, command history and checkpoints
#[derive(Parser)]
#[command(name = "rewind")]
#[command(version)]
#[command(about = "Restore points, undo history and resumable checkpoints for a project directory")]
#[command(long_about = None)]
struct Cli {
    /// Project directory (defaults to current)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Storage directory (defaults to <path>/.rewind)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize storage for a project
    Init {
        /// Blob compression strategy
        #[arg(long, value_enum, default_value = "fast")]
        compression: CompressionMode,

        /// Deltas per snapshot before a new snapshot is taken
        #[arg(long, default_value_t = 10)]
        delta_threshold: usize,

        /// Remove restore points older than this many days (0 keeps all)
        #[arg(long, default_value_t = 30)]
        retention_days: i64,

        /// Additional directory names to skip
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Only capture files matching these globs
        #[arg(short, long)]
        include: Vec<String>,

        /// Reconfigure an existing store
        #[arg(long)]
        force: bool,
    },

    /// Create a restore point
    #[command(alias = "snap")]
    Snapshot {
        /// Description
        #[arg(short, long)]
        message: String,

        /// Restore point kind
        #[arg(long, value_enum, default_value = "manual")]
        kind: KindArg,

        /// Workflow phase
        #[arg(long)]
        phase: Option<String>,

        /// Tags
        #[arg(short, long)]
        tag: Vec<String>,

        /// Write a full snapshot even if a delta would do
        #[arg(long)]
        force_snapshot: bool,
    },

    /// List restore points
    #[command(alias = "ls")]
    List {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,

        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Restore project files from a restore point
    #[command(alias = "rs")]
    Restore {
        /// Restore point id or prefix
        id: String,
    },

    /// Delete a restore point
    Delete {
        /// Restore point id or prefix
        id: String,

        /// Also delete deltas built on a snapshot
        #[arg(long)]
        cascade: bool,
    },

    /// Show storage statistics
    Stats,

    /// Verify a restore point
    Verify {
        /// Restore point id or prefix
        id: String,
    },

    /// Apply the retention policy and sweep unreferenced blobs
    Cleanup,

    /// Show command history
    History {
        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Restore a restore point and drop newer command history
    Rollback {
        /// Restore point id or prefix
        id: String,
    },

    /// List checkpoints
    Checkpoints {
        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print the resume prompt of the latest checkpoint
    Resume,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CompressionMode {
    None,
    Fast,
    Adaptive,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Manual,
    AutoPhase,
    AutoCheckpoint,
    PreOperation,
    PostOperation,
}

impl From<KindArg> for RestorePointKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Manual => RestorePointKind::Manual,
            KindArg::AutoPhase => RestorePointKind::AutoPhase,
            KindArg::AutoCheckpoint => RestorePointKind::AutoCheckpoint,
            KindArg::PreOperation => RestorePointKind::PreOperation,
            KindArg::PostOperation => RestorePointKind::PostOperation,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("rewind=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<rewind::RewindError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let root_path = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let storage_path = cli.storage.unwrap_or_else(|| root_path.join(".rewind"));

    match cli.command {
        Commands::Init {
            compression,
            delta_threshold,
            retention_days,
            exclude,
            include,
            force,
        } => cmd_init(
            root_path,
            storage_path,
            compression,
            delta_threshold,
            retention_days,
            exclude,
            include,
            force,
        ),
        Commands::Snapshot {
            message,
            kind,
            phase,
            tag,
            force_snapshot,
        } => {
            let rewind = open_rewind(&root_path, &storage_path)?;
            cmd_snapshot(&rewind, message, kind, phase, tag, force_snapshot)
        }
        Commands::List { detailed, limit } => cmd_list(&open_rewind(&root_path, &storage_path)?, detailed, limit),
        Commands::Restore { id } => cmd_restore(&open_rewind(&root_path, &storage_path)?, &id),
        Commands::Delete { id, cascade } => cmd_delete(&open_rewind(&root_path, &storage_path)?, &id, cascade),
        Commands::Stats => cmd_stats(&open_rewind(&root_path, &storage_path)?),
        Commands::Verify { id } => cmd_verify(&open_rewind(&root_path, &storage_path)?, &id),
        Commands::Cleanup => cmd_cleanup(&open_rewind(&root_path, &storage_path)?),
        Commands::History { limit } => cmd_history(&open_rewind(&root_path, &storage_path)?, limit),
        Commands::Rollback { id } => cmd_rollback(&open_rewind(&root_path, &storage_path)?, &id),
        Commands::Checkpoints { limit } => cmd_checkpoints(&open_rewind(&root_path, &storage_path)?, limit),
        Commands::Resume => cmd_resume(&open_rewind(&root_path, &storage_path)?),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_init(
    root_path: PathBuf,
    storage_path: PathBuf,
    compression: CompressionMode,
    delta_threshold: usize,
    retention_days: i64,
    exclude: Vec<String>,
    include: Vec<String>,
    force: bool,
) -> anyhow::Result<()> {
    if storage_path.join("config.json").exists() && !force {
        bail!("Directory already initialized. Use --force to reconfigure.");
    }

    println!("{}", "Initializing rewind...".blue().bold());

    let strategy = match compression {
        CompressionMode::None => CompressionStrategy::None,
        CompressionMode::Fast => CompressionStrategy::Fast,
        CompressionMode::Adaptive => "adaptive".parse()?,
    };

    let mut builder = RewindBuilder::new()
        .storage_path(storage_path)
        .compression_strategy(strategy)
        .delta_threshold(delta_threshold)
        .retention_days(retention_days)
        .include_patterns(include);
    for dir in exclude {
        builder = builder.add_exclude_dir(dir);
    }
    let rewind = builder.build(&root_path)?;

    println!("{} Initialized rewind storage", "✓".green().bold());
    println!("  Project: {}", rewind.project_root().display().to_string().cyan());
    println!("  Storage: {}", rewind.storage_path().display().to_string().cyan());
    println!("\nNext steps:");
    println!("  - Take your first restore point: {}", "rewind snapshot -m \"Initial state\"".yellow());
    Ok(())
}

fn cmd_snapshot(
    rewind: &Rewind,
    message: String,
    kind: KindArg,
    phase: Option<String>,
    tags: Vec<String>,
    force_snapshot: bool,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let spinner = spinner("Capturing project files...");

    let _writer = rewind.writer_lock().acquire();
    let meta = rewind.restore_points().create_restore_point(
        kind.into(),
        &message,
        RestorePointOptions {
            phase,
            tags,
            force_snapshot,
        },
    )?;
    spinner.finish_and_clear();

    let flavor = if meta.is_snapshot { "snapshot" } else { "delta" };
    println!("{} Created {} restore point {}", "✓".green().bold(), flavor, meta.id.yellow().bold());
    println!("  Kind: {}", meta.kind.to_string().cyan());
    println!("  Files: {}", meta.total_files.to_string().cyan());
    if let Some(changed) = meta.files_changed {
        println!("  Changed: {} files", changed.to_string().yellow());
    }
    println!("  Size: {}", format_bytes(meta.size_bytes).cyan());
    println!("  Time: {}", format_duration(round_ms(start.elapsed())).to_string().cyan());
    Ok(())
}

fn cmd_list(rewind: &Rewind, detailed: bool, limit: Option<usize>) -> anyhow::Result<()> {
    let points = rewind.restore_points().list_restore_points()?;
    if points.is_empty() {
        println!("{}", "No restore points found.".yellow());
        return Ok(());
    }

    println!("{}", "Restore points:".blue().bold());
    println!();

    let display_count = limit.unwrap_or(points.len()).min(points.len());
    for meta in points.iter().take(display_count) {
        let marker = if meta.is_snapshot { "S".green().bold() } else { "Δ".normal() };
        print!("{} {} ", marker, meta.short_id().yellow().bold());
        print!("{} ", meta.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed());
        print!("{} ", format!("[{}]", meta.kind).dimmed());
        println!("{}", meta.description.cyan());

        if detailed {
            println!(
                "    Files: {} | Size: {} | Changed: {}",
                meta.total_files.to_string().dimmed(),
                format_bytes(meta.size_bytes).dimmed(),
                meta.files_changed.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()).dimmed()
            );
            if let Some(parent) = &meta.parent_id {
                println!("    Parent: {}", rewind::utils::short_id(parent).dimmed());
            }
            if let Some(phase) = &meta.phase {
                println!("    Phase: {}", phase.dimmed());
            }
            if !meta.tags.is_empty() {
                println!("    Tags: {}", meta.tags.join(", ").dimmed());
            }
            println!();
        }
    }

    if display_count < points.len() {
        println!("\n{}", format!("Showing {} of {} restore points", display_count, points.len()).dimmed());
    }
    Ok(())
}

fn cmd_restore(rewind: &Rewind, id: &str) -> anyhow::Result<()> {
    let full_id = rewind.restore_points().resolve_id(id)?;
    println!("{} {}", "Restoring to restore point".blue().bold(), rewind::utils::short_id(&full_id).yellow());

    let spinner = spinner("Restoring files...");
    let _writer = rewind.writer_lock().acquire();
    let outcome = rewind.restore_points().restore(&full_id)?;
    spinner.finish_and_clear();

    println!("{} Restoration complete", "✓".green().bold());
    println!("  Files written: {}", outcome.write.files_written.to_string().cyan());
    println!("  Files unchanged: {}", outcome.write.files_unchanged.to_string().dimmed());
    println!("  Files deleted: {}", outcome.write.files_deleted.to_string().yellow());
    println!("  Deltas replayed: {}", outcome.deltas_replayed.to_string().cyan());
    println!("  Bytes written: {}", format_bytes(outcome.write.bytes_written).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(outcome.duration_ms)).to_string().cyan()
    );

    if !outcome.write.warnings.is_empty() {
        println!("\n{}", "Warnings:".yellow().bold());
        for warning in &outcome.write.warnings {
            println!("  - {}", warning.yellow());
        }
    }
    Ok(())
}

fn cmd_delete(rewind: &Rewind, id: &str, cascade: bool) -> anyhow::Result<()> {
    let full_id = rewind.restore_points().resolve_id(id)?;
    let _writer = rewind.writer_lock().acquire();
    if cascade {
        let deleted = rewind.restore_points().delete_restore_point_cascade(&full_id)?;
        println!("{} Deleted {} restore points", "✓".green().bold(), deleted.len().to_string().yellow());
    } else {
        rewind.restore_points().delete_restore_point(&full_id)?;
        println!("{} Deleted restore point {}", "✓".green().bold(), rewind::utils::short_id(&full_id).yellow());
    }
    Ok(())
}

fn cmd_stats(rewind: &Rewind) -> anyhow::Result<()> {
    let stats = rewind.restore_points().get_statistics()?;
    let commands = rewind.commands().statistics();
    let checkpoints = rewind.checkpoints().list_checkpoints()?;

    println!("{}", "Restore points:".blue().bold());
    println!("  Total: {}", stats.total.to_string().cyan());
    println!(
        "  Snapshots: {} ({})",
        stats.snapshots.to_string().cyan(),
        format_bytes(stats.snapshot_bytes)
    );
    println!("  Deltas: {} ({})", stats.deltas.to_string().cyan(), format_bytes(stats.delta_bytes));
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!(
            "  Range: {} .. {}",
            oldest.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            newest.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }

    println!("\n{}", "Objects:".blue().bold());
    println!("  Blobs: {}", stats.blob_count.to_string().cyan());
    println!("  Size: {}", format_bytes(stats.blob_bytes).cyan());
    println!("  Storage total: {}", format_bytes(rewind::utils::dir_size(rewind.storage_path())).cyan());

    println!("\n{}", "Commands:".blue().bold());
    println!("  History: {}", commands.total.to_string().cyan());
    for (status, count) in &commands.by_status {
        println!("  {}: {}", status, count);
    }
    println!("  Redo stack: {}", commands.redo_depth);

    println!("\n{}", "Checkpoints:".blue().bold());
    println!("  Total: {}", checkpoints.len().to_string().cyan());
    Ok(())
}

fn cmd_verify(rewind: &Rewind, id: &str) -> anyhow::Result<()> {
    let full_id = rewind.restore_points().resolve_id(id)?;
    let report = rewind.restore_points().verify_restore_point(&full_id)?;

    println!("{}", "Verification Report:".blue().bold());
    println!("  Restore point: {}", rewind::utils::short_id(&report.restore_point_id).yellow());
    println!("  Checksum: {}", check_mark(report.checksum_valid));
    if let Some(parent) = report.parent_present {
        println!("  Parent snapshot: {}", check_mark(parent));
    }
    for hash in &report.missing_blobs {
        println!("  {} missing blob {}", "✗".red(), &hash[..hash.len().min(16)]);
    }
    for hash in &report.corrupt_blobs {
        println!("  {} corrupt blob {}", "✗".red(), &hash[..hash.len().min(16)]);
    }
    for error in &report.errors {
        println!("  {} {}", "✗".red(), error);
    }

    if report.is_valid() {
        println!("\n{} Restore point is valid", "✓".green().bold());
        Ok(())
    } else {
        bail!("restore point {} failed verification", report.restore_point_id)
    }
}

fn cmd_cleanup(rewind: &Rewind) -> anyhow::Result<()> {
    let _writer = rewind.writer_lock().acquire();
    let report = rewind.restore_points().cleanup_expired()?;
    let gc = if report.deleted.is_empty() {
        rewind.restore_points().collect_garbage()?
    } else {
        report.gc.clone()
    };

    println!("{} Cleanup complete", "✓".green().bold());
    println!("  Restore points removed: {}", report.deleted.len().to_string().yellow());
    if !report.kept_snapshots.is_empty() {
        println!(
            "  Expired snapshots kept for live deltas: {}",
            report.kept_snapshots.len().to_string().dimmed()
        );
    }
    println!("  Objects deleted: {}", gc.objects_deleted.to_string().yellow());
    println!("  Space reclaimed: {}", format_bytes(gc.bytes_reclaimed).cyan());
    Ok(())
}

fn cmd_history(rewind: &Rewind, limit: Option<usize>) -> anyhow::Result<()> {
    let history = rewind.commands().history();
    if history.is_empty() {
        println!("{}", "No commands recorded.".yellow());
        return Ok(());
    }

    println!("{}", "Command history:".blue().bold());
    println!();
    let display_count = limit.unwrap_or(history.len()).min(history.len());
    for command in history.iter().rev().take(display_count) {
        let status = match command.status {
            rewind::CommandStatus::Completed => command.status.to_string().green(),
            rewind::CommandStatus::Failed => command.status.to_string().red(),
            rewind::CommandStatus::Undone => command.status.to_string().yellow(),
            _ => command.status.to_string().normal(),
        };
        print!("  {} ", command.short_id().yellow().bold());
        print!("{} ", command.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed());
        print!("{:<10} ", status);
        print!("{} ", command.kind.bold());
        println!("{}", command.description.cyan());
        if let Some(error) = &command.error {
            println!("      {}", error.red());
        }
    }
    Ok(())
}

fn cmd_rollback(rewind: &Rewind, id: &str) -> anyhow::Result<()> {
    let full_id = rewind.restore_points().resolve_id(id)?;
    let spinner = spinner("Rolling back...");
    let result = rewind.commands().rollback_to_restore_point(&full_id)?;
    spinner.finish_and_clear();

    println!(
        "{} Rolled back to restore point {}",
        "✓".green().bold(),
        rewind::utils::short_id(&full_id).yellow()
    );
    println!("  Commands dropped: {}", result.commands_undone.len().to_string().yellow());
    Ok(())
}

fn cmd_checkpoints(rewind: &Rewind, limit: Option<usize>) -> anyhow::Result<()> {
    let checkpoints = rewind.checkpoints().list_checkpoints()?;
    if checkpoints.is_empty() {
        println!("{}", "No checkpoints found.".yellow());
        return Ok(());
    }

    println!("{}", "Checkpoints:".blue().bold());
    println!();
    let display_count = limit.unwrap_or(checkpoints.len()).min(checkpoints.len());
    for meta in checkpoints.iter().take(display_count) {
        print!("  {} ", meta.short_id().yellow().bold());
        print!("{} ", meta.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed());
        print!("{} ", format!("[{}]", meta.kind).dimmed());
        print!("{} ", meta.description.cyan());
        println!(
            "{}",
            format!(
                "phase={} todos={}/{}",
                meta.phase.as_deref().unwrap_or("-"),
                meta.todos_completed,
                meta.todos_total
            )
            .dimmed()
        );
    }
    Ok(())
}

fn cmd_resume(rewind: &Rewind) -> anyhow::Result<()> {
    match rewind.checkpoints().resume_prompt()? {
        Some(prompt) => {
            println!("{}", prompt);
            Ok(())
        }
        None => {
            println!("{}", "No checkpoints yet; nothing to resume.".yellow());
            Ok(())
        }
    }
}

// Helper functions

/// Open existing storage
fn open_rewind(root_path: &Path, storage_path: &Path) -> anyhow::Result<Rewind> {
    if !storage_path.join("config.json").exists() {
        bail!("Not a rewind project. Run 'rewind init' first.");
    }
    Rewind::open_at(root_path, storage_path)
        .with_context(|| format!("failed to open storage at {}", storage_path.display()))
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn check_mark(ok: bool) -> ColoredString {
    if ok {
        "✓ Valid".green()
    } else {
        "✗ Invalid".red()
    }
}

fn round_ms(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
