//! tidefs Admin - Offline journal maintenance
//!
//! Works directly on a journal directory while no master is running.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tidefs_common::{Config, FsPath};
use tidefs_journal::{LocalUfs, UnderFileSystem, edit_log};
use tidefs_master::{FileInfo, MetadataStore, NamespaceView};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tidefs-admin")]
#[command(about = "tidefs master journal admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Journal directory, overrides the configuration
    #[arg(short, long, env = "TIDEFS_JOURNAL_FOLDER")]
    journal_folder: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a path and its children without modifying the journal
    Ls {
        /// Namespace path
        #[arg(default_value = "/")]
        path: String,
        /// List every descendant
        #[arg(short, long)]
        recursive: bool,
    },
    /// Show everything known about a path as JSON, read-only
    Stat {
        /// Namespace path
        path: String,
    },
    /// Write a fresh image and empty the edit log
    Checkpoint,
    /// Drop completed edit log segments below INDEX and renumber the rest
    RetainFrom {
        /// First segment to keep
        index: u64,
    },
    /// Print every edit log entry as JSON lines
    Dump,
    /// Delete the image and all edit log segments
    Format {
        /// Required, the namespace is lost
        #[arg(long)]
        force: bool,
    },
}

/// Format bytes as a human-readable size string.
fn format_size(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;

    if bytes >= GIB && bytes.is_multiple_of(GIB) {
        format!("{} GiB", bytes / GIB)
    } else if bytes >= MIB && bytes.is_multiple_of(MIB) {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB && bytes.is_multiple_of(KIB) {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn format_kind(info: &FileInfo) -> &'static str {
    match (info.folder, info.complete) {
        (true, _) => "dir",
        (false, true) => "file",
        (false, false) => "file*",
    }
}

fn parse_path(path: &str) -> Result<FsPath> {
    FsPath::parse(path).with_context(|| format!("invalid path '{path}'"))
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(folder) = args.journal_folder {
        config.journal.folder = folder;
    }
    config.journal.validate()?;
    info!("Using journal at {}", config.journal.folder.display());

    match args.command {
        Commands::Ls { path, recursive } => {
            let path = parse_path(&path)?;
            let view = NamespaceView::load_local(&config.journal)?;
            let entries = view.list_info(&path, recursive)?;

            println!("{:<6} {:>10} {:>6} {:>8}  PATH", "KIND", "SIZE", "PINNED", "ID");
            for info in &entries {
                println!(
                    "{:<6} {:>10} {:>6} {:>8}  {}",
                    format_kind(info),
                    format_size(info.length),
                    if info.pinned { "yes" } else { "-" },
                    info.id,
                    info.path
                );
            }
        }
        Commands::Stat { path } => {
            let path = parse_path(&path)?;
            let view = NamespaceView::load_local(&config.journal)?;
            let info = view.get_info_by_path(&path)?;
            let table = view.get_table_info(info.id).ok();

            println!("{}", serde_json::to_string_pretty(&info)?);
            if let Some(table) = table {
                println!("{}", serde_json::to_string_pretty(&table)?);
            }
        }
        Commands::Checkpoint => {
            let store = MetadataStore::open_local(&config)?;
            store.checkpoint()?;
            let paths = store.journal_paths();
            store.stop()?;
            println!("Checkpoint written to {}", paths.image.display());
        }
        Commands::RetainFrom { index } => {
            let ufs = LocalUfs::new();
            let retained = edit_log::retain_from(&ufs, &config.journal, index)?;
            println!("{retained} completed segments retained");
        }
        Commands::Dump => {
            let ufs = LocalUfs::new();
            let mut count = 0u64;
            let segments = edit_log::for_each_entry(&ufs, &config.journal, |segment, entry| {
                let line = serde_json::json!({
                    "segment": segment.display().to_string(),
                    "entry": entry,
                });
                println!("{line}");
                count += 1;
                Ok(())
            })?;
            info!("Dumped {} entries from {} segments", count, segments);
        }
        Commands::Format { force } => {
            if !force {
                bail!(
                    "refusing to format {} without --force",
                    config.journal.folder.display()
                );
            }
            let ufs = LocalUfs::new();
            let journal = &config.journal;
            for path in [journal.image_path(), journal.log_path()] {
                ufs.delete(&path, false)
                    .with_context(|| format!("failed to delete {}", path.display()))?;
            }
            ufs.delete(&journal.completed_path(), true)
                .with_context(|| format!("failed to delete {}", journal.completed_path().display()))?;
            println!("Formatted {}", journal.folder.display());
        }
    }

    Ok(())
}
