//! StoreBridge CLI - Command line interface for configured storages.
//!
//! Storages are defined in `appsettings.json` (plus an optional
//! `appsettings.Development.json` overlay) and addressed by name.

mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use storebridge_common::{Error, StorageName, StoragePath};
use storebridge_storage::{
    copy_file, copy_folder, CopyOptions, FileStorage, FileStorageExt, StorageManager, TargetLayout,
    WriteMode,
};

use settings::Settings;

const SKIDOO_FILE_NAME: &str = "23skidoo.txt";

#[derive(Parser)]
#[command(name = "storebridge")]
#[command(about = "StoreBridge - Move files between configured storages")]
#[command(version)]
struct Cli {
    /// Directory containing appsettings.json.
    #[arg(short, long, global = true, default_value = ".")]
    config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write, copy and remove a sample file, then copy Local:/source/ to Cloud1.
    Demo,

    /// List the contents of a folder.
    List {
        /// Storage name (e.g. Local, Temp, Cloud1).
        storage: String,

        /// Folder to list.
        #[arg(default_value = "/")]
        path: String,

        /// List every entry below the folder.
        #[arg(short, long)]
        recursive: bool,
    },

    /// Print a file to stdout.
    Cat {
        storage: String,
        path: String,
    },

    /// Write text to a file.
    Write {
        storage: String,
        path: String,
        text: String,

        /// Append instead of replacing the file.
        #[arg(long)]
        append: bool,
    },

    /// Remove a file or folder.
    Rm {
        storage: String,
        path: String,

        /// Remove a non-empty folder with its contents.
        #[arg(short, long)]
        recursive: bool,
    },

    /// Move or rename a file or folder.
    Mv {
        storage: String,
        from: String,
        to: String,
    },

    /// Copy a file between storages.
    Copy {
        src_storage: String,
        src_path: String,
        dst_storage: String,
        dst_path: String,

        /// Append to the target instead of replacing it.
        #[arg(long)]
        append: bool,
    },

    /// Copy the files of a folder between storages.
    CopyFolder {
        src_storage: String,
        src_path: String,
        dst_storage: String,
        dst_prefix: String,

        /// Include files in subfolders.
        #[arg(short, long)]
        recursive: bool,

        /// Place files under the prefix by their full source path.
        #[arg(long)]
        full_path: bool,

        /// Maximum number of files copied at once.
        #[arg(short = 'j', long, default_value_t = storebridge_storage::copy::DEFAULT_MAX_CONCURRENCY)]
        jobs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::load(&cli.config).context("Failed to load settings")?;
    let manager = StorageManager::new(settings.storage_options())
        .await
        .context("Failed to build storages")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let command = cli.command;
    manager
        .using(|m| Box::pin(run(m, command, cancel)))
        .await
}

async fn run(manager: &StorageManager, command: Commands, cancel: CancellationToken) -> Result<()> {
    match command {
        Commands::Demo => cmd_demo(manager, cancel).await,

        Commands::List {
            storage,
            path,
            recursive,
        } => cmd_list(manager, &storage, &path, recursive).await,

        Commands::Cat { storage, path } => cmd_cat(manager, &storage, &path).await,

        Commands::Write {
            storage,
            path,
            text,
            append,
        } => cmd_write(manager, &storage, &path, &text, append).await,

        Commands::Rm {
            storage,
            path,
            recursive,
        } => cmd_rm(manager, &storage, &path, recursive).await,

        Commands::Mv { storage, from, to } => cmd_mv(manager, &storage, &from, &to).await,

        Commands::Copy {
            src_storage,
            src_path,
            dst_storage,
            dst_path,
            append,
        } => {
            let mode = if append {
                WriteMode::Append
            } else {
                WriteMode::Create
            };
            let options = CopyOptions::default().with_mode(mode).with_cancel(cancel);
            cmd_copy(manager, &src_storage, &src_path, &dst_storage, &dst_path, &options).await
        }

        Commands::CopyFolder {
            src_storage,
            src_path,
            dst_storage,
            dst_prefix,
            recursive,
            full_path,
            jobs,
        } => {
            let layout = if full_path {
                TargetLayout::FullSourcePath
            } else {
                TargetLayout::RelativeToSource
            };
            let options = CopyOptions::default()
                .with_layout(layout)
                .with_max_concurrency(jobs)
                .with_cancel(cancel);
            cmd_copy_folder(
                manager,
                &src_storage,
                &src_path,
                recursive,
                &dst_storage,
                &dst_prefix,
                &options,
            )
            .await
        }
    }
}

fn parse_path(path: &str) -> Result<StoragePath> {
    StoragePath::parse(path).with_context(|| format!("Invalid path: {}", path))
}

/// The sample scenario: Temp -> Local, then Local:/source/ -> Cloud1.
async fn cmd_demo(manager: &StorageManager, cancel: CancellationToken) -> Result<()> {
    let local = manager.get(StorageName::Local)?;
    let temp = manager.get(StorageName::Temp)?;
    let options = CopyOptions::default().with_cancel(cancel);

    let note = parse_path(SKIDOO_FILE_NAME)?;
    let note_copy = parse_path(&format!("/newfolder5/{}", SKIDOO_FILE_NAME))?;

    temp.write_text(&note, "23 skidoo!")
        .await
        .context("Failed to write sample file")?;
    println!("Wrote Temp:{}", note);

    copy_file(&temp, &note, &local, &note_copy, &options)
        .await
        .context("Failed to copy sample file")?;
    println!("Copied Temp:{} to Local:{}", note, note_copy);

    temp.remove(&note, false)
        .await
        .context("Failed to remove sample file")?;
    println!("Removed Temp:{}", note);

    let cloud = match manager.get(StorageName::Cloud1) {
        Ok(cloud) => cloud,
        Err(Error::NotRegistered(_)) => {
            info!("Cloud1 is not configured, skipping folder copy");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let source = parse_path("/source/")?;
    if !local.exists(&source).await? {
        info!("Local:{} does not exist, skipping folder copy", source);
        return Ok(());
    }

    let report = copy_folder(&local, &source, true, &cloud, &parse_path("/newfolder23/")?, &options)
        .await
        .context("Failed to copy folder")?;
    println!(
        "Copied {} files ({} bytes) from Local:{} to Cloud1:/newfolder23",
        report.copied.len(),
        report.total_bytes(),
        source
    );

    Ok(())
}

/// List folder contents.
async fn cmd_list(manager: &StorageManager, storage: &str, path: &str, recursive: bool) -> Result<()> {
    let storage = manager.lookup(storage)?;
    let folder = parse_path(path)?;

    let entries = storage
        .list(Some(&folder), recursive)
        .await
        .context("Failed to list folder")?;

    if entries.is_empty() {
        println!("Folder is empty.");
    } else {
        println!("Contents of {}:{}:", storage.name(), folder);
        for entry in entries {
            if entry.is_directory {
                println!("  [DIR]  {}/", entry.path);
            } else {
                let size_str = entry.size.map(|s| format!("{} bytes", s)).unwrap_or_default();
                println!("  [FILE] {} ({})", entry.path, size_str);
            }
        }
    }

    Ok(())
}

/// Stream a file to stdout.
async fn cmd_cat(manager: &StorageManager, storage: &str, path: &str) -> Result<()> {
    let storage = manager.lookup(storage)?;
    let path = parse_path(path)?;

    let mut stream = storage
        .open_read(&path)
        .await
        .with_context(|| format!("Failed to open {}", path))?;
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = stream.try_next().await? {
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;

    Ok(())
}

/// Write text to a file.
async fn cmd_write(
    manager: &StorageManager,
    storage: &str,
    path: &str,
    text: &str,
    append: bool,
) -> Result<()> {
    let storage = manager.lookup(storage)?;
    let path = parse_path(path)?;

    let written = if append {
        storage.append_text(&path, text).await
    } else {
        storage.write_text(&path, text).await
    };
    written.with_context(|| format!("Failed to write {}", path))?;

    println!("Wrote {} bytes to {}:{}", text.len(), storage.name(), path);
    Ok(())
}

/// Remove a file or folder.
async fn cmd_rm(manager: &StorageManager, storage: &str, path: &str, recursive: bool) -> Result<()> {
    let storage = manager.lookup(storage)?;
    let path = parse_path(path)?;

    storage
        .remove(&path, recursive)
        .await
        .with_context(|| format!("Failed to remove {}", path))?;

    println!("Removed {}:{}", storage.name(), path);
    Ok(())
}

/// Move or rename within one storage.
async fn cmd_mv(manager: &StorageManager, storage: &str, from: &str, to: &str) -> Result<()> {
    let storage = manager.lookup(storage)?;
    let from = parse_path(from)?;
    let to = parse_path(to)?;

    storage
        .rename(&from, &to)
        .await
        .with_context(|| format!("Failed to move {} to {}", from, to))?;

    println!("Moved {}:{} to {}", storage.name(), from, to);
    Ok(())
}

/// Copy one file between storages.
async fn cmd_copy(
    manager: &StorageManager,
    src_storage: &str,
    src_path: &str,
    dst_storage: &str,
    dst_path: &str,
    options: &CopyOptions,
) -> Result<()> {
    let source = manager.lookup(src_storage)?;
    let target = manager.lookup(dst_storage)?;
    let src_path = parse_path(src_path)?;
    let dst_path = parse_path(dst_path)?;

    let bytes = copy_file(&source, &src_path, &target, &dst_path, options)
        .await
        .context("Copy failed")?;

    println!(
        "Copied {} bytes from {}:{} to {}:{}",
        bytes,
        source.name(),
        src_path,
        target.name(),
        dst_path
    );
    Ok(())
}

/// Copy a folder between storages.
async fn cmd_copy_folder(
    manager: &StorageManager,
    src_storage: &str,
    src_path: &str,
    recursive: bool,
    dst_storage: &str,
    dst_prefix: &str,
    options: &CopyOptions,
) -> Result<()> {
    let source = manager.lookup(src_storage)?;
    let target = manager.lookup(dst_storage)?;
    let src_path = parse_path(src_path)?;
    let dst_prefix = parse_path(dst_prefix)?;

    match copy_folder(&source, &src_path, recursive, &target, &dst_prefix, options).await {
        Ok(report) => {
            for copied in &report.copied {
                println!("  {} -> {} ({} bytes)", copied.source, copied.target, copied.bytes);
            }
            println!(
                "Copied {} files ({} bytes) to {}:{}",
                report.copied.len(),
                report.total_bytes(),
                target.name(),
                dst_prefix
            );
            Ok(())
        }
        Err(Error::PartialCopy(failure)) => {
            for copied in &failure.copied {
                println!("  {} -> {} ({} bytes)", copied.source, copied.target, copied.bytes);
            }
            for failed in &failure.failed {
                println!("  [FAILED] {} -> {}: {}", failed.source, failed.target, failed.error);
            }
            anyhow::bail!(
                "{} of {} files failed to copy",
                failure.failed.len(),
                failure.failed.len() + failure.copied.len()
            )
        }
        Err(e) => Err(e).context("Folder copy failed"),
    }
}
