//! Copying files and folders between storage backends.
//!
//! Both functions work purely through [`FileStorage`], so any pair of
//! backends (or handles) can be used as source and target.

use futures::{stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use storebridge_common::{CopiedFile, Error, FailedCopy, FolderCopyFailure, Result, StoragePath};

use crate::provider::{ByteStream, FileStorage, WriteMode, WriteStream};

/// Default number of files a folder copy transfers at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Where a folder copy places each file under the target prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetLayout {
    /// `prefix` + path relative to the copied folder.
    ///
    /// Copying `/src` to `/dst` writes `/src/a/b.txt` to `/dst/a/b.txt`.
    #[default]
    RelativeToSource,
    /// `prefix` + full listed path of the source file.
    ///
    /// Copying `/src` to `/dst` writes `/src/a/b.txt` to `/dst/src/a/b.txt`.
    FullSourcePath,
}

impl TargetLayout {
    /// Compute the target path of `entry`, listed below `source_root`.
    pub fn target_path(
        &self,
        source_root: &StoragePath,
        target_prefix: &StoragePath,
        entry: &StoragePath,
    ) -> StoragePath {
        match self {
            TargetLayout::RelativeToSource => match entry.strip_prefix(source_root) {
                Some(relative) => target_prefix.join_path(&relative),
                None => target_prefix.join_path(entry),
            },
            TargetLayout::FullSourcePath => target_prefix.join_path(entry),
        }
    }
}

/// Options shared by [`copy_file`] and [`copy_folder`].
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Write mode used on the target.
    pub mode: WriteMode,
    /// Maximum number of files copied at once by a folder copy.
    pub max_concurrency: usize,
    /// Placement of folder copy targets under the prefix.
    pub layout: TargetLayout,
    /// Cancels every in-flight transfer at its next chunk.
    pub cancel: CancellationToken,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            mode: WriteMode::Create,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            layout: TargetLayout::RelativeToSource,
            cancel: CancellationToken::new(),
        }
    }
}

impl CopyOptions {
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Values below 1 are treated as 1.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_layout(mut self, layout: TargetLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Files written by a fully successful folder copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderCopyReport {
    pub copied: Vec<CopiedFile>,
}

impl FolderCopyReport {
    /// Total bytes written across all files.
    pub fn total_bytes(&self) -> u64 {
        self.copied.iter().map(|c| c.bytes).sum()
    }
}

/// Copy one file between two storages, returning the number of bytes written.
///
/// The read stream is dropped and the write stream committed or aborted on
/// every exit path. Failures after both streams are open are wrapped in
/// [`Error::Transfer`]; an abort failure during unwinding is kept in its
/// `suppressed` list.
///
/// # Errors
/// - Source not found
/// - Target cannot be opened for writing
/// - Read, write or commit failure
/// - Cancelled through `options.cancel`
pub async fn copy_file(
    source: &dyn FileStorage,
    source_path: &StoragePath,
    target: &dyn FileStorage,
    target_path: &StoragePath,
    options: &CopyOptions,
) -> Result<u64> {
    let cancel = &options.cancel;

    let mut reader = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        reader = source.open_read(source_path) => reader?,
    };

    let mut writer = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        writer = target.open_write(target_path, options.mode) => writer?,
    };

    let pumped = pump(&mut reader, &mut writer, cancel).await;
    drop(reader);

    let outcome = match pumped {
        Ok(bytes) => writer.commit().await.map(|()| bytes),
        Err(e) => {
            let mut suppressed = Vec::new();
            if let Err(abort_err) = writer.abort().await {
                warn!("Failed to abort write to {}: {}", target_path, abort_err);
                suppressed.push(abort_err);
            }
            return Err(transfer_error(source_path, target_path, e, suppressed));
        }
    };

    match outcome {
        Ok(bytes) => {
            debug!("Copied {} bytes from {} to {}", bytes, source_path, target_path);
            Ok(bytes)
        }
        Err(e) => Err(transfer_error(source_path, target_path, e, Vec::new())),
    }
}

/// Move chunks from `reader` to `writer` until the reader is exhausted.
async fn pump(
    reader: &mut ByteStream,
    writer: &mut Box<dyn WriteStream>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = reader.try_next() => next?,
        };
        let Some(chunk) = next else {
            return Ok(total);
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            written = writer.write(&chunk) => written?,
        }
        total += chunk.len() as u64;
    }
}

fn transfer_error(
    source_path: &StoragePath,
    target_path: &StoragePath,
    source: Error,
    suppressed: Vec<Error>,
) -> Error {
    Error::Transfer {
        source_path: source_path.to_string(),
        target_path: target_path.to_string(),
        source: Box::new(source),
        suppressed,
    }
}

/// Copy every file below `source_path` to `target_prefix`.
///
/// Files are copied concurrently, at most `options.max_concurrency` at a
/// time. A failing file does not stop its siblings; every copy is awaited
/// before returning. If any file failed the result is
/// [`Error::PartialCopy`] listing both the copied and the failed files.
/// Files already written are never rolled back.
///
/// Folders in the listing are skipped; backends create intermediate folders
/// when a file is written.
///
/// # Errors
/// - Listing `source_path` failed (nothing is copied)
/// - One or more files failed to copy
pub async fn copy_folder(
    source: &dyn FileStorage,
    source_path: &StoragePath,
    recursive: bool,
    target: &dyn FileStorage,
    target_prefix: &StoragePath,
    options: &CopyOptions,
) -> Result<FolderCopyReport> {
    let entries = source.list(Some(source_path), recursive).await?;

    let plan: Vec<(StoragePath, StoragePath)> = entries
        .into_iter()
        .filter(|entry| !entry.is_directory)
        .map(|entry| {
            let target_path = options
                .layout
                .target_path(source_path, target_prefix, &entry.path);
            (entry.path, target_path)
        })
        .collect();

    info!(
        "Copying {} files from {} ({}) to {} ({})",
        plan.len(),
        source_path,
        source.kind(),
        target_prefix,
        target.kind()
    );

    let results: Vec<(StoragePath, StoragePath, Result<u64>)> = stream::iter(plan)
        .map(|(source_file, target_file)| async move {
            // Copies that have not started yet must not open any stream.
            let result = if options.cancel.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                copy_file(source, &source_file, target, &target_file, options).await
            };
            (source_file, target_file, result)
        })
        .buffer_unordered(options.max_concurrency.max(1))
        .collect()
        .await;

    let mut copied = Vec::new();
    let mut failed = Vec::new();
    for (source_file, target_file, result) in results {
        match result {
            Ok(bytes) => copied.push(CopiedFile {
                source: source_file,
                target: target_file,
                bytes,
            }),
            Err(error) => {
                warn!("Failed to copy {} to {}: {}", source_file, target_file, error);
                failed.push(FailedCopy {
                    source: source_file,
                    target: target_file,
                    error,
                });
            }
        }
    }
    copied.sort_by(|a, b| a.source.cmp(&b.source));
    failed.sort_by(|a, b| a.source.cmp(&b.source));

    if failed.is_empty() {
        info!("Copied {} files to {}", copied.len(), target_prefix);
        Ok(FolderCopyReport { copied })
    } else {
        info!(
            "Folder copy to {} finished with {} failures ({} copied)",
            target_prefix,
            failed.len(),
            copied.len()
        );
        Err(Error::PartialCopy(Box::new(FolderCopyFailure {
            copied,
            failed,
        })))
    }
}
