//! Whole-file atomic writes
//!
//! Every persisted document is written to a temporary sibling, flushed, and
//! renamed over the target. Readers see either the previous contents or the
//! new contents, never a prefix of either.
//!
//! Before a replace, the current file is copied to a timestamped backup
//! (`<name>.<UTC timestamp>.bak`); only the newest [`MAX_BACKUPS`] are kept.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Number of rotating backups kept per file
pub const MAX_BACKUPS: usize = 10;

const BACKUP_SUFFIX: &str = ".bak";

/// Atomically replace `path` with `data`, keeping a backup of the old file.
pub async fn replace(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp = write_temp(path, data).await?;

    if fs::try_exists(path).await.unwrap_or(false) {
        if let Err(err) = backup(path).await {
            tracing::warn!(path = %path.display(), error = %err, "Backup before replace failed");
        }
    }

    if let Err(err) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(err);
    }

    if let Err(err) = prune_backups(path, MAX_BACKUPS).await {
        tracing::warn!(path = %path.display(), error = %err, "Pruning backups failed");
    }

    tracing::debug!(path = %path.display(), bytes = data.len(), "File replaced");
    Ok(())
}

/// Atomically create `path` with `data`. Fails with
/// [`io::ErrorKind::AlreadyExists`] if the target is already present, so a
/// written record is never rewritten.
pub async fn write_new(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp = write_temp(path, data).await?;

    // hard_link refuses to clobber an existing target
    let linked = fs::hard_link(&temp, path).await;
    let _ = fs::remove_file(&temp).await;
    linked?;

    tracing::debug!(path = %path.display(), bytes = data.len(), "File created");
    Ok(())
}

/// Backups of `path`, oldest first
pub async fn list_backups(path: &Path) -> io::Result<Vec<PathBuf>> {
    let (Some(dir), Some(name)) = (path.parent(), file_name(path)) else {
        return Ok(Vec::new());
    };
    let prefix = format!("{name}.");

    let mut backups = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(backups),
        Err(err) => return Err(err),
    };
    while let Some(entry) = entries.next_entry().await? {
        let entry_name = entry.file_name();
        let Some(entry_name) = entry_name.to_str() else {
            continue;
        };
        if entry_name.starts_with(&prefix) && entry_name.ends_with(BACKUP_SUFFIX) {
            backups.push(entry.path());
        }
    }

    // Fixed-width timestamps sort chronologically
    backups.sort();
    Ok(backups)
}

async fn write_temp(path: &Path, data: &[u8]) -> io::Result<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = file_name(path).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("no file name in {}", path.display()))
    })?;
    let temp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let result = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;

    if let Err(err) = result {
        let _ = fs::remove_file(&temp).await;
        return Err(err);
    }
    Ok(temp)
}

async fn backup(path: &Path) -> io::Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S%.9f");
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".{stamp}{BACKUP_SUFFIX}"));
    let target = PathBuf::from(target);

    // Copy, not rename: the target must never be missing for readers
    fs::copy(path, &target).await?;
    Ok(target)
}

async fn prune_backups(path: &Path, keep: usize) -> io::Result<()> {
    let backups = list_backups(path).await?;
    if backups.len() <= keep {
        return Ok(());
    }
    let excess = backups.len() - keep;
    for old in &backups[..excess] {
        fs::remove_file(old).await?;
        tracing::debug!(path = %old.display(), "Old backup removed");
    }
    Ok(())
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
