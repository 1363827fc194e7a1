use crate::backup::artifact::is_artifact_file_name;
use std::fs::read_dir;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Deletes backup artifacts in `dir` whose modification time is more than
/// `retention_days` days before `now`. Returns the number of deleted files.
///
/// Only regular files directly inside `dir` that look like artifacts (see
/// [`is_artifact_file_name`]) are considered. A file that can't be inspected
/// or removed is logged and skipped; cleanup never fails as a whole.
/// `retention_days <= 0` disables cleanup.
pub fn cleanup_expired(dir: &Path, retention_days: i64, now: SystemTime) -> usize {
    cleanup_expired_with(dir, retention_days, now, |path| std::fs::remove_file(path))
}

fn cleanup_expired_with<F>(dir: &Path, retention_days: i64, now: SystemTime, mut remove: F) -> usize
where
    F: FnMut(&Path) -> io::Result<()>,
{
    if retention_days <= 0 {
        return 0;
    }
    let Some(cutoff) = (retention_days as u64)
        .checked_mul(SECONDS_PER_DAY)
        .and_then(|secs| now.checked_sub(Duration::from_secs(secs)))
    else {
        return 0;
    };

    let entries = match read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Reading backup directory {dir:?} failed: {e}");
            return 0;
        }
    };

    let mut deleted = 0;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {dir:?}: {e}");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_name().to_str().is_some_and(is_artifact_file_name) {
            continue;
        }
        // DirEntry::metadata does not follow symlinks
        let modified = match entry.metadata() {
            Ok(md) if md.is_file() => md.modified(),
            Ok(_) => continue,
            Err(e) => Err(e),
        };
        let modified = match modified {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!("Skipping {path:?}, modification time unavailable: {e}");
                continue;
            }
        };

        if modified < cutoff {
            match remove(&path) {
                Ok(()) => {
                    tracing::debug!("Removed out of retention backup {path:?}");
                    deleted += 1;
                }
                Err(e) => tracing::warn!("Removing out of retention backup {path:?} failed: {e}"),
            }
        }
    }

    deleted
}
