//! Backup artifact naming.
//!
//! Artifacts are named `backup_<database>_<YYYYMMDD_HHMMSS>.sql[.gz]` in local
//! time. The `backup_` prefix and the `.sql` / `.sql.gz` suffix are the only
//! markers retention relies on; the embedded timestamp is informational and
//! never used to decide an artifact's age.

use crate::backup::cancel::CancellationToken;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use getset::{CopyGetters, Getters};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ARTIFACT_PREFIX: &str = "backup_";
pub const SQL_EXT: &str = ".sql";
pub const COMPRESSED_SQL_EXT: &str = ".sql.gz";
static TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Length of a formatted [`TIME_FORMAT`] timestamp.
const TIME_LEN: usize = 15;
const RESERVE_ATTEMPTS: usize = 3;

/// A completed backup file.
#[derive(Clone, Debug, Serialize, Getters, CopyGetters)]
pub struct BackupArtifact {
    #[getset(get = "pub")]
    file_path: PathBuf,
    #[getset(get_copy = "pub")]
    size_bytes: u64,
    #[getset(get = "pub")]
    created_at: DateTime<Local>,
}

impl BackupArtifact {
    pub fn new(file_path: PathBuf, size_bytes: u64, created_at: DateTime<Local>) -> Self {
        Self {
            file_path,
            size_bytes,
            created_at,
        }
    }
}

/// Fields recovered from an artifact file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactName {
    pub database_name: String,
    pub timestamp: NaiveDateTime,
    pub compressed: bool,
}

impl ArtifactName {
    pub fn parse(file_name: &str) -> Option<Self> {
        let rest = file_name.strip_prefix(ARTIFACT_PREFIX)?;
        let (rest, compressed) = match rest.strip_suffix(COMPRESSED_SQL_EXT) {
            Some(rest) => (rest, true),
            None => (rest.strip_suffix(SQL_EXT)?, false),
        };

        // `<database>_<timestamp>`, the database name may contain underscores
        let split = rest.len().checked_sub(TIME_LEN + 1)?;
        if split == 0 || !rest.is_char_boundary(split) || rest.as_bytes()[split] != b'_' {
            return None;
        }
        let timestamp = NaiveDateTime::parse_from_str(&rest[split + 1..], TIME_FORMAT).ok()?;

        Some(Self {
            database_name: rest[..split].to_string(),
            timestamp,
            compressed,
        })
    }
}

pub fn file_ext(compress: bool) -> &'static str {
    if compress {
        COMPRESSED_SQL_EXT
    } else {
        SQL_EXT
    }
}

pub fn artifact_file_name<T: TimeZone>(database_name: &str, at: &DateTime<T>, compress: bool) -> String
where
    T::Offset: std::fmt::Display,
{
    format!(
        "{ARTIFACT_PREFIX}{database_name}_{}{}",
        at.format(TIME_FORMAT),
        file_ext(compress)
    )
}

/// Name check used by retention: prefix and suffix only.
pub fn is_artifact_file_name(file_name: &str) -> bool {
    file_name.starts_with(ARTIFACT_PREFIX)
        && (file_name.ends_with(SQL_EXT) || file_name.ends_with(COMPRESSED_SQL_EXT))
}

/// Atomically claims the artifact path for a run starting now.
///
/// An empty file is created with `create_new`, so two runs for the same
/// database within the same second never share a file: the later one waits
/// for the next second and tries again.
pub fn reserve_artifact_path(
    dir: &Path,
    database_name: &str,
    compress: bool,
    cancel: &CancellationToken,
) -> Result<(PathBuf, DateTime<Local>)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let now = Local::now();
        let path = dir.join(artifact_file_name(database_name, &now, compress));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok((path, now)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if attempt >= RESERVE_ATTEMPTS {
                    return Err(Error::ArtifactExists(path));
                }
                tracing::debug!("{path:?} already taken, waiting for the next second");
                let nanos = 1_000_000_000u32.saturating_sub(now.timestamp_subsec_nanos());
                let wait = Duration::from_nanos(nanos as u64) + Duration::from_millis(5);
                if let Some(reason) = cancel.wait_timeout(wait) {
                    return Err(Error::Cancelled(reason));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Human readable size with 1024 based units, e.g. `1.5 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let unit = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {unit}B", bytes as f64 / div as f64)
}
