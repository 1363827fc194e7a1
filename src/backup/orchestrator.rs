//! A single backup run: name the artifact, dump into it, clean up old ones.

use crate::backup::artifact::{format_file_size, reserve_artifact_path, BackupArtifact};
use crate::backup::cancel::CancellationToken;
use crate::backup::command::engine_pipeline;
use crate::backup::connection::ConnectionSpec;
use crate::backup::pipeline::PipelineRunner;
use crate::backup::policy::BackupPolicy;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::retention::cleanup_expired;
use crate::backup::validate::is_valid_database_name;
use chrono::{DateTime, Local};
use getset::{CopyGetters, Getters};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum BackupStatus {
    Succeeded,
    Failed(String),
    Cancelled(String),
}

/// Outcome of one [`BackupOrchestrator::execute`] call.
#[derive(Clone, Debug, Serialize, Getters, CopyGetters)]
pub struct BackupResult {
    /// Present on success only; a failed run leaves no file behind.
    #[getset(get = "pub")]
    file_path: Option<PathBuf>,
    #[getset(get_copy = "pub")]
    size_bytes: u64,
    /// Wall time of the whole run, retention included.
    #[serde(with = "humantime_serde")]
    #[getset(get_copy = "pub")]
    duration: Duration,
    #[getset(get = "pub")]
    status: BackupStatus,
    #[getset(get = "pub")]
    timestamp: DateTime<Local>,
}

impl BackupResult {
    pub fn success(&self) -> bool {
        matches!(self.status, BackupStatus::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, BackupStatus::Cancelled(_))
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            BackupStatus::Succeeded => None,
            BackupStatus::Failed(reason) | BackupStatus::Cancelled(reason) => Some(reason),
        }
    }
}

pub struct BackupOrchestrator<R> {
    runner: R,
}

impl<R: PipelineRunner> BackupOrchestrator<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs one backup of `conn` as described by `policy`.
    ///
    /// Never panics and never returns an error: every failure is folded into
    /// the returned [`BackupResult`]. Retention only runs after a successful
    /// dump.
    pub fn execute(
        &self,
        conn: &ConnectionSpec,
        policy: &BackupPolicy,
        cancel: &CancellationToken,
    ) -> BackupResult {
        let started = Instant::now();
        let timestamp = Local::now();
        let run_cancel = match policy.timeout() {
            Some(timeout) => cancel.child_with_timeout(timeout),
            None => cancel.child(),
        };

        info!(
            "Starting {} backup of {:?} into {:?}",
            conn.engine(),
            conn.database_name(),
            policy.output_directory()
        );

        let (file_path, size_bytes, status) = match self.dump(conn, policy, &run_cancel) {
            Ok(artifact) => {
                info!(
                    "Created backup file {:?} ({})",
                    artifact.file_path(),
                    format_file_size(artifact.size_bytes())
                );
                if policy.retention_days() > 0 {
                    let deleted = cleanup_expired(
                        policy.output_directory(),
                        policy.retention_days(),
                        SystemTime::now(),
                    );
                    info!(
                        "Removed {deleted} backup(s) older than {} day(s)",
                        policy.retention_days()
                    );
                }
                (
                    Some(artifact.file_path().clone()),
                    artifact.size_bytes(),
                    BackupStatus::Succeeded,
                )
            }
            Err(e) if e.is_cancelled() => {
                warn!("Backup of {:?} stopped: {e}", conn.database_name());
                (None, 0, BackupStatus::Cancelled(e.to_string()))
            }
            Err(e) => {
                error!("Backup of {:?} failed: {e}", conn.database_name());
                (None, 0, BackupStatus::Failed(e.to_string()))
            }
        };

        let duration = started.elapsed();
        if matches!(status, BackupStatus::Succeeded) {
            info!("Backup finished in {}", humantime::format_duration(round_millis(duration)));
        }

        BackupResult {
            file_path,
            size_bytes,
            duration,
            status,
            timestamp,
        }
    }

    fn dump(
        &self,
        conn: &ConnectionSpec,
        policy: &BackupPolicy,
        cancel: &CancellationToken,
    ) -> Result<BackupArtifact> {
        let engine = conn.resolve_engine()?;
        if !is_valid_database_name(conn.database_name()) {
            return Err(Error::InvalidDatabaseName(conn.database_name().clone()));
        }

        let dir = policy.output_directory();
        std::fs::create_dir_all(dir)
            .map_err(Error::from)
            .with_msg(format!("Creating backup directory {dir:?} failed"))?;

        let (path, created_at) =
            reserve_artifact_path(dir, conn.database_name(), policy.compress(), cancel)?;
        let pipeline = engine_pipeline(engine, conn, &path, policy.compress());

        let size_bytes = self
            .runner
            .run(&pipeline, &path, cancel)
            .and_then(|_| Ok(std::fs::metadata(&path)?.len()))
            .map_err(|e| remove_partial(&path, e))?;

        Ok(BackupArtifact::new(path, size_bytes, created_at))
    }
}

fn remove_partial(path: &Path, mut error: Error) -> Error {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            error = error.chain(Error::from(e).with_msg(format!("Removing partial backup {path:?} failed")))
        }
    }
    error
}

fn round_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
