use bon::Builder;
use getset::{CopyGetters, Getters};
use std::path::PathBuf;
use std::time::Duration;

/// Where and how a backup run stores its artifact and how long artifacts are kept.
#[derive(Clone, Debug, Builder, Getters, CopyGetters)]
pub struct BackupPolicy {
    #[builder(into)]
    #[getset(get = "pub")]
    output_directory: PathBuf,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    compress: bool,
    /// Artifacts older than this many days are deleted after a successful
    /// run. Zero or negative disables cleanup.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    retention_days: i64,
    /// Upper bound for a single run; the pipeline is terminated when exceeded.
    #[getset(get_copy = "pub")]
    timeout: Option<Duration>,
}
