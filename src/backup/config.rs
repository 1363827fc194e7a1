use crate::backup::connection::ConnectionSpec;
use crate::backup::policy::BackupPolicy;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::schedule::Scheduler;
use crate::backup::validate::{validate_cron_str, validate_database_name, validate_engine};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

/// Root of the YAML configuration file.
///
/// ```yaml
/// database:
///   engine: mysql
///   host: localhost
///   port: 3306
///   user: root
///   password: "..."
///   name: app
/// backup:
///   path: ./backups
///   retention_days: 30
///   compress: true
///   timeout: 2h
/// schedule:
///   cron: "0 0 * * 4"
///   run_on_start: false
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[serde(default)]
    #[validate(nested)]
    pub backup: BackupConfig,
    #[serde(default)]
    #[validate(nested)]
    pub schedule: ScheduleConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(default = "default_engine")]
    #[validate(custom(function = validate_engine))]
    pub engine: String,
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default = "default_user")]
    #[validate(length(min = 1))]
    pub user: String,
    #[serde(default)]
    pub password: RedactedString,
    #[serde(default)]
    #[validate(custom(function = validate_database_name))]
    pub name: String,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct BackupConfig {
    #[serde(default = "default_backup_path")]
    pub path: PathBuf,
    /// Zero or negative keeps every backup.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_true")]
    pub compress: bool,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct ScheduleConfig {
    #[serde(default = "default_cron")]
    #[validate(custom(function = validate_cron_str))]
    pub cron: String,
    #[serde(default)]
    pub run_on_start: bool,
}

fn default_engine() -> String {
    "mysql".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

fn default_backup_path() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_retention_days() -> i64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_cron() -> String {
    "0 0 * * 4".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            path: default_backup_path(),
            retention_days: default_retention_days(),
            compress: true,
            timeout: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            run_on_start: false,
        }
    }
}

impl AppConfig {
    /// Reads, parses and validates the YAML file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(Error::from)
            .with_msg(format!("Reading config file failed: {path:?}"))?;
        Self::parse(&content).with_msg(format!("Loading config failed: {path:?}"))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = serde_yml::from_str(content)
            .map_err(Error::from)
            .with_msg("Parse YAML config failed")?;
        config
            .validate()
            .map_err(Error::from)
            .with_msg("Config validation failed")?;
        Ok(config)
    }

    pub fn connection_spec(&self) -> ConnectionSpec {
        let db = &self.database;
        ConnectionSpec::builder()
            .engine(db.engine.as_str())
            .host(db.host.as_str())
            .port(db.port)
            .user(db.user.as_str())
            .password(db.password.clone())
            .database_name(db.name.as_str())
            .build()
    }

    pub fn backup_policy(&self) -> BackupPolicy {
        BackupPolicy::builder()
            .output_directory(self.backup.path.as_path())
            .compress(self.backup.compress)
            .retention_days(self.backup.retention_days)
            .maybe_timeout(self.backup.timeout)
            .build()
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::builder()
            .cron(self.schedule.cron.as_str())
            .run_on_start(self.schedule.run_on_start)
            .build()
    }
}
