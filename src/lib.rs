//! # db_backup
//!
//! Scheduled logical backups of MySQL/MariaDB and PostgreSQL databases.
//!
//! ## Features
//!
//! - **Dump pipelines**: `mysqldump` (optionally piped through `gzip`) and `pg_dump` (native compression)
//! - **Cancellation**: per-run timeouts and shutdown signals terminate the dump tools
//! - **Retention Management**: backups older than a number of days are pruned after each successful run
//! - **Scheduled Backups**: Cron-based automation in local time
//!
//! ## Quick Start
//!
//! ```no_run
//! use db_backup::backup::cancel::CancellationToken;
//! use db_backup::backup::config::AppConfig;
//! use db_backup::backup::orchestrator::BackupOrchestrator;
//! use db_backup::backup::pipeline::ProcessRunner;
//!
//! // Load and validate configuration from YAML file
//! let config = AppConfig::load("config.yml")?;
//!
//! // Run a single backup
//! let orchestrator = BackupOrchestrator::new(ProcessRunner::default());
//! let result = orchestrator.execute(
//!     &config.connection_spec(),
//!     &config.backup_policy(),
//!     &CancellationToken::new(),
//! );
//! println!("{:?}", result.file_path());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
