//! Validation functions for configuration values.
//!
//! Used both as `validator` custom functions on the configuration structs and
//! directly by the orchestrator before anything touches the filesystem.

use chrono::Local;
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

/// A database name ends up inside the artifact file name, so it has to be a
/// single, non-empty file name component.
pub fn is_valid_database_name(name: &str) -> bool {
    !name.trim().is_empty() && is_sanitized(name)
}

pub fn validate_database_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.trim().is_empty() {
        return Err(ValidationError::new("InvalidDatabaseName")
            .with_message("database name must not be empty".into()));
    }
    if !is_valid_database_name(name) {
        return Err(ValidationError::new("InvalidDatabaseName").with_message(
            format!(
                "database name can not be used in a file name, try sanitizing like {:?}",
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_cron_str<S: AsRef<str>>(cron: S) -> Result<(), ValidationError> {
    let cron = cron.as_ref();
    if cron_parser::parse(cron, &Local::now()).is_err() {
        return Err(ValidationError::new("InvalidCron")
            .with_message(format!("Invalid cron string: {cron:?}").into()));
    }

    Ok(())
}

pub fn validate_engine<S: AsRef<str>>(engine: S) -> Result<(), ValidationError> {
    let engine = engine.as_ref();
    if engine.parse::<crate::backup::connection::Engine>().is_err() {
        return Err(ValidationError::new("UnsupportedEngine").with_message(
            format!("Unsupported database engine {engine:?}, expected mysql, mariadb, postgres, postgresql or pg").into(),
        ));
    }

    Ok(())
}
