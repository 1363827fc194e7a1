use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use bon::Builder;
use derive_more::Display;
use getset::{CopyGetters, Getters};
use std::str::FromStr;

/// Dump tool family of a database server.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum Engine {
    /// MySQL and MariaDB, dumped with `mysqldump`.
    #[display("mysql")]
    MySql,
    /// PostgreSQL, dumped with `pg_dump`.
    #[display("postgres")]
    Postgres,
}

impl FromStr for Engine {
    type Err = Error;

    /// Case-insensitive match against the recognized aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            _ => Err(Error::UnsupportedEngine(s.to_string())),
        }
    }
}

/// Connection parameters of the database to dump.
///
/// `engine` is kept as the raw identifier from the configuration; it is only
/// resolved into an [`Engine`] when a backup run builds its commands.
#[derive(Clone, Debug, Builder, Getters, CopyGetters)]
pub struct ConnectionSpec {
    #[builder(into)]
    #[getset(get = "pub")]
    engine: String,
    #[builder(into)]
    #[getset(get = "pub")]
    host: String,
    #[getset(get_copy = "pub")]
    port: u16,
    #[builder(into)]
    #[getset(get = "pub")]
    user: String,
    #[builder(into, default)]
    #[getset(get = "pub")]
    password: RedactedString,
    #[builder(into)]
    #[getset(get = "pub")]
    database_name: String,
}

impl ConnectionSpec {
    pub fn resolve_engine(&self) -> Result<Engine, Error> {
        self.engine.parse()
    }
}
