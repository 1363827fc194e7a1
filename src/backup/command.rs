//! Construction of the dump pipelines for every supported [`Engine`].
//!
//! Building a pipeline has no side effects: nothing is spawned and no file is
//! touched. Execution is left to a [`PipelineRunner`](crate::backup::pipeline::PipelineRunner).
//!
//! # Security
//!
//! `mysqldump` receives the password as a `-p<password>` argument, which makes
//! it visible to other users of the host through process listings. This
//! mirrors the behaviour of the classic `mysqldump -p` invocation and is kept
//! on purpose; for production use prefer a `~/.my.cnf` credential file.
//! An empty password leaves out `-p` entirely, so `mysqldump` falls back to
//! its option files instead of prompting on the terminal.
//! `pg_dump` receives its password through `PGPASSWORD` on the child process
//! environment only, the environment of this process is never modified.

use crate::backup::connection::{ConnectionSpec, Engine};
use crate::backup::redacted::{RedactedString, REDACTED};
use crate::backup::result_error::result::Result;
use itertools::Itertools;
use std::ffi::{OsStr, OsString};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::process::Command;

pub const MYSQL_DUMP: &str = "mysqldump";
pub const PG_DUMP: &str = "pg_dump";
pub const GZIP: &str = "gzip";
pub const PG_PASSWORD_ENV: &str = "PGPASSWORD";
/// `pg_dump -Z` level used when compression is requested.
pub const PG_COMPRESSION_LEVEL: u32 = 9;

/// A single command line argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    Plain(OsString),
    /// Rendered as a placeholder whenever the command is displayed.
    Secret(RedactedString),
}

impl Arg {
    pub fn as_os_str(&self) -> &OsStr {
        match self {
            Arg::Plain(arg) => arg.as_os_str(),
            Arg::Secret(secret) => OsStr::new(secret.inner().as_str()),
        }
    }
}

impl Display for Arg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Plain(arg) => write!(f, "{}", arg.to_string_lossy()),
            Arg::Secret(_) => write!(f, "{}", REDACTED),
        }
    }
}

/// Program, arguments and extra environment of one pipeline stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<Arg>,
    env: Vec<(String, RedactedString)>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    pub fn secret_arg(mut self, secret: RedactedString) -> Self {
        self.args.push(Arg::Secret(secret));
        self
    }

    pub fn env<S: Into<String>>(mut self, key: S, value: RedactedString) -> Self {
        self.env.push((key.into(), value));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn env_vars(&self) -> &[(String, RedactedString)] {
        &self.env
    }

    /// Arguments as displayed in logs, secrets masked.
    pub fn rendered_args(&self) -> Vec<String> {
        self.args.iter().map(Arg::to_string).collect()
    }

    /// Unconfigured [`Command`] for this stage; stdio is left to the caller.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args.iter().map(Arg::as_os_str));
        for (key, value) in &self.env {
            command.env(key, value.inner());
        }
        command
    }
}

impl Display for CommandSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Where the dumped bytes of a single stage pipeline end up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Standard output is redirected into the target file.
    Stdout,
    /// The tool writes the target file itself through one of its arguments.
    Native,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pipeline {
    Single {
        stage: CommandSpec,
        output: OutputMode,
    },
    /// `producer | consumer > target`
    Piped {
        producer: CommandSpec,
        consumer: CommandSpec,
    },
}

impl Pipeline {
    pub fn stages(&self) -> Vec<&CommandSpec> {
        match self {
            Pipeline::Single { stage, .. } => vec![stage],
            Pipeline::Piped { producer, consumer } => vec![producer, consumer],
        }
    }
}

impl Display for Pipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stages().iter().join(" | "))
    }
}

/// Resolves the engine of `conn` and builds its dump pipeline into `target`.
pub fn build_pipeline(conn: &ConnectionSpec, target: &Path, compress: bool) -> Result<Pipeline> {
    let engine = conn.resolve_engine()?;
    Ok(engine_pipeline(engine, conn, target, compress))
}

pub fn engine_pipeline(
    engine: Engine,
    conn: &ConnectionSpec,
    target: &Path,
    compress: bool,
) -> Pipeline {
    match engine {
        Engine::MySql => mysql_pipeline(conn, target, compress),
        Engine::Postgres => postgres_pipeline(conn, target, compress),
    }
}

fn mysql_pipeline(conn: &ConnectionSpec, target: &Path, compress: bool) -> Pipeline {
    let mut dump = CommandSpec::new(MYSQL_DUMP)
        .arg("-h")
        .arg(conn.host())
        .arg("-P")
        .arg(conn.port().to_string())
        .arg("-u")
        .arg(conn.user());
    // a bare `-p` makes mysqldump prompt on the terminal
    if !conn.password().is_empty() {
        dump = dump.secret_arg(RedactedString::from(format!(
            "-p{}",
            conn.password().inner()
        )));
    }
    let dump = dump.arg(conn.database_name());

    if compress {
        Pipeline::Piped {
            producer: dump,
            consumer: CommandSpec::new(GZIP),
        }
    } else {
        Pipeline::Single {
            stage: dump.arg("-r").arg(target),
            output: OutputMode::Native,
        }
    }
}

fn postgres_pipeline(conn: &ConnectionSpec, target: &Path, compress: bool) -> Pipeline {
    let mut dump = CommandSpec::new(PG_DUMP)
        .arg("-h")
        .arg(conn.host())
        .arg("-p")
        .arg(conn.port().to_string())
        .arg("-U")
        .arg(conn.user())
        .arg("-d")
        .arg(conn.database_name())
        .arg("-f")
        .arg(target);

    if compress {
        dump = dump.arg("-Z").arg(PG_COMPRESSION_LEVEL.to_string());
    }
    if !conn.password().is_empty() {
        dump = dump.env(PG_PASSWORD_ENV, conn.password().clone());
    }

    Pipeline::Single {
        stage: dump,
        output: OutputMode::Native,
    }
}
