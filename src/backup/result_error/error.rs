use crate::backup::cancel::CancelReason;
use crate::backup::result_error::WithMsg;
use itertools::Itertools;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error("Invalid cron expression {cron:?}: {reason}")]
    InvalidCron { cron: String, reason: String },
    #[error("Unsupported database engine: {0:?}")]
    UnsupportedEngine(String),
    #[error("Database name {0:?} can not be used in a file name")]
    InvalidDatabaseName(String),
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}{}", fmt_diagnostics(.diagnostics))]
    ProcessFailed {
        program: String,
        status: String,
        diagnostics: String,
    },
    #[error("Backup {0}")]
    Cancelled(CancelReason),
    #[error("Backup artifact already exists: {0:?}")]
    ArtifactExists(PathBuf),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

fn fmt_diagnostics(diagnostics: &str) -> String {
    let diagnostics = diagnostics.trim_end();
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(":\n{}", indent::indent_all_with("  ", diagnostics))
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Returns the reason if this error, or any error it wraps, is a cancellation.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Error::Cancelled(reason) => Some(*reason),
            Error::WithMsg { error, .. } => error.cancel_reason(),
            Error::LotsOfError(errors) => errors.iter().find_map(Error::cancel_reason),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }
}
