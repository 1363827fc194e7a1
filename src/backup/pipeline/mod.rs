//! Execution of dump [`Pipeline`]s.
//!
//! The [`PipelineRunner`] trait decouples ordering and failure propagation from
//! real OS processes: [`ProcessRunner`] spawns the tools, the test-only
//! `MockRunner` simulates them.

#[cfg(test)]
pub mod mock;
pub mod process;

pub use process::ProcessRunner;

use crate::backup::cancel::CancellationToken;
use crate::backup::command::Pipeline;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::path::Path;
use std::process::ExitStatus;

pub trait PipelineRunner: Send + Sync {
    /// Runs `pipeline` to completion, leaving its output in `target`.
    ///
    /// Fails with [`Error::ProcessFailed`] when any stage exits unsuccessfully
    /// and with [`Error::Cancelled`] when `cancel` fires first. On return no
    /// stage is left running and no handle to `target` is held.
    fn run(&self, pipeline: &Pipeline, target: &Path, cancel: &CancellationToken) -> Result<()>;
}

pub(crate) fn check_exit(program: &str, status: ExitStatus, diagnostics: String) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(Error::ProcessFailed {
            program: program.to_string(),
            status: status.to_string(),
            diagnostics,
        })
    }
}
