use crate::backup::cancel::CancellationToken;
use crate::backup::command::{CommandSpec, OutputMode, Pipeline};
use crate::backup::pipeline::{check_exit, PipelineRunner};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use bon::Builder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Runs pipelines as real OS processes found through `PATH`.
#[derive(Clone, Debug, Builder)]
pub struct ProcessRunner {
    /// Time a stage gets to exit after SIGTERM before it is killed.
    #[builder(default = DEFAULT_TERMINATE_GRACE)]
    terminate_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineRunner for ProcessRunner {
    fn run(&self, pipeline: &Pipeline, target: &Path, cancel: &CancellationToken) -> Result<()> {
        if let Some(reason) = cancel.reason() {
            return Err(Error::Cancelled(reason));
        }
        tracing::debug!("Running pipeline: {pipeline}");
        match pipeline {
            Pipeline::Single { stage, output } => self.run_single(stage, *output, target, cancel),
            Pipeline::Piped { producer, consumer } => {
                self.run_piped(producer, consumer, target, cancel)
            }
        }
    }
}

impl ProcessRunner {
    fn run_single(
        &self,
        spec: &CommandSpec,
        output: OutputMode,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut stage = match output {
            OutputMode::Stdout => {
                let file = File::create(target)?;
                Stage::spawn(spec, Stdio::null(), Stdio::from(file), false)?
            }
            OutputMode::Native => Stage::spawn(spec, Stdio::null(), Stdio::piped(), true)?,
        };

        match stage.wait(cancel) {
            Ok(status) => stage.check(status),
            Err(e) => {
                stage.terminate(self.terminate_grace);
                Err(e)
            }
        }
    }

    /// `producer | consumer > target`, consumer started first.
    fn run_piped(
        &self,
        producer: &CommandSpec,
        consumer: &CommandSpec,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let file = File::create(target)?;
        let (pipe_reader, pipe_writer) = std::io::pipe()?;

        let mut consumer = Stage::spawn(consumer, Stdio::from(pipe_reader), Stdio::from(file), false)?;
        let mut producer =
            match Stage::spawn(producer, Stdio::null(), Stdio::from(pipe_writer), false) {
                Ok(stage) => stage,
                Err(e) => {
                    // the write end is closed by now, so the consumer sees EOF
                    if consumer.wait(cancel).is_err() {
                        consumer.terminate(self.terminate_grace);
                    }
                    return Err(e);
                }
            };

        let producer_status = match producer.wait(cancel) {
            Ok(status) => status,
            Err(e) => {
                producer.terminate(self.terminate_grace);
                consumer.terminate(self.terminate_grace);
                return Err(e);
            }
        };
        let consumer_status = match consumer.wait(cancel) {
            Ok(status) => status,
            Err(e) => {
                consumer.terminate(self.terminate_grace);
                return Err(e);
            }
        };

        let errors = [
            producer.check(producer_status),
            consumer.check(consumer_status),
        ]
        .into_iter()
        .filter_map(|res| res.err())
        .collect();
        convert_error_vec(errors)
    }
}

/// A spawned pipeline stage and the threads draining its captured output.
struct Stage {
    program: String,
    child: Child,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

impl Stage {
    fn spawn(spec: &CommandSpec, stdin: Stdio, stdout: Stdio, capture_stdout: bool) -> Result<Self> {
        tracing::trace!("Spawning: {spec}");
        let mut command = spec.to_command();
        command.stdin(stdin).stdout(stdout).stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: spec.program().to_string(),
            source,
        })?;
        // release the parent's copies of redirected handles (target file, pipe ends)
        drop(command);

        let stdout = if capture_stdout {
            child.stdout.take().map(drain)
        } else {
            None
        };
        let stderr = child.stderr.take().map(drain);

        Ok(Self {
            program: spec.program().to_string(),
            child,
            stdout,
            stderr,
        })
    }

    fn wait(&mut self, cancel: &CancellationToken) -> Result<ExitStatus> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if let Some(reason) = cancel.wait_timeout(POLL_INTERVAL) {
                tracing::debug!("Cancelling {} (pid {}): {reason}", self.program, self.child.id());
                return Err(Error::Cancelled(reason));
            }
        }
    }

    /// Combined stdout and stderr of the exited stage.
    fn diagnostics(&mut self) -> String {
        [self.stdout.take(), self.stderr.take()]
            .into_iter()
            .flatten()
            .map(|handle| handle.join().unwrap_or_default())
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn check(&mut self, status: ExitStatus) -> Result<()> {
        let diagnostics = self.diagnostics();
        if status.success() && !diagnostics.is_empty() {
            tracing::warn!("{}: {}", self.program, diagnostics.trim_end());
        }
        check_exit(&self.program, status, diagnostics)
    }

    /// SIGTERM, then SIGKILL once `grace` passed; always reaps the child.
    ///
    /// Output drain threads are detached, a grandchild may still hold the pipes.
    fn terminate(&mut self, grace: Duration) {
        self.stdout.take();
        self.stderr.take();
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }

        send_sigterm(&self.child);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }

        tracing::warn!(
            "{} (pid {}) did not exit after SIGTERM, killing it",
            self.program,
            self.child.id()
        );
        if let Err(e) = self.child.kill() {
            tracing::warn!("Killing {} failed: {e}", self.program);
        }
        if let Err(e) = self.child.wait() {
            tracing::warn!("Reaping {} failed: {e}", self.program);
        }
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
        tracing::warn!("Sending SIGTERM to pid {} failed: {e}", child.id());
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backup::cancel::CancelReason;
    use tempfile::TempDir;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::builder()
            .terminate_grace(Duration::from_secs(2))
            .build()
    }

    #[test]
    fn test_single_stage_redirects_stdout_into_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.sql");
        let pipeline = Pipeline::Single {
            stage: sh("printf 'CREATE TABLE t;'"),
            output: OutputMode::Stdout,
        };

        runner()
            .run(&pipeline, &target, &CancellationToken::new())
            .unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "CREATE TABLE t;");
    }

    #[test]
    fn test_single_stage_failure_carries_combined_output() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.sql");
        let pipeline = Pipeline::Single {
            stage: sh("echo 'connecting'; echo 'Access denied' >&2; exit 3"),
            output: OutputMode::Native,
        };

        match runner().run(&pipeline, &target, &CancellationToken::new()) {
            Err(Error::ProcessFailed {
                program,
                status,
                diagnostics,
            }) => {
                assert_eq!(program, "sh");
                assert!(status.contains('3'), "{status}");
                assert!(diagnostics.contains("connecting"), "{diagnostics}");
                assert!(diagnostics.contains("Access denied"), "{diagnostics}");
            }
            other => panic!("Expected ProcessFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_piped_stages_stream_into_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.sql");
        let pipeline = Pipeline::Piped {
            producer: sh("printf 'hello'; printf ' world'"),
            consumer: CommandSpec::new("cat"),
        };

        runner()
            .run(&pipeline, &target, &CancellationToken::new())
            .unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello world");
    }

    #[test]
    fn test_producer_failure_is_reported_when_consumer_succeeds() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.sql.gz");
        let pipeline = Pipeline::Piped {
            producer: sh("printf 'partial'; echo 'Got error: 1045' >&2; exit 2"),
            consumer: CommandSpec::new("cat"),
        };

        let err = runner()
            .run(&pipeline, &target, &CancellationToken::new())
            .unwrap_err();
        match &err {
            Error::ProcessFailed {
                program,
                diagnostics,
                ..
            } => {
                assert_eq!(program, "sh");
                assert!(diagnostics.contains("Got error: 1045"));
            }
            other => panic!("Expected ProcessFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_consumer_failure_is_reported_when_producer_succeeds() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.sql.gz");
        let pipeline = Pipeline::Piped {
            producer: sh("printf 'data'"),
            consumer: sh("cat > /dev/null; echo 'No space left' >&2; exit 4"),
        };

        let err = runner()
            .run(&pipeline, &target, &CancellationToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("No space left"), "{err}");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::Single {
            stage: CommandSpec::new("definitely-not-a-dump-tool"),
            output: OutputMode::Stdout,
        };

        match runner().run(&pipeline, &dir.path().join("x"), &CancellationToken::new()) {
            Err(Error::Spawn { program, .. }) => assert_eq!(program, "definitely-not-a-dump-tool"),
            other => panic!("Expected Spawn error, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_terminates_single_stage() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::Single {
            stage: CommandSpec::new("sleep").arg("30"),
            output: OutputMode::Stdout,
        };
        let cancel = CancellationToken::new().child_with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = runner()
            .run(&pipeline, &dir.path().join("x"), &cancel)
            .unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancel_terminates_both_piped_stages() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::Piped {
            producer: CommandSpec::new("sleep").arg("30"),
            consumer: CommandSpec::new("cat"),
        };
        let cancel = CancellationToken::new();
        let remote = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });

        let started = Instant::now();
        let err = runner()
            .run(&pipeline, &dir.path().join("x"), &cancel)
            .unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
        canceller.join().unwrap();
    }

    #[test]
    fn test_already_cancelled_token_spawns_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("x");
        let pipeline = Pipeline::Single {
            stage: sh("printf data"),
            output: OutputMode::Stdout,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(runner().run(&pipeline, &target, &cancel).unwrap_err().is_cancelled());
        assert!(!target.exists());
    }
}
