use crate::backup::cancel::CancellationToken;
use crate::backup::command::{CommandSpec, Pipeline};
use crate::backup::pipeline::PipelineRunner;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Simulated behaviour of one program.
#[derive(Clone, Debug)]
pub enum MockStage {
    /// Ignores stdin, writes `stdout` and exits with `exit_code`.
    Emit {
        stdout: Vec<u8>,
        stderr: String,
        exit_code: i32,
    },
    /// Gzips stdin to stdout, like `gzip` without arguments.
    Gzip { exit_code: i32 },
    /// Never exits on its own.
    Hang,
}

impl MockStage {
    pub fn emit<B: Into<Vec<u8>>>(stdout: B) -> Self {
        Self::Emit {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn fail<B: Into<Vec<u8>>, S: Into<String>>(stdout: B, stderr: S, exit_code: i32) -> Self {
        Self::Emit {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }
}

struct MockOutput {
    stdout: Vec<u8>,
    stderr: String,
    exit_code: i32,
}

/// Test double for [`PipelineRunner`] that never spawns a process.
#[derive(Default)]
pub struct MockRunner {
    stages: HashMap<String, MockStage>,
    spawned: AtomicUsize,
    runs: Mutex<Vec<Pipeline>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage<S: Into<String>>(mut self, program: S, stage: MockStage) -> Self {
        self.stages.insert(program.into(), stage);
        self
    }

    /// Number of simulated process spawns so far.
    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> Vec<Pipeline> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<MockStage> {
        let stage = self.stages.get(spec.program()).cloned().ok_or_else(|| Error::Spawn {
            program: spec.program().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no mock stage"),
        })?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(stage)
    }

    fn execute(
        &self,
        stage: MockStage,
        stdin: &[u8],
        cancel: &CancellationToken,
    ) -> Result<MockOutput> {
        match stage {
            MockStage::Emit {
                stdout,
                stderr,
                exit_code,
            } => Ok(MockOutput {
                stdout,
                stderr,
                exit_code,
            }),
            MockStage::Gzip { exit_code } => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(stdin)?;
                Ok(MockOutput {
                    stdout: encoder.finish()?,
                    stderr: String::new(),
                    exit_code,
                })
            }
            MockStage::Hang => match cancel.wait_timeout(Duration::from_secs(60)) {
                Some(reason) => Err(Error::Cancelled(reason)),
                None => panic!("mock stage hung for 60s without cancellation"),
            },
        }
    }
}

fn check(program: &str, output: &MockOutput) -> Result<()> {
    if output.exit_code == 0 {
        Ok(())
    } else {
        Err(Error::ProcessFailed {
            program: program.to_string(),
            status: format!("exit status: {}", output.exit_code),
            diagnostics: output.stderr.clone(),
        })
    }
}

impl PipelineRunner for MockRunner {
    fn run(&self, pipeline: &Pipeline, target: &Path, cancel: &CancellationToken) -> Result<()> {
        if let Some(reason) = cancel.reason() {
            return Err(Error::Cancelled(reason));
        }
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(pipeline.clone());

        match pipeline {
            Pipeline::Single { stage, .. } => {
                let mock = self.spawn(stage)?;
                let output = self.execute(mock, &[], cancel)?;
                std::fs::write(target, &output.stdout)?;
                check(stage.program(), &output)
            }
            Pipeline::Piped { producer, consumer } => {
                let consumer_mock = self.spawn(consumer)?;
                let producer_mock = self.spawn(producer)?;
                let produced = self.execute(producer_mock, &[], cancel)?;
                let consumed = self.execute(consumer_mock, &produced.stdout, cancel)?;
                std::fs::write(target, &consumed.stdout)?;
                let errors = [
                    check(producer.program(), &produced),
                    check(consumer.program(), &consumed),
                ]
                .into_iter()
                .filter_map(|res| res.err())
                .collect();
                convert_error_vec(errors)
            }
        }
    }
}
