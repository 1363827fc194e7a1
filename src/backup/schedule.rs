use crate::backup::artifact::format_file_size;
use crate::backup::cancel::CancellationToken;
use crate::backup::connection::ConnectionSpec;
use crate::backup::orchestrator::{BackupOrchestrator, BackupResult};
use crate::backup::pipeline::PipelineRunner;
use crate::backup::policy::BackupPolicy;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use bon::Builder;
use chrono::{DateTime, Local};
use getset::{CopyGetters, Getters};
use std::time::Duration;
use tracing::{error, info, warn};

/// Cron driven loop around [`BackupOrchestrator::execute`].
#[derive(Clone, Debug, Builder, Getters, CopyGetters)]
pub struct Scheduler {
    /// Five field cron expression, evaluated in local time.
    #[builder(into)]
    #[getset(get = "pub")]
    cron: String,
    /// Run one backup immediately instead of waiting for the first fire time.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    run_on_start: bool,
}

impl Scheduler {
    /// First fire time strictly after `after`.
    pub fn next_fire(&self, after: &DateTime<Local>) -> Result<DateTime<Local>> {
        cron_parser::parse(&self.cron, after).map_err(|e| Error::InvalidCron {
            cron: self.cron.clone(),
            reason: format!("{e:?}"),
        })
    }

    /// Runs backups until `cancel` fires. Returns the number of runs started.
    ///
    /// A failed run is logged and the loop goes on; only an invalid cron
    /// expression ends it with an error.
    pub fn run<R: PipelineRunner>(
        &self,
        orchestrator: &BackupOrchestrator<R>,
        conn: &ConnectionSpec,
        policy: &BackupPolicy,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        // fail before the first run when the expression is unusable
        self.next_fire(&Local::now())?;

        let mut runs = 0;
        if self.run_on_start {
            info!("Running initial backup");
            runs += 1;
            report(&orchestrator.execute(conn, policy, cancel));
        }

        loop {
            let now = Local::now();
            let next = self.next_fire(&now)?;
            info!("Next backup at {}", next.format("%Y-%m-%d %H:%M:%S %:z"));

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            if let Some(reason) = cancel.wait_timeout(wait) {
                info!("Scheduler {reason}, {runs} backup(s) started");
                return Ok(runs);
            }

            runs += 1;
            report(&orchestrator.execute(conn, policy, cancel));
        }
    }
}

fn report(result: &BackupResult) {
    match (result.success(), result.file_path()) {
        (true, Some(file_path)) => info!(
            "Scheduled backup done: {:?}, {}, took {}",
            file_path,
            format_file_size(result.size_bytes()),
            humantime::format_duration(Duration::from_secs(result.duration().as_secs()))
        ),
        _ if result.is_cancelled() => warn!(
            "Scheduled backup cancelled: {}",
            result.failure_reason().unwrap_or_default()
        ),
        _ => error!(
            "Scheduled backup failed: {}",
            result.failure_reason().unwrap_or_default()
        ),
    }
}
