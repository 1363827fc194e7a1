use clap::{Parser, Subcommand};
use db_backup::backup::artifact::format_file_size;
use db_backup::backup::cancel::CancellationToken;
use db_backup::backup::config::AppConfig;
use db_backup::backup::orchestrator::{BackupOrchestrator, BackupResult};
use db_backup::backup::pipeline::ProcessRunner;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, warn, Level};

/// Exit status of a run stopped by a shutdown signal, as a shell reports SIGINT.
const EXIT_CANCELLED: i32 = 130;

/// Dump a MySQL/MariaDB or PostgreSQL database on a schedule and prune old dumps
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, env = "DBBACKUP_CONFIG")]
    config: PathBuf,
    /// Log debug output, including the dump commands with secrets masked
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single backup now and exit
    Backup {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run backups on the configured cron schedule until interrupted
    Schedule,
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    let cancel = CancellationToken::new();
    install_shutdown_handler(&cancel);

    let orchestrator = BackupOrchestrator::new(ProcessRunner::default());
    let conn = config.connection_spec();
    let policy = config.backup_policy();

    match args.command {
        Command::Backup { json } => {
            let result = orchestrator.execute(&conn, &policy, &cancel);
            print_result(&result, json);
            let code = exit_code(&result);
            if code != 0 {
                exit(code);
            }
        }
        Command::Schedule => {
            if let Err(e) = config.scheduler().run(&orchestrator, &conn, &policy, &cancel) {
                error!("{e}");
                exit(1);
            }
        }
    }
}

fn print_result(result: &BackupResult, json: bool) {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Serializing backup result failed: {e}"),
        }
        return;
    }

    match result.file_path() {
        Some(file_path) if result.success() => {
            println!("Backup completed successfully");
            println!("  File:     {}", file_path.display());
            println!("  Size:     {}", format_file_size(result.size_bytes()));
            println!(
                "  Duration: {}",
                humantime::format_duration(std::time::Duration::from_millis(
                    result.duration().as_millis() as u64
                ))
            );
        }
        _ if result.is_cancelled() => eprintln!(
            "Backup cancelled: {}",
            result.failure_reason().unwrap_or("cancelled")
        ),
        _ => eprintln!(
            "Backup failed: {}",
            result.failure_reason().unwrap_or("unknown error")
        ),
    }
}

/// Cancels `cancel` on Ctrl-C, SIGINT or SIGTERM.
fn install_shutdown_handler(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown requested, stopping running backup");
        cancel.cancel();
    }) {
        warn!("Installing shutdown handler failed: {e}");
    }
}

fn exit_code(result: &BackupResult) -> i32 {
    if result.success() {
        0
    } else if result.is_cancelled() {
        EXIT_CANCELLED
    } else {
        1
    }
}
