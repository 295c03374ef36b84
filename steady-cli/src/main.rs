//! steady: run a program as a single self-supervising instance.
//!
//! # Usage
//!
//! ```text
//! steady [--heartbeat-secs <N>]     start, relaunching detached unless already running
//! steady -graceful                  continue as the new primary after a reload signal
//! steady -reload                    ask the running instance to hand off
//! steady -update                    fetch, rebuild and reload
//! steady -build                     rebuild and reload
//! steady -stop                      terminate every running instance
//! steady -tail                      follow <program>.out
//! ```

use std::ffi::OsString;
use std::io;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use steady_core::{Action, CommandRunner, InstanceIdentity, Settings, SystemRunner};
use steady_daemon::{
    exec_tail, follow, init_tracing, process_span, start_blocking, DaemonError, Dispatch, Launcher,
    WorkerContext,
};

/// Host arguments, accepted after the action flag or on their own.
#[derive(Parser, Debug)]
#[command(
    name = "steady",
    version,
    about = "Run a program as one self-supervising instance",
    long_about = None,
)]
struct HostArgs {
    /// Seconds between worker heartbeats.
    #[arg(long, value_name = "SECS")]
    heartbeat_secs: Option<u64>,
}

impl HostArgs {
    /// Parse everything except the action flag.
    fn from_argv(argv: &[OsString], action: Action) -> Result<Self, clap::Error> {
        let skip = if action.flag().is_some() { 2 } else { 1 };
        let program = argv.first().cloned().unwrap_or_else(|| OsString::from("steady"));
        HostArgs::try_parse_from(std::iter::once(program).chain(argv.iter().skip(skip).cloned()))
    }
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let identity = InstanceIdentity::from_env();
    let span = process_span(&identity);
    let _entered = span.enter();

    let action = Action::from_args(identity.argv());
    let host = match HostArgs::from_argv(identity.argv(), action) {
        Ok(host) => host,
        Err(err) => {
            // --help and --version land here too and are not failures.
            let _ = err.print();
            return Ok(if err.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS });
        }
    };

    let mut settings = Settings::load(&identity).context("failed to load settings")?;
    if let Some(secs) = host.heartbeat_secs {
        settings.heartbeat_secs = secs;
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let dispatch = Launcher::new(&identity, &settings, runner.as_ref()).dispatch(action);

    match dispatch {
        Dispatch::Exit(outcome) => Ok(outcome.into()),
        Dispatch::Tail(path) => {
            match exec_tail(&path) {
                err @ DaemonError::LogNotFound { .. } => {
                    return Err(err).with_context(|| format!("failed to follow {}", path.display()));
                }
                err => tracing::warn!(error = %err, "tail unavailable, following in-process"),
            }
            let stop = AtomicBool::new(false);
            follow(&path, &mut io::stdout().lock(), &stop)
                .with_context(|| format!("failed to follow {}", path.display()))?;
            Ok(ExitCode::SUCCESS)
        }
        Dispatch::Continue { graceful } => {
            start_blocking(WorkerContext::new(identity, settings, runner), graceful)
                .context("worker exited with error")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
