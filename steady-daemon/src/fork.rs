//! Detached relaunches of the current program.

use std::ffi::OsString;

use steady_core::{Action, CommandRunner, InstanceIdentity, ProcessId, SpawnOutput, SpawnRequest};

use crate::error::DaemonError;
use crate::paths::{log_path, DETACHED_ENV};

/// Spawn request running the executable with `argv` exactly as given,
/// `argv[0]` included.
pub fn fork_request(
    identity: &InstanceIdentity,
    argv: &[OsString],
    output: SpawnOutput,
) -> Result<SpawnRequest, DaemonError> {
    Ok(SpawnRequest {
        program: identity.executable()?,
        arg0: argv.first().cloned(),
        args: argv.iter().skip(1).cloned().collect(),
        cwd: None,
        output,
        env: Vec::new(),
    })
}

/// Start a copy of this process with the original argument vector, sharing
/// its output. Returns once the child exists.
pub fn fork(
    identity: &InstanceIdentity,
    runner: &dyn CommandRunner,
) -> Result<ProcessId, DaemonError> {
    let request = fork_request(identity, identity.argv(), SpawnOutput::Inherit)?;
    Ok(runner.spawn_detached(&request)?)
}

/// The bootstrap relaunch: same arguments, run from the executable directory
/// with output appended to `<program>.out`, marked as the detached worker.
pub fn spawn_worker(
    identity: &InstanceIdentity,
    runner: &dyn CommandRunner,
) -> Result<ProcessId, DaemonError> {
    let mut request = fork_request(
        identity,
        identity.argv(),
        SpawnOutput::AppendTo(log_path(identity)?),
    )?;
    request.cwd = Some(identity.exec_dir()?.to_path_buf());
    request.env.push((DETACHED_ENV.to_string(), "1".to_string()));
    Ok(runner.spawn_detached(&request)?)
}

/// Arguments for a handoff replacement: the original vector with
/// `-graceful` in first position, replacing a `-graceful` already there.
pub fn handoff_argv(argv: &[OsString]) -> Vec<OsString> {
    let graceful = Action::Graceful.flag().unwrap_or("-graceful");
    let mut rest = argv.iter().skip(1).peekable();
    if rest.peek().is_some_and(|arg| arg.as_os_str() == graceful) {
        rest.next();
    }

    let mut out = Vec::with_capacity(argv.len() + 1);
    out.extend(argv.first().cloned());
    out.push(OsString::from(graceful));
    out.extend(rest.cloned());
    out
}
