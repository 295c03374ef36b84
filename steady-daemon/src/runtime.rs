use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::broadcast;
use tracing::Instrument;

use steady_core::{
    CommandRunner, Controller, FetchOutcome, InstanceIdentity, PipelineError, Settings,
    UpdatePipeline,
};

use crate::error::{io_err, DaemonError};
use crate::handoff::Handoff;
use crate::lock::InstanceLock;
use crate::paths::{lock_path, ROTATION_INTERVAL};

/// Everything a worker task needs, shared across tasks and blocking jobs.
#[derive(Clone)]
pub struct WorkerContext {
    pub identity: Arc<InstanceIdentity>,
    pub settings: Arc<Settings>,
    pub runner: Arc<dyn CommandRunner>,
}

impl WorkerContext {
    pub fn new(
        identity: InstanceIdentity,
        settings: Settings,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            identity: Arc::new(identity),
            settings: Arc::new(settings),
            runner,
        }
    }
}

/// SIGHUP and SIGTERM streams for the worker.
///
/// Until these exist a SIGHUP kills the process outright, so they are
/// installed before anything that can block. Signals that arrive before the
/// worker tasks start stay queued on the streams.
pub struct WorkerSignals {
    hangup: Signal,
    terminate: Signal,
}

impl WorkerSignals {
    /// Must be called from within a tokio runtime context.
    pub fn install() -> Result<Self, DaemonError> {
        Ok(Self {
            hangup: signal(SignalKind::hangup()).map_err(|e| io_err("SIGHUP handler", e))?,
            terminate: signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?,
        })
    }
}

/// Take the instance lock, then run the worker until shutdown.
///
/// A `-graceful` replacement waits up to `handoff_wait_secs` for the previous
/// primary to let go of the lock; a plain start refuses at once.
pub fn start_blocking(ctx: WorkerContext, graceful: bool) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let signals = {
        let _guard = runtime.enter();
        WorkerSignals::install()?
    };

    let path = lock_path(&ctx.identity)?;
    let pid = ctx.identity.pid();
    let lock = if graceful {
        let wait = Duration::from_secs(ctx.settings.handoff_wait_secs);
        InstanceLock::acquire_waiting(&path, pid, wait)?
    } else {
        InstanceLock::try_acquire(&path, pid)?
    };
    tracing::info!(lock = %lock.path().display(), graceful, "worker started");

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let result = runtime.block_on(run(ctx, shutdown_tx, signals));

    tracing::info!("worker stopped");
    drop(lock);
    result
}

/// Run the worker tasks until one of them ends or shutdown is broadcast.
pub async fn run(
    ctx: WorkerContext,
    shutdown_tx: broadcast::Sender<()>,
    signals: WorkerSignals,
) -> Result<(), DaemonError> {
    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(
            async move {
                let result = signal_task(ctx, shutdown.clone(), signals).await;
                let _ = shutdown.send(());
                result
            }
            .in_current_span(),
        )
    };

    let heartbeat_handle = {
        let shutdown = shutdown_tx.clone();
        let every = Duration::from_secs(ctx.settings.heartbeat_secs.max(1));
        tokio::spawn(
            async move {
                let result = heartbeat_task(every, shutdown.subscribe()).await;
                let _ = shutdown.send(());
                result
            }
            .in_current_span(),
        )
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(
            async move {
                let result = log_rotation_task(ctx, shutdown.subscribe()).await;
                let _ = shutdown.send(());
                result
            }
            .in_current_span(),
        )
    };

    let update_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(
            async move {
                let result = auto_update_task(ctx, shutdown.subscribe()).await;
                let _ = shutdown.send(());
                result
            }
            .in_current_span(),
        )
    };

    let (signal_result, heartbeat_result, rotation_result, update_result) = tokio::join!(
        signal_handle,
        heartbeat_handle,
        rotation_handle,
        update_handle
    );

    handle_join("signal_handler", signal_result)?;
    handle_join("heartbeat", heartbeat_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("auto_update", update_result)?;
    Ok(())
}

/// SIGHUP hands off to a replacement; SIGTERM and Ctrl-C shut down.
async fn signal_task(
    ctx: WorkerContext,
    shutdown: broadcast::Sender<()>,
    signals: WorkerSignals,
) -> Result<(), DaemonError> {
    let mut shutdown_rx = shutdown.subscribe();
    let WorkerSignals {
        mut hangup,
        mut terminate,
    } = signals;
    let mut handoff = Handoff::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = hangup.recv() => {
                match handoff.hand_off(&ctx.identity, ctx.runner.as_ref()) {
                    Ok(pid) => {
                        tracing::info!(replacement = %pid, "received SIGHUP, handing off");
                        let _ = shutdown.send(());
                    }
                    Err(DaemonError::HandoffInProgress) => {
                        tracing::warn!("received SIGHUP while handing off, ignoring");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "handoff failed, continuing as primary");
                    }
                }
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down");
                        break;
                    }
                    Err(err) => return Err(DaemonError::Runtime(format!("ctrl-c handler failed: {err}"))),
                }
            }
        }
    }
    Ok(())
}

/// Stand-in for the hosted application: periodic proof of life.
async fn heartbeat_task(
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let started = tokio::time::Instant::now();
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                tracing::info!(uptime_secs = started.elapsed().as_secs(), "heartbeat");
            }
        }
    }
    Ok(())
}

async fn log_rotation_task(
    ctx: WorkerContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let ctx = ctx.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_log(&ctx.identity, &ctx.settings);
                })
                .await
                .ok();
            }
        }
    }
    Ok(())
}

/// Fetch and rebuild every `auto_update_secs`; idle when unset or 0.
async fn auto_update_task(
    ctx: WorkerContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(secs) = ctx.settings.auto_update_secs.filter(|secs| *secs > 0) else {
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let job = ctx.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    self_update_once(&job.identity, &job.settings, job.runner.as_ref())
                })
                .await
                .map_err(|err| DaemonError::Runtime(format!("auto-update join error: {err}")))?;

                match outcome {
                    Ok(true) => tracing::info!("auto-update built a new binary, reload requested"),
                    Ok(false) => {}
                    Err(err) => tracing::error!(error = %err, "auto-update failed"),
                }
            }
        }
    }
    Ok(())
}

/// One self-update round: fetch, and if anything changed, compile and ask
/// this process to hand off. Returns whether a reload was requested.
pub fn self_update_once(
    identity: &InstanceIdentity,
    settings: &Settings,
    runner: &dyn CommandRunner,
) -> Result<bool, PipelineError> {
    let pipeline = UpdatePipeline::new(identity, settings, runner);
    match pipeline.fetch()? {
        FetchOutcome::UpToDate(_) => {
            tracing::debug!("auto-update: source up to date");
            return Ok(false);
        }
        FetchOutcome::Updated(summary) => {
            tracing::info!(summary = %summary, "auto-update: source changed");
        }
    }
    pipeline.compile()?;
    Controller::new(identity, settings, runner).inner_reload()?;
    Ok(true)
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Runtime(format!("{task} task join failure: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::PathBuf;

    use steady_core::exec::testing::ScriptedRunner;
    use steady_core::{CommandOutput, LifecycleError, ProcessId};
    use tempfile::TempDir;

    use super::*;

    fn identity(dir: PathBuf) -> InstanceIdentity {
        InstanceIdentity::new(
            Some(dir),
            "worker",
            ProcessId(300),
            vec![OsString::from("./worker")],
        )
    }

    fn settings() -> Settings {
        Settings {
            fetch_command: "fetch-tool".to_string(),
            build_command: "build-tool".to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn self_update_is_quiet_when_up_to_date() {
        let runner = ScriptedRunner::new().on("fetch-tool", CommandOutput::ok("Already up to date.\n"));
        let identity = identity(PathBuf::from("/srv/app"));

        let reloaded = self_update_once(&identity, &settings(), &runner).unwrap();
        assert!(!reloaded);
        assert_eq!(runner.scripts(), vec!["fetch-tool".to_string()]);
    }

    #[test]
    fn self_update_builds_then_signals_itself() {
        let runner = ScriptedRunner::new()
            .on("fetch-tool", CommandOutput::ok("2 files changed\n"))
            .on("pidof", CommandOutput::failed(1, "", ""));
        let identity = identity(PathBuf::from("/srv/app"));

        assert!(self_update_once(&identity, &settings(), &runner).unwrap());
        assert_eq!(
            runner.scripts(),
            vec![
                "fetch-tool".to_string(),
                "build-tool".to_string(),
                "pidof worker".to_string(),
                "kill -HUP 300".to_string()
            ]
        );
    }

    #[test]
    fn self_update_refuses_while_a_peer_exists() {
        let runner = ScriptedRunner::new()
            .on("fetch-tool", CommandOutput::ok("1 file changed\n"))
            .on("pidof", CommandOutput::ok("300 301\n"));
        let identity = identity(PathBuf::from("/srv/app"));

        let err = self_update_once(&identity, &settings(), &runner).unwrap_err();
        assert!(
            matches!(err, PipelineError::Reload(LifecycleError::AlreadyReloading { .. })),
            "got: {err}"
        );
        assert!(runner.ran_matching("kill").is_empty());
    }

    #[test]
    fn self_update_stops_on_failed_build() {
        let runner = ScriptedRunner::new()
            .on("fetch-tool", CommandOutput::ok("1 file changed\n"))
            .on("build-tool", CommandOutput::failed(101, "", "error[E0308]"));
        let identity = identity(PathBuf::from("/srv/app"));

        let err = self_update_once(&identity, &settings(), &runner).unwrap_err();
        assert!(matches!(err, PipelineError::Compile(_)), "got: {err}");
        assert!(runner.ran_matching("pidof").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_update_runs_on_its_interval() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new().on("fetch-tool", CommandOutput::ok("Already up to date.")),
        );
        let settings = Settings {
            auto_update_secs: Some(60),
            ..settings()
        };
        let ctx = WorkerContext::new(identity(dir.path().to_path_buf()), settings, runner.clone());
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let task = tokio::spawn(auto_update_task(ctx, shutdown_tx.subscribe()));
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(runner.ran_matching("fetch-tool").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_auto_update_waits_for_shutdown() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = WorkerContext::new(identity(dir.path().to_path_buf()), settings(), runner.clone());
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let task = tokio::spawn(auto_update_task(ctx, shutdown_tx.subscribe()));
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!task.is_finished());
        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(runner.scripts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_task_rotates_oversized_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("worker.out");
        std::fs::write(&log, vec![b'x'; 2048]).unwrap();
        let settings = Settings {
            log_max_bytes: 1024,
            ..settings()
        };
        let ctx = WorkerContext::new(
            identity(dir.path().to_path_buf()),
            settings,
            Arc::new(ScriptedRunner::new()),
        );
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let task = tokio::spawn(log_rotation_task(ctx, shutdown_tx.subscribe()));
        tokio::time::sleep(ROTATION_INTERVAL + Duration::from_secs(1)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(std::fs::metadata(&log).unwrap().len(), 0);
        assert!(dir.path().join("worker.out.1").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_once_shutdown_is_broadcast() {
        let dir = TempDir::new().unwrap();
        let ctx = WorkerContext::new(
            identity(dir.path().to_path_buf()),
            settings(),
            Arc::new(ScriptedRunner::new()),
        );
        let (shutdown_tx, _) = broadcast::channel::<()>(16);

        let signals = WorkerSignals::install().unwrap();
        let worker = tokio::spawn(run(ctx, shutdown_tx.clone(), signals));
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(()).unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn hangup_before_the_worker_runs_is_not_lost() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = WorkerContext::new(identity(dir.path().to_path_buf()), settings(), runner.clone());
        let (shutdown_tx, _) = broadcast::channel::<()>(16);

        let signals = WorkerSignals::install().unwrap();
        nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).unwrap();
        tokio::time::timeout(Duration::from_secs(10), run(ctx, shutdown_tx, signals))
            .await
            .expect("queued SIGHUP should hand off and stop the worker")
            .unwrap();

        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].args.iter().any(|arg| arg == "-graceful"), "got: {spawned:?}");
    }

    #[test]
    fn second_worker_is_refused_by_the_lock() {
        let dir = TempDir::new().unwrap();
        let ctx = WorkerContext::new(
            identity(dir.path().to_path_buf()),
            settings(),
            Arc::new(ScriptedRunner::new()),
        );
        let _held = InstanceLock::try_acquire(&dir.path().join("worker.lock"), ProcessId(1)).unwrap();

        let err = start_blocking(ctx, false).unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning { .. }), "got: {err}");
    }
}
