//! Launch dispatcher: the startup decision, made once before any
//! application logic runs.
//!
//! | action      | outcome                                               |
//! |-------------|-------------------------------------------------------|
//! | `-graceful` | continue as the new primary                           |
//! | `-reload`   | [`Controller::reload`], exit                          |
//! | `-update`   | [`UpdatePipeline::update`], exit                      |
//! | `-stop`     | [`Controller::stop`], exit                            |
//! | `-tail`     | follow `<program>.out`                                |
//! | `-build`    | [`UpdatePipeline::compile_and_reload`], exit          |
//! | (none)      | duplicate check, then relaunch detached or continue   |
//!
//! This is the only layer that logs action failures and turns them into exit
//! codes.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;

use steady_core::{
    Action, CommandRunner, Controller, FetchOutcome, InstanceIdentity, PeerLocator, PipelineError,
    Reloaded, Settings, UpdatePipeline,
};

use crate::fork::spawn_worker;
use crate::paths::{log_path, DETACHED_ENV};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure => 1,
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.code())
    }
}

/// What the binary should do after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A terminal action finished; exit with this outcome.
    Exit(Outcome),
    /// Stream this log file to stdout.
    Tail(PathBuf),
    /// Run as the worker in this process.
    Continue { graceful: bool },
}

pub struct Launcher<'a> {
    identity: &'a InstanceIdentity,
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
    detached: bool,
}

impl<'a> Launcher<'a> {
    pub fn new(
        identity: &'a InstanceIdentity,
        settings: &'a Settings,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            identity,
            settings,
            runner,
            detached: std::env::var_os(DETACHED_ENV).is_some(),
        }
    }

    /// Override whether this invocation is the relaunched worker.
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn dispatch(&self, action: Action) -> Dispatch {
        match action {
            Action::Graceful => {
                tracing::info!("graceful restart acknowledged, continuing as primary");
                Dispatch::Continue { graceful: true }
            }
            Action::Reload => report(
                "reload",
                self.controller()
                    .reload()
                    .map(|pid| format!("reload signal sent to {pid}")),
            ),
            Action::Stop => report(
                "stop",
                self.controller()
                    .stop()
                    .map(|peers| format!("stop signal sent to {peers}")),
            ),
            Action::Update => report("update", self.pipeline().update().map(describe_reload)),
            Action::Build => report(
                "build",
                self.pipeline().compile_and_reload().map(describe_reload),
            ),
            Action::Tail => match log_path(self.identity) {
                Ok(path) => Dispatch::Tail(path),
                Err(err) => report::<String, _>("tail", Err(err)),
            },
            Action::Start => self.start(),
        }
    }

    fn start(&self) -> Dispatch {
        match PeerLocator::new(self.identity, self.settings, self.runner).find_peers() {
            Ok(peers) if !peers.is_empty() => {
                tracing::error!(peers = %peers, "program already running");
                return Dispatch::Exit(Outcome::Failure);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "peer query failed, relying on the instance lock");
            }
        }

        if self.detached || self.settings.foreground {
            return Dispatch::Continue { graceful: false };
        }
        self.bootstrap()
    }

    /// Relaunch detached with output in the log file, then let this call end.
    fn bootstrap(&self) -> Dispatch {
        if self.settings.rebuild_on_start {
            if let Err(err) = self.rebuild() {
                return report::<String, _>("start", Err(err));
            }
        }

        let result = spawn_worker(self.identity, self.runner).map(|pid| {
            if let Ok(log) = log_path(self.identity) {
                tracing::info!(
                    "view the worker log with `tail -f {}` or `{} -tail`",
                    log.display(),
                    self.identity.program()
                );
            }
            format!("started detached worker {pid}")
        });
        report("start", result)
    }

    fn rebuild(&self) -> Result<(), PipelineError> {
        let pipeline = self.pipeline();
        if let FetchOutcome::UpToDate(output) = pipeline.fetch()? {
            tracing::info!(output = %output, "source already up to date");
        }
        pipeline.compile()
    }

    fn controller(&self) -> Controller<'a> {
        Controller::new(self.identity, self.settings, self.runner)
    }

    fn pipeline(&self) -> UpdatePipeline<'a> {
        UpdatePipeline::new(self.identity, self.settings, self.runner)
    }
}

fn describe_reload(reloaded: Reloaded) -> String {
    match reloaded {
        Reloaded::Signaled(pid) => format!("rebuilt, reload signal sent to {pid}"),
        Reloaded::NoPeer => "rebuilt, no running instance to reload".to_string(),
    }
}

/// Log the result of a terminal action and map it to an exit outcome.
fn report<T: fmt::Display, E: fmt::Display>(action: &str, result: Result<T, E>) -> Dispatch {
    match result {
        Ok(message) => {
            tracing::info!(action, "{message}");
            Dispatch::Exit(Outcome::Success)
        }
        Err(err) => {
            tracing::error!(action, error = %err, "{action} failed");
            Dispatch::Exit(Outcome::Failure)
        }
    }
}
