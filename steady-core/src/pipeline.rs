//! Update pipeline: fetch → compile → reload.
//!
//! Stages run strictly in order and the first failure aborts the rest, so a
//! running instance is only ever signaled after a successful build. Nothing
//! is rolled back; a failed run leaves the previous instance untouched.

use crate::config::Settings;
use crate::error::{LifecycleError, PipelineError};
use crate::exec::{render_command, CommandRunner, ShellCommand};
use crate::identity::InstanceIdentity;
use crate::lifecycle::Controller;
use crate::types::{FetchOutcome, ProcessId};

/// What the reload stage did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reloaded {
    /// The running peer was asked to hand off.
    Signaled(ProcessId),
    /// Nothing was running; the new binary takes effect on next start.
    NoPeer,
}

pub struct UpdatePipeline<'a> {
    identity: &'a InstanceIdentity,
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
}

impl<'a> UpdatePipeline<'a> {
    pub fn new(
        identity: &'a InstanceIdentity,
        settings: &'a Settings,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            identity,
            settings,
            runner,
        }
    }

    /// Full pipeline. "Nothing to update" aborts like any fetch failure.
    pub fn update(&self) -> Result<Reloaded, PipelineError> {
        match self.fetch()? {
            FetchOutcome::Updated(summary) => {
                tracing::info!(summary = %summary, "source updated");
            }
            FetchOutcome::UpToDate(output) => return Err(PipelineError::NothingToUpdate(output)),
        }
        self.compile_and_reload()
    }

    /// Compile, then reload. Used by `-build`.
    pub fn compile_and_reload(&self) -> Result<Reloaded, PipelineError> {
        self.compile()?;
        self.reload()
    }

    /// Pull new source. The tool output decides whether anything changed.
    pub fn fetch(&self) -> Result<FetchOutcome, PipelineError> {
        let command = self.stage_command(&self.settings.fetch_command)?;
        let output = self
            .runner
            .run(&command)
            .map_err(PipelineError::Fetch)?;
        if !output.success() {
            return Err(PipelineError::Fetch(output.into_failure(&command)));
        }

        let text = output.stdout.trim_end().to_string();
        if text.contains(&self.settings.change_marker) {
            Ok(FetchOutcome::Updated(text))
        } else {
            Ok(FetchOutcome::UpToDate(text))
        }
    }

    /// Rebuild the executable in place.
    pub fn compile(&self) -> Result<(), PipelineError> {
        let command = self.stage_command(&self.settings.build_command)?;
        let output = self
            .runner
            .run(&command)
            .map_err(PipelineError::Compile)?;
        if !output.success() {
            return Err(PipelineError::Compile(output.into_failure(&command)));
        }
        tracing::info!(program = %self.identity.program(), "build finished");
        Ok(())
    }

    /// Hand off to the rebuilt binary if an instance is running.
    pub fn reload(&self) -> Result<Reloaded, PipelineError> {
        match Controller::new(self.identity, self.settings, self.runner).reload() {
            Ok(pid) => Ok(Reloaded::Signaled(pid)),
            Err(LifecycleError::NotRunning) => Ok(Reloaded::NoPeer),
            Err(err) => Err(err.into()),
        }
    }

    fn stage_command(&self, template: &str) -> Result<ShellCommand, PipelineError> {
        let dir = self.settings.source_dir(self.identity)?;
        let script = render_command(template, self.identity, &[])?;
        Ok(ShellCommand::new(script).in_dir(dir))
    }
}
