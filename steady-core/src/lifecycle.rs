//! Lifecycle controller: the signal protocol between instances.
//!
//! The observable state is derived from the peer set alone:
//!
//! ```text
//! peers | state          | reload()                 | stop()
//! ------+----------------+--------------------------+-------------------
//!   0   | NONE           | NotRunning               | NotRunning
//!   1   | RUNNING        | SIGHUP to that pid       | SIGTERM to it
//!  2+   | TRANSITIONING  | AlreadyTransitioning     | SIGTERM to all
//! ```
//!
//! Signals are fire-and-forget: nothing waits for the target to exit.

use crate::config::Settings;
use crate::error::{ExecError, LifecycleError};
use crate::exec::{render_command, CommandRunner, ShellCommand};
use crate::identity::InstanceIdentity;
use crate::peers::PeerLocator;
use crate::types::{PeerSet, PeerState, ProcessId, Signal};

pub struct Controller<'a> {
    identity: &'a InstanceIdentity,
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
}

impl<'a> Controller<'a> {
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

    /// Fresh peer query.
    pub fn peers(&self) -> Result<PeerSet, LifecycleError> {
        PeerLocator::new(self.identity, self.settings, self.runner)
            .find_peers()
            .map_err(LifecycleError::PeerQuery)
    }

    /// Ask the single running peer to hand off to a fresh instance.
    pub fn reload(&self) -> Result<ProcessId, LifecycleError> {
        let peers = self.peers()?;
        match peers.state() {
            PeerState::NoPeers => Err(LifecycleError::NotRunning),
            PeerState::Running(pid) => {
                self.send(Signal::Hangup, &[pid])?;
                Ok(pid)
            }
            PeerState::Transitioning(_) => Err(LifecycleError::AlreadyTransitioning { peers }),
        }
    }

    /// Terminate every peer. Returns the set that was signaled.
    pub fn stop(&self) -> Result<PeerSet, LifecycleError> {
        let peers = self.peers()?;
        if peers.is_empty() {
            return Err(LifecycleError::NotRunning);
        }
        self.send(Signal::Terminate, peers.ids())?;
        Ok(peers)
    }

    /// Ask this very process to hand off. Refused while any peer exists,
    /// since a second instance means a handoff is already under way.
    pub fn inner_reload(&self) -> Result<(), LifecycleError> {
        let peers = self.peers()?;
        if !peers.is_empty() {
            return Err(LifecycleError::AlreadyReloading { peers });
        }
        self.send(Signal::Hangup, &[self.identity.pid()])
    }

    /// Ask this very process to terminate.
    pub fn inner_stop(&self) -> Result<(), LifecycleError> {
        self.send(Signal::Terminate, &[self.identity.pid()])
    }

    /// One signal-delivery invocation covering all `pids`.
    fn send(&self, signal: Signal, pids: &[ProcessId]) -> Result<(), LifecycleError> {
        let pid_list = pids
            .iter()
            .map(ProcessId::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let wrap = |source: ExecError| LifecycleError::Signal {
            signal,
            pids: pid_list.clone(),
            source,
        };

        let script = render_command(
            &self.settings.signal_command,
            self.identity,
            &[("signal", signal.kill_name()), ("pids", &pid_list)],
        )
        .map_err(|err| wrap(err.into()))?;
        let command = ShellCommand::new(script);
        let output = self.runner.run(&command).map_err(wrap)?;
        if !output.success() {
            return Err(wrap(output.into_failure(&command)));
        }

        tracing::debug!(signal = %signal, pids = %pid_list, "signal delivered");
        Ok(())
    }
}
