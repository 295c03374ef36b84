//! Handoff protocol run by the primary when it receives SIGHUP.
//!
//! ```text
//!            SIGHUP / replacement spawned
//!  PRIMARY ──────────────────────────────▶ HANDING_OFF ──▶ exit
//!     ▲                                        │
//!     └──────────── spawn failed ──────────────┘
//! ```
//!
//! The replacement starts with `-graceful` so it skips the duplicate check,
//! then waits for this process to release the instance lock.

use steady_core::{CommandRunner, InstanceIdentity, ProcessId, SpawnOutput};

use crate::error::DaemonError;
use crate::fork::{fork_request, handoff_argv};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffState {
    Primary,
    HandingOff,
}

#[derive(Debug)]
pub struct Handoff {
    state: HandoffState,
}

impl Default for Handoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Handoff {
    pub fn new() -> Self {
        Self {
            state: HandoffState::Primary,
        }
    }

    pub fn state(&self) -> HandoffState {
        self.state
    }

    /// The single permitted transition, PRIMARY → HANDING_OFF.
    pub fn begin(&mut self) -> Result<(), DaemonError> {
        match self.state {
            HandoffState::Primary => {
                self.state = HandoffState::HandingOff;
                Ok(())
            }
            HandoffState::HandingOff => Err(DaemonError::HandoffInProgress),
        }
    }

    /// Return to PRIMARY after a replacement could not be started.
    pub fn abort(&mut self) {
        self.state = HandoffState::Primary;
    }

    /// Begin the handoff and spawn the replacement.
    ///
    /// On success the caller is expected to shut down. On failure the state
    /// is back to PRIMARY and the caller keeps serving.
    pub fn hand_off(
        &mut self,
        identity: &InstanceIdentity,
        runner: &dyn CommandRunner,
    ) -> Result<ProcessId, DaemonError> {
        self.begin()?;
        let spawned = fork_request(identity, &handoff_argv(identity.argv()), SpawnOutput::Inherit)
            .and_then(|request| runner.spawn_detached(&request).map_err(DaemonError::from));
        if spawned.is_err() {
            self.abort();
        }
        spawned
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::PathBuf;

    use steady_core::exec::testing::ScriptedRunner;

    use super::*;

    fn identity() -> InstanceIdentity {
        InstanceIdentity::new(
            Some(PathBuf::from("/srv/app")),
            "worker",
            ProcessId(300),
            vec![OsString::from("./worker"), OsString::from("--port=8080")],
        )
    }

    #[test]
    fn starts_as_primary() {
        assert_eq!(Handoff::new().state(), HandoffState::Primary);
    }

    #[test]
    fn only_one_transition_is_permitted() {
        let mut handoff = Handoff::new();
        handoff.begin().expect("first begin");
        assert_eq!(handoff.state(), HandoffState::HandingOff);
        assert!(matches!(handoff.begin(), Err(DaemonError::HandoffInProgress)));
    }

    #[test]
    fn hand_off_spawns_graceful_replacement() {
        let identity = identity();
        let runner = ScriptedRunner::new();
        let mut handoff = Handoff::new();

        handoff.hand_off(&identity, &runner).expect("hand off");
        assert_eq!(handoff.state(), HandoffState::HandingOff);

        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].program, PathBuf::from("/srv/app/worker"));
        assert_eq!(spawned[0].arg0, Some(OsString::from("./worker")));
        assert_eq!(
            spawned[0].args,
            vec![OsString::from("-graceful"), OsString::from("--port=8080")]
        );
    }

    #[test]
    fn repeated_signal_does_not_spawn_twice() {
        let identity = identity();
        let runner = ScriptedRunner::new();
        let mut handoff = Handoff::new();

        handoff.hand_off(&identity, &runner).expect("hand off");
        let err = handoff.hand_off(&identity, &runner).unwrap_err();
        assert!(matches!(err, DaemonError::HandoffInProgress));
        assert_eq!(runner.spawned().len(), 1);
    }

    #[test]
    fn failed_spawn_returns_to_primary() {
        let identity = identity();
        let runner = ScriptedRunner::new().failing_spawns();
        let mut handoff = Handoff::new();

        assert!(handoff.hand_off(&identity, &runner).is_err());
        assert_eq!(handoff.state(), HandoffState::Primary);
    }
}
