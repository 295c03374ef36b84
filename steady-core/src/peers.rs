//! Peer discovery through the process table.

use crate::config::Settings;
use crate::error::ExecError;
use crate::exec::{render_command, CommandRunner, ShellCommand};
use crate::identity::InstanceIdentity;
use crate::types::{PeerSet, ProcessId};

/// Finds other processes running under this program's name.
pub struct PeerLocator<'a> {
    identity: &'a InstanceIdentity,
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
}

impl<'a> PeerLocator<'a> {
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

    /// Query the process table now. The caller's pid is never included.
    ///
    /// Exit status 1 with no output is how `pidof` reports "nothing found"
    /// and yields an empty set; any other failure is an error.
    pub fn find_peers(&self) -> Result<PeerSet, ExecError> {
        let script = render_command(&self.settings.query_command, self.identity, &[])?;
        let command = ShellCommand::new(script);
        let output = self.runner.run(&command)?;

        if !output.success() {
            if output.code == Some(1) && output.stdout.trim().is_empty() {
                return Ok(PeerSet::default());
            }
            return Err(output.into_failure(&command));
        }

        let peers = PeerSet::from_ids(parse_pids(&output.stdout), self.identity.pid());
        tracing::debug!(program = %self.identity.program(), peers = %peers, "peer query finished");
        Ok(peers)
    }
}

/// Every run of ASCII digits in `text`, in order of appearance.
pub fn parse_pids(text: &str) -> Vec<ProcessId> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse().ok())
        .collect()
}
