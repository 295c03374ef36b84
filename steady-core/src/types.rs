//! Domain types for the launcher.
//!
//! Process ids are strongly typed; the peer set is always a fresh query result
//! and is never stored beyond the decision it feeds.

use std::ffi::OsString;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// An OS process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl FromStr for ProcessId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

// ---------------------------------------------------------------------------
// Peer set
// ---------------------------------------------------------------------------

/// Process ids sharing this program's name, never including the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet(Vec<ProcessId>);

impl PeerSet {
    /// Build a peer set from raw query results, dropping `own` wherever it
    /// appears.
    pub fn from_ids(ids: impl IntoIterator<Item = ProcessId>, own: ProcessId) -> Self {
        Self(ids.into_iter().filter(|pid| *pid != own).collect())
    }

    pub fn ids(&self) -> &[ProcessId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn state(&self) -> PeerState {
        match self.0.as_slice() {
            [] => PeerState::NoPeers,
            [pid] => PeerState::Running(*pid),
            many => PeerState::Transitioning(many.len()),
        }
    }
}

impl fmt::Display for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, pid) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            pid.fmt(f)?;
        }
        f.write_str("]")
    }
}

/// Lifecycle state observed through the peer set cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Nothing else is running.
    NoPeers,
    /// Exactly one peer: the steady state.
    Running(ProcessId),
    /// Two or more peers: an old and a new instance during handoff.
    Transitioning(usize),
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Signals the controller delivers to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGHUP: graceful reload requested.
    Hangup,
    /// SIGTERM: stop.
    Terminate,
}

impl Signal {
    /// Name as accepted by `kill -<NAME>`.
    pub fn kill_name(self) -> &'static str {
        match self {
            Signal::Hangup => "HUP",
            Signal::Terminate => "TERM",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kill_name())
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// What an invocation asks for, taken from its first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No recognized flag: normal startup.
    Start,
    /// `-graceful`: a replacement spawned by a handoff.
    Graceful,
    /// `-reload`
    Reload,
    /// `-update`
    Update,
    /// `-stop`
    Stop,
    /// `-tail`
    Tail,
    /// `-build`
    Build,
}

impl Action {
    pub const FLAGS: [Action; 6] = [
        Action::Graceful,
        Action::Reload,
        Action::Update,
        Action::Stop,
        Action::Tail,
        Action::Build,
    ];

    /// The command-line flag selecting this action, `None` for [`Action::Start`].
    pub fn flag(self) -> Option<&'static str> {
        match self {
            Action::Start => None,
            Action::Graceful => Some("-graceful"),
            Action::Reload => Some("-reload"),
            Action::Update => Some("-update"),
            Action::Stop => Some("-stop"),
            Action::Tail => Some("-tail"),
            Action::Build => Some("-build"),
        }
    }

    /// Select the action from a full argument vector (`argv[0]` included).
    /// Anything other than a known flag in position 1 means [`Action::Start`].
    pub fn from_args(argv: &[OsString]) -> Self {
        argv.get(1)
            .and_then(|arg| arg.to_str())
            .and_then(|arg| arg.parse().ok())
            .unwrap_or(Action::Start)
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::FLAGS
            .into_iter()
            .find(|action| action.flag() == Some(s))
            .ok_or_else(|| format!("unknown action '{s}'"))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag().unwrap_or("start"))
    }
}

// ---------------------------------------------------------------------------
// Fetch outcome
// ---------------------------------------------------------------------------

/// Result of a successful pull. Both variants carry the trimmed tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Updated(String),
    UpToDate(String),
}
