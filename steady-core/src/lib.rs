//! steady core library: identity, settings, the command-execution boundary,
//! and the lifecycle state machine built on top of it.
//!
//! Public API surface:
//! - [`identity`]: [`InstanceIdentity`], resolved once at startup
//! - [`config`]: [`Settings`] loaded from `steady.yaml` + `STEADY_*` overrides
//! - [`exec`]: [`CommandRunner`] boundary and the system implementation
//! - [`peers`]: [`PeerLocator`], live process-table queries
//! - [`lifecycle`]: [`Controller`]: reload / stop / inner variants
//! - [`pipeline`]: [`UpdatePipeline`]: fetch → compile → reload
//! - [`types`]: newtypes and small domain enums
//! - [`error`]: one error enum per concern

pub mod config;
pub mod error;
pub mod exec;
pub mod identity;
pub mod lifecycle;
pub mod peers;
pub mod pipeline;
pub mod types;

pub use config::Settings;
pub use error::{ConfigError, ExecError, IdentityError, LifecycleError, PipelineError};
pub use exec::{CommandOutput, CommandRunner, ShellCommand, SpawnOutput, SpawnRequest, SystemRunner};
pub use identity::InstanceIdentity;
pub use lifecycle::Controller;
pub use peers::PeerLocator;
pub use pipeline::{Reloaded, UpdatePipeline};
pub use types::{Action, FetchOutcome, PeerSet, PeerState, ProcessId, Signal};
