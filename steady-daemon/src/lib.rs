//! Process supervision: instance lock, self-relaunch, graceful handoff and
//! the worker runtime.

#![cfg(unix)]

mod error;
pub mod fork;
pub mod handoff;
pub mod launcher;
pub mod lock;
pub mod log_rotation;
pub mod logging;
pub mod paths;
pub mod runtime;
pub mod tail;

pub use error::DaemonError;
pub use handoff::{Handoff, HandoffState};
pub use launcher::{Dispatch, Launcher, Outcome};
pub use lock::{InstanceLock, LockRecord};
pub use logging::{init_tracing, process_span};
pub use runtime::{self_update_once, start_blocking, WorkerContext};
pub use tail::{exec_tail, follow};
