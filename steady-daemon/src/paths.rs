use std::path::PathBuf;
use std::time::Duration;

use steady_core::{IdentityError, InstanceIdentity};

pub const LOG_EXTENSION: &str = "out";
pub const LOCK_EXTENSION: &str = "lock";

/// Set on the relaunched worker so it runs in place instead of relaunching.
pub const DETACHED_ENV: &str = "STEADY_DETACHED";

pub const ROTATION_INTERVAL: Duration = Duration::from_secs(5);
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `<exec_dir>/<program>.out`
pub fn log_path(identity: &InstanceIdentity) -> Result<PathBuf, IdentityError> {
    Ok(identity
        .exec_dir()?
        .join(format!("{}.{LOG_EXTENSION}", identity.program())))
}

/// `<exec_dir>/<program>.lock`
pub fn lock_path(identity: &InstanceIdentity) -> Result<PathBuf, IdentityError> {
    Ok(identity
        .exec_dir()?
        .join(format!("{}.{LOCK_EXTENSION}", identity.program())))
}
