use std::io::IsTerminal;

use steady_core::InstanceIdentity;
use tracing::Span;

/// Install the process-wide subscriber. `RUST_LOG` overrides the `info`
/// default. Colors only when stdout is a terminal, since the detached worker
/// writes into its log file.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

/// Root span carried by every line this process logs.
pub fn process_span(identity: &InstanceIdentity) -> Span {
    tracing::info_span!("steady", pid = %identity.pid())
}
