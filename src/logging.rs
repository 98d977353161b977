//! Logging setup
//!
//! The library only emits `tracing` events. Hosts that want them printed
//! call [`init_logging`] once; the NIF load hook does this automatically.
//! `RUST_LOG` overrides the given filter.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

/// Install a global fmt subscriber. Fails if the process already has one.
pub fn init_logging(filter: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_span_events(FmtSpan::NONE)
        .finish()
        .try_init()
}
