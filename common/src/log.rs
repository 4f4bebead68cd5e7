//! Logging bootstrap shared by the `tablewire` binary and its tests.
//!
//! A `tracing_subscriber::fmt` setup guarded by `std::sync::Once`, with
//! stderr as the only sink: tablewire is a one-shot CLI invocation, not a
//! long-running server, so there is no file-rolling branch.

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT: Once = Once::new();

pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let level = if verbose { Level::DEBUG } else { Level::INFO };
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_span_events(FmtSpan::NONE)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
