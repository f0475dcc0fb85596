//! SIGINT/SIGTERM handling (spec.md §5 "stop on signal"), replacing the
//! teacher's Win32 console-ctrl-handler with `signal-hook`'s portable
//! equivalent.

use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::supervisor::Supervisor;

/// Spawns a thread that blocks on SIGINT/SIGTERM and, on receipt, stops
/// every running injection before the process exits — the same
/// "release every key before going down" guarantee spec.md's
/// testable property 3 requires of a clean stop.
pub fn install(supervisor: Arc<Supervisor>) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::Builder::new()
        .name("signal-handler".into())
        .spawn(move || {
            for signal in signals.forever() {
                tracing::info!(signal, "received shutdown signal");
                supervisor.stop_all();
                std::process::exit(0);
            }
        })?;
    Ok(())
}
