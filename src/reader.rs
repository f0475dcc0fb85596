//! Single-threaded cooperative event loop for one injection (spec.md
//! §4.H, §5): multiplexes every device this injection has grabbed
//! through one `poll(2)` wait, dispatches through the [`HandlerGraph`],
//! and forwards whatever the graph doesn't claim.
//!
//! Deliberately not one thread per device: spec.md §9 "cooperative
//! concurrency" requires combination-handler state mutations to be
//! race-free without locks, which only holds if exactly one thread
//! drives one injection's graph.

use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::event::InputEvent;
use crate::handler::{DispatchContext, DispatchOutcome, HandlerGraph};
use crate::kernel;
use crate::macro_engine::MacroVars;
use crate::symbol_table::SymbolTable;
use crate::uinput::GlobalUinputs;

/// One device this injection has grabbed, paired with the forward
/// uinput built for it (spec.md §4.I) and the `origin_hash` the
/// handler graph was built against for its signatures.
pub struct GrabbedDevice {
    pub device: evdev::Device,
    pub forward: evdev::uinput::VirtualDevice,
    pub origin_hash: u64,
}

/// Upper bound on how long one `poll` wait blocks when nothing is
/// tickable, so the loop still notices `stop` promptly.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Drives `devices` through `graph` until `stop` is observed set.
/// Returns on the first unrecoverable device read error; transient
/// per-event errors are logged and do not end the loop (spec.md §7).
pub fn run(
    devices: &mut [GrabbedDevice],
    graph: &mut HandlerGraph,
    registry: &GlobalUinputs,
    symbols: &SymbolTable,
    vars: &MacroVars,
    stop: &AtomicBool,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }

        let now = Instant::now();
        let ctx = DispatchContext {
            registry,
            symbols,
            vars,
            now,
        };

        let wait = graph
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(IDLE_POLL)
            .min(IDLE_POLL);
        let wait_ms = u16::try_from(wait.as_millis()).unwrap_or(u16::MAX);

        let mut fds: Vec<PollFd> = devices
            .iter()
            .map(|d| PollFd::new(d.device.as_fd(), PollFlags::POLLIN))
            .collect();

        match poll(&mut fds, PollTimeout::from(wait_ms)) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                tracing::error!(error = %e, "poll failed on grabbed devices, ending injection loop");
                return;
            }
        }
        let readable: Vec<bool> = fds
            .iter()
            .map(|fd| fd.revents().is_some_and(|r| r.contains(PollFlags::POLLIN)))
            .collect();
        drop(fds);

        graph.tick_all(&ctx);

        for (i, is_readable) in readable.into_iter().enumerate() {
            if is_readable {
                read_device(&mut devices[i], graph, &ctx);
            }
        }
    }
}

fn read_device(dev: &mut GrabbedDevice, graph: &mut HandlerGraph, ctx: &DispatchContext) {
    let events = match dev.device.fetch_events() {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(error = %e, "device read failed");
            return;
        }
    };

    for raw in events {
        handle_raw_event(dev, raw, graph, ctx);
    }
}

/// Dispatches one raw kernel event. `SYN` frames are always forwarded
/// as-is (spec.md §4.H "syn events preserved"); everything else goes
/// through the graph and is forwarded verbatim only on `NotHandled`.
fn handle_raw_event(
    dev: &mut GrabbedDevice,
    raw: evdev::InputEvent,
    graph: &mut HandlerGraph,
    ctx: &DispatchContext,
) {
    if raw.event_type().0 == kernel::EV_SYN {
        if let Err(e) = dev.forward.emit(&[raw]) {
            tracing::warn!(error = %e, "failed forwarding syn frame");
        }
        return;
    }

    let event = InputEvent::new(raw.event_type().0, raw.code(), raw.value(), dev.origin_hash);
    match graph.dispatch(&event, ctx) {
        DispatchOutcome::Consumed => {}
        DispatchOutcome::Chain => {
            debug_assert!(false, "top-level dispatch must resolve Chain before returning");
        }
        DispatchOutcome::NotHandled => {
            if let Err(e) = dev.forward.emit(&[raw]) {
                tracing::warn!(error = %e, "failed forwarding unhandled event");
            }
        }
    }
}
