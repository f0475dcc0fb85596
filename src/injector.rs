//! Injector lifecycle (spec.md §4.I, component J): grabs the physical
//! devices a preset actually needs out of one [`DeviceGroup`], copies
//! their capabilities into per-device forward uinputs, compiles the
//! preset into a [`HandlerGraph`], and drives [`crate::reader::run`]
//! until asked to stop.
//!
//! One OS thread per injection (spec.md §5 "one OS thread per grabbed
//! device runs a blocking loop" — here, one thread multiplexes all of
//! an injection's grabbed devices through a single `poll(2)` wait, so
//! the cooperative no-lock invariant on handler state holds). Grabbing
//! and capability copying happen on that same thread, before the state
//! transitions to `Running`, mirroring the source's `Injector.run`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::classify::DeviceClass;
use crate::device::group::origin_hash_for_device;
use crate::device::DeviceGroup;
use crate::forward;
use crate::handler::graph::{AxisRangeSource, HandlerGraph};
use crate::handler::DispatchContext;
use crate::kernel;
use crate::macro_engine::MacroVars;
use crate::mapping::Preset;
use crate::numlock;
use crate::reader::{self, GrabbedDevice};
use crate::symbol_table::SymbolTable;
use crate::uinput::GlobalUinputs;

/// States per spec.md §4.I. `Unknown` is the pre-`start()` value; once
/// `start()` is called the state only ever moves forward through this
/// list (never back to `Unknown`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorState {
    Unknown,
    Starting,
    Running,
    Stopped,
    Failed,
    NoGrab,
    UpgradeEvdev,
}

impl InjectorState {
    pub fn active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::NoGrab | Self::UpgradeEvdev)
    }
}

/// Tuning knobs spec.md §4.I gives exact values for.
#[derive(Debug, Clone, Copy)]
pub struct InjectorConfig {
    pub grab_retry_attempts: usize,
    pub grab_retry_interval: Duration,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            grab_retry_attempts: 10,
            grab_retry_interval: Duration::from_millis(200),
        }
    }
}

/// Retries `attempt` up to `attempts` times, sleeping `interval` between
/// failures. Pulled out as a pure function so the retry *policy*
/// (spec.md §4.I: "10 attempts at 200ms each") is unit-testable without
/// a real device grab — tests pass `Duration::ZERO` and a closure that
/// fails a known number of times.
pub fn retry<T, E>(
    attempts: usize,
    interval: Duration,
    mut attempt: impl FnMut(usize) -> Result<T, E>,
) -> Result<T, E> {
    assert!(attempts > 0);
    let mut last_err = None;
    for i in 0..attempts {
        match attempt(i) {
            Ok(v) => return Ok(v),
            Err(e) => last_err = Some(e),
        }
        if i + 1 < attempts {
            thread::sleep(interval);
        }
    }
    Err(last_err.expect("attempts > 0 guarantees at least one failed attempt here"))
}

/// One running (or finished) injection for one device group. Owned by
/// the supervisor (spec.md §4.J / component K); dropping this without
/// calling [`Self::stop`] leaks the worker thread (it keeps running
/// until the process exits) — always go through `stop`.
pub struct Injector {
    group_key: String,
    state: Arc<Mutex<InjectorState>>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Injector {
    /// Spawns the injection worker and returns immediately in the
    /// `Starting` state (spec.md §4.I `start()` transition).
    pub fn start(
        group: DeviceGroup,
        preset: Preset,
        symbols: Arc<SymbolTable>,
        registry: Arc<GlobalUinputs>,
        vars: Arc<MacroVars>,
        config: InjectorConfig,
    ) -> Self {
        let group_key = group.key.clone();
        let state = Arc::new(Mutex::new(InjectorState::Starting));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let thread_state = state.clone();
        let thread_stop = stop_flag.clone();
        let thread_group_key = group_key.clone();

        let thread = thread::Builder::new()
            .name(format!("injector-{group_key}"))
            .spawn(move || {
                run(
                    thread_group_key,
                    group,
                    preset,
                    symbols,
                    registry,
                    vars,
                    config,
                    thread_state,
                    thread_stop,
                )
            })
            .expect("failed to spawn injector worker thread");

        Self {
            group_key,
            state,
            stop_flag,
            thread: Some(thread),
        }
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn state(&self) -> InjectorState {
        *self.state.lock().expect("injector state mutex poisoned")
    }

    /// Sets the shared stop flag and joins the worker thread (spec.md
    /// §4.I `stop()` / §5 cancellation). The worker releases every key
    /// it might be holding and ungrabs its devices before this returns.
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Injector {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    group_key: String,
    group: DeviceGroup,
    preset: Preset,
    symbols: Arc<SymbolTable>,
    registry: Arc<GlobalUinputs>,
    vars: Arc<MacroVars>,
    config: InjectorConfig,
    state: Arc<Mutex<InjectorState>>,
    stop: Arc<AtomicBool>,
) {
    let set_state = |s: InjectorState| {
        *state.lock().expect("injector state mutex poisoned") = s;
    };

    tracing::info!(group_key = %group_key, preset = %preset.name, "starting injection");

    let mut opened = Vec::new();
    for path in &group.paths {
        match evdev::Device::open(path) {
            Ok(device) => opened.push(device),
            Err(e) => tracing::error!(group_key = %group_key, path, error = %e, "could not open device for injection"),
        }
    }

    let needed = select_needed_devices(&preset, opened);
    if needed.is_empty() {
        tracing::error!(group_key = %group_key, "did not grab any device");
        set_state(InjectorState::NoGrab);
        return;
    }

    // Grab as early as possible: events that arrive before the grab
    // would otherwise look held down forever (spec.md §4.I).
    let mut grabbed: Vec<GrabbedDevice> = Vec::new();
    let mut numlock_snapshot: Option<bool> = None;

    for mut device in needed {
        let grab_result = retry(config.grab_retry_attempts, config.grab_retry_interval, |_| device.grab());
        if let Err(e) = grab_result {
            tracing::error!(group_key = %group_key, error = %e, "cannot grab device, possibly in use");
            set_state(InjectorState::Failed);
            ungrab_all(&mut grabbed);
            return;
        }

        if numlock_snapshot.is_none() {
            numlock_snapshot = numlock::is_numlock_on(&device);
        }

        let origin_hash = origin_hash_for_device(&device);
        let forward = match forward::build_forward_uinput(&device) {
            Ok(forward) => forward,
            Err(e) => {
                tracing::error!(group_key = %group_key, error = %e, "failed building forward uinput, host evdev support is insufficient");
                set_state(InjectorState::UpgradeEvdev);
                let _ = device.ungrab();
                ungrab_all(&mut grabbed);
                return;
            }
        };

        grabbed.push(GrabbedDevice {
            device,
            forward,
            origin_hash,
        });
    }

    let ranges = GrabbedAxisRanges(&grabbed);
    let target_range = |target: &str, code: u16| {
        registry
            .get(target)
            .and_then(|caps| caps.abs_range(code))
            .unwrap_or((-32768, 32767))
    };
    let (mut graph, report) = HandlerGraph::build(&preset, &symbols, &ranges, target_range);
    for (index, reason) in &report.skipped {
        tracing::warn!(group_key = %group_key, mapping = index, reason, "mapping skipped building handler graph");
    }
    tracing::debug!(group_key = %group_key, built = report.built, handlers = graph.len(), "handler graph compiled");

    set_state(InjectorState::Running);

    reader::run(&mut grabbed, &mut graph, &registry, &symbols, &vars, &stop);

    // Release anything still held before ungrabbing (spec.md §4.I / §5,
    // testable property 3: no injection may leave a key stuck down).
    let ctx = DispatchContext {
        registry: &registry,
        symbols: &symbols,
        vars: &vars,
        now: std::time::Instant::now(),
    };
    graph.release_all(&ctx);

    if let Some(on) = numlock_snapshot {
        if let Some(first) = grabbed.first_mut() {
            numlock::set_numlock(&mut first.device, on);
        }
    }

    ungrab_all(&mut grabbed);
    tracing::info!(group_key = %group_key, "injection stopped");
    set_state(InjectorState::Stopped);
}

fn ungrab_all(grabbed: &mut [GrabbedDevice]) {
    for g in grabbed.iter_mut() {
        if let Err(e) = g.device.ungrab() {
            tracing::debug!(error = %e, "ungrab failed (device may have disappeared)");
        }
    }
}

/// Ranking used to break ties when more than one device in a group can
/// satisfy the same input signature (spec.md's source grounding,
/// `injector.py`'s `_grab_devices`: keyboard beats gamepad beats mouse
/// beats touchpad beats graphics tablet; unclassified devices rank
/// last).
fn ranking_index(class: Option<DeviceClass>) -> usize {
    match class {
        Some(DeviceClass::Keyboard) => 0,
        Some(DeviceClass::Gamepad) => 1,
        Some(DeviceClass::Mouse) => 2,
        Some(DeviceClass::Touchpad) => 3,
        Some(DeviceClass::GraphicsTablet) => 4,
        None => 5,
    }
}

fn device_has_capability(device: &evdev::Device, event_type: u16, code: u16) -> bool {
    match event_type {
        kernel::EV_KEY => device
            .supported_keys()
            .is_some_and(|keys| keys.contains(evdev::KeyCode::new(code))),
        kernel::EV_ABS => device
            .supported_absolute_axes()
            .is_some_and(|axes| axes.contains(evdev::AbsoluteAxisCode(code))),
        kernel::EV_REL => device
            .supported_relative_axes()
            .is_some_and(|axes| axes.contains(evdev::RelativeAxisCode(code))),
        _ => false,
    }
}

/// Out of every opened device in the group, picks only the ones some
/// valid mapping in `preset` actually needs — mirrors `injector.py`'s
/// `_grab_devices`: per sub-input, find the devices offering that
/// capability, and if several do, keep only the highest-ranked one.
fn select_needed_devices(preset: &Preset, opened: Vec<evdev::Device>) -> Vec<evdev::Device> {
    let mut slots: Vec<Option<evdev::Device>> = opened.into_iter().map(Some).collect();
    let mut needed_indices: Vec<usize> = Vec::new();

    for mapping in preset.valid_mappings() {
        for config in mapping.input_combination.configs() {
            let candidates: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
                .filter(|&i| device_has_capability(slots[i].as_ref().unwrap(), config.event_type, config.code))
                .collect();

            let chosen = match candidates.len() {
                0 => {
                    tracing::error!(
                        event_type = config.event_type,
                        code = config.code,
                        "no grabbed device offers this input"
                    );
                    continue;
                }
                1 => candidates[0],
                _ => {
                    let winner = *candidates
                        .iter()
                        .min_by_key(|&&i| ranking_index(crate::device::classify_device(slots[i].as_ref().unwrap())))
                        .expect("candidates is non-empty");
                    tracing::warn!(
                        chosen = winner,
                        candidates = candidates.len(),
                        "only one of several possible devices will be grabbed for this input"
                    );
                    winner
                }
            };

            if !needed_indices.contains(&chosen) {
                needed_indices.push(chosen);
            }
        }
    }

    needed_indices.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Resolves an abs axis' reported `(min, max)` range off the actual
/// grabbed device that signature came from — needed to normalize an
/// abs→* transform correctly (spec.md §4.E).
struct GrabbedAxisRanges<'a>(&'a [GrabbedDevice]);

impl AxisRangeSource for GrabbedAxisRanges<'_> {
    fn abs_range(&self, code: u16, origin_hash: u64) -> Option<(i32, i32)> {
        let device = &self.0.iter().find(|g| g.origin_hash == origin_hash)?.device;
        let absinfo = device.get_absinfo().ok()?;
        absinfo
            .into_iter()
            .find(|(axis, _)| axis.0 == code)
            .map(|(_, info)| (info.minimum(), info.maximum()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_succeeds_on_first_success() {
        let mut calls = 0;
        let result: Result<(), &str> = retry(10, Duration::ZERO, |_| {
            calls += 1;
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_gives_up_after_the_configured_budget() {
        let mut calls = 0;
        let result: Result<(), &str> = retry(10, Duration::ZERO, |_| {
            calls += 1;
            Err("busy")
        });
        assert!(result.is_err());
        assert_eq!(calls, 10);
    }

    #[test]
    fn retry_recovers_after_transient_failures() {
        let mut calls = 0;
        let result: Result<u32, &str> = retry(10, Duration::ZERO, |i| {
            calls += 1;
            if i < 3 {
                Err("busy")
            } else {
                Ok(i as u32)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 4);
    }

    #[test]
    fn state_predicates_partition_the_enum() {
        assert!(InjectorState::Starting.active());
        assert!(InjectorState::Running.active());
        assert!(!InjectorState::Stopped.active());
        assert!(InjectorState::Stopped.terminal());
        assert!(InjectorState::Failed.terminal());
        assert!(InjectorState::NoGrab.terminal());
        assert!(InjectorState::UpgradeEvdev.terminal());
        assert!(!InjectorState::Running.terminal());
    }

    #[test]
    fn empty_group_paths_reach_no_grab_without_touching_hardware() {
        // A group with no paths selects no devices, so the worker must
        // reach NoGrab purely from preset inspection (spec.md §4.I:
        // "Worker grabs zero devices -> NO_GRAB").
        let group = DeviceGroup {
            key: "empty".to_string(),
            name: "empty".to_string(),
            paths: vec![],
            types: vec![],
        };
        let preset = Preset::default();
        let selected = select_needed_devices(&preset, Vec::new());
        assert!(selected.is_empty());
        let _ = group; // only used to document the scenario being modeled
    }
}
