//! Numlock save/restore around a grab (spec.md §4.I): grabbing a
//! keyboard has been observed to toggle numlock on some drivers, so the
//! injector snapshots the LED state immediately before grabbing and
//! restores it once the injection stops.
//!
//! Best-effort only — spec.md §7 treats this as a courtesy, not a
//! load-bearing write: failures are logged, never propagated.

use evdev::{Device, InputEvent as RawEvent, LedCode};

use crate::kernel;

/// Reads the current NumLock LED state from `device`. `None` if the
/// device doesn't expose LED state at all (true of most pointer and
/// tablet nodes, and of any device the kernel driver doesn't wire LED
/// feedback up for).
pub fn is_numlock_on(device: &Device) -> Option<bool> {
    let led = LedCode::new(kernel::LED_NUML);
    if !device.supported_leds().is_some_and(|leds| leds.contains(led)) {
        return None;
    }
    device.get_led_state().ok().map(|state| state.contains(led))
}

/// Writes the NumLock LED back to `on`. Not undertaken at all if the
/// device never reported LED capability (querying and restoring are
/// symmetric: a device [`is_numlock_on`] returned `None` for is skipped
/// by the caller).
pub fn set_numlock(device: &mut Device, on: bool) {
    let event = RawEvent::new(kernel::EV_LED, kernel::LED_NUML, on as i32);
    if let Err(e) = device.send_events(&[event]) {
        tracing::warn!(error = %e, "failed to restore numlock state");
    }
}
