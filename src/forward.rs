//! Per-device forward uinput (spec.md §4.I): a virtual device that
//! mirrors one grabbed physical device's capabilities, so events the
//! handler graph doesn't claim (`DispatchOutcome::NotHandled`) can be
//! passed through to the display server unchanged.
//!
//! Grounded on the source project's `_copy_capabilities`/`get_udev_name`
//! (`injector.py`): the kernel rejects `EV_SYN`/`EV_FF` capabilities on
//! a device built this way, and some devices spuriously report
//! `ABS_VOLUME`, which blocks mouse motion and keyboard symbols
//! downstream if carried over.

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, Device, KeyCode, RelativeAxisCode, UinputAbsSetup};
use thiserror::Error;

/// `ABS_VOLUME` per `input-event-codes.h`. Not part of `evdev`'s
/// `AbsoluteAxisCode` constants because it's rarely used as a real
/// control axis, but some hardware reports it anyway.
const ABS_VOLUME: u16 = 0x20;

const DEV_NAME: &str = "input-remapper";
const NAME_MAX_LEN: usize = 80;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to build forward uinput for '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(name: &str, source: std::io::Error) -> ForwardError {
    ForwardError::Io {
        name: name.to_string(),
        source,
    }
}

/// `"input-remapper {source name, truncated} {suffix}"`, capped at 80
/// bytes (observed as the practical limit for uinput device names).
/// Also marks the device as self-synthesized so a later device scan
/// excludes it from grouping (spec.md §4.A).
pub fn forwarded_name(source_name: &str) -> String {
    let suffix = "forwarded";
    let remaining = NAME_MAX_LEN.saturating_sub(DEV_NAME.len() + suffix.len() + 2);
    let middle: String = source_name.chars().take(remaining).collect();
    format!("{DEV_NAME} {middle} {suffix}")
}

/// Builds a uinput device mirroring `source`'s key/relative/absolute/
/// property capabilities, minus the capabilities the kernel won't
/// accept on a synthetic device and the occasional spurious
/// `ABS_VOLUME`.
pub fn build_forward_uinput(source: &Device) -> Result<VirtualDevice, ForwardError> {
    let name = forwarded_name(source.name().unwrap_or("unnamed"));

    let mut builder = VirtualDeviceBuilder::new()
        .map_err(|e| io_err(&name, e))?
        .name(&name);

    if let Some(keys) = source.supported_keys() {
        let mut set = AttributeSet::<KeyCode>::new();
        for key in keys.iter() {
            set.insert(key);
        }
        builder = builder.with_keys(&set).map_err(|e| io_err(&name, e))?;
    }

    if let Some(rel) = source.supported_relative_axes() {
        let mut set = AttributeSet::<RelativeAxisCode>::new();
        for axis in rel.iter() {
            set.insert(axis);
        }
        builder = builder
            .with_relative_axes(&set)
            .map_err(|e| io_err(&name, e))?;
    }

    if let Ok(absinfo) = source.get_absinfo() {
        for (axis, info) in absinfo {
            if axis.0 == ABS_VOLUME {
                tracing::debug!(device = %name, "stripping spurious ABS_VOLUME capability");
                continue;
            }
            let setup = UinputAbsSetup::new(axis, info);
            builder = builder
                .with_absolute_axis(&setup)
                .map_err(|e| io_err(&name, e))?;
        }
    }

    // EV_SYN and EV_FF are never forwarded: python-evdev's own
    // `from_device` strips them for the same reason (they aren't
    // capabilities a uinput consumer declares), and the builder above
    // never mirrors switches/LEDs/force-feedback/input-props in the
    // first place — `evdev`'s `VirtualDeviceBuilder` has no setter for
    // those, unlike python-evdev's `UInput` constructor.

    builder.build().map_err(|e| io_err(&name, e))
}
