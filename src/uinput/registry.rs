//! Lazily-instantiated synthetic output devices, in two modes: `Real`
//! (emits to the kernel uinput layer) and `Introspect` (returns
//! capability maps but discards writes — used by tests in place of the
//! GUI editor process, which is unprivileged).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, trace};

use crate::event::InputEvent;
use crate::kernel;

use super::{GAMEPAD, KEYBOARD, KEYBOARD_MOUSE, MOUSE};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("uinput target '{0}' is not available")]
    UinputNotAvailable(String),
    #[error("target '{target}' has no capability for (type={event_type}, code={code})")]
    EventNotHandled {
        target: String,
        event_type: u16,
        code: u16,
    },
    #[error("uinput write failed on '{target}': {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

/// What a named target supports: the set of (type, code) pairs it was
/// built with. Shared between the real and introspection backends so
/// capability checks behave identically in both.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    keys: HashSet<u16>,
    abs: HashMap<u16, (i32, i32)>,
    rel: HashSet<u16>,
}

impl Capabilities {
    pub fn supports(&self, event_type: u16, code: u16) -> bool {
        match event_type {
            kernel::EV_KEY => self.keys.contains(&code),
            kernel::EV_ABS => self.abs.contains_key(&code),
            kernel::EV_REL => self.rel.contains(&code),
            kernel::EV_SYN => true,
            _ => false,
        }
    }

    pub fn abs_range(&self, code: u16) -> Option<(i32, i32)> {
        self.abs.get(&code).copied()
    }

    fn keyboard() -> Self {
        // the full EV_KEY range the kernel defines; KEY_MAX per
        // input-event-codes.h
        let keys = (0u16..0x2ff).collect();
        Self {
            keys,
            abs: HashMap::new(),
            rel: HashSet::new(),
        }
    }

    fn mouse() -> Self {
        let mut keys = HashSet::new();
        for code in [
            kernel::key::BTN_LEFT,
            kernel::key::BTN_RIGHT,
            0x112, // BTN_MIDDLE
            0x113, // BTN_SIDE
            0x114, // BTN_EXTRA
        ] {
            keys.insert(code);
        }
        let rel = [
            kernel::rel::REL_X,
            kernel::rel::REL_Y,
            kernel::rel::REL_WHEEL,
            kernel::rel::REL_HWHEEL,
        ]
        .into_iter()
        .collect();
        Self {
            keys,
            abs: HashMap::new(),
            rel,
        }
    }

    fn gamepad() -> Self {
        let mut keys = HashSet::new();
        for offset in 0..16u16 {
            keys.insert(kernel::key::BTN_GAMEPAD + offset);
        }
        let mut abs = HashMap::new();
        for code in [
            kernel::abs::ABS_X,
            kernel::abs::ABS_Y,
            kernel::abs::ABS_RX,
            kernel::abs::ABS_RY,
        ] {
            abs.insert(code, (-32768, 32767));
        }
        for code in [kernel::abs::ABS_Z, kernel::abs::ABS_RZ] {
            abs.insert(code, (0, 255));
        }
        for code in [kernel::abs::ABS_HAT0X, kernel::abs::ABS_HAT0Y] {
            abs.insert(code, (-1, 1));
        }
        Self {
            keys,
            abs,
            rel: HashSet::new(),
        }
    }

    fn merged(a: Self, b: Self) -> Self {
        let mut keys = a.keys;
        keys.extend(b.keys);
        let mut abs = a.abs;
        abs.extend(b.abs);
        let mut rel = a.rel;
        rel.extend(b.rel);
        Self { keys, abs, rel }
    }

    fn for_target(name: &str) -> Option<Self> {
        match name {
            KEYBOARD => Some(Self::keyboard()),
            MOUSE => Some(Self::mouse()),
            GAMEPAD => Some(Self::gamepad()),
            KEYBOARD_MOUSE => Some(Self::merged(Self::keyboard(), Self::mouse())),
            _ => None,
        }
    }
}

enum Backend {
    Real(Mutex<evdev::uinput::VirtualDevice>),
    Introspect,
    Record(Mutex<Vec<InputEvent>>),
}

struct Target {
    caps: Capabilities,
    backend: Backend,
}

/// Whether the registry talks to the real kernel uinput layer or just
/// tracks capability maps for an unprivileged caller (spec.md §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Real,
    Introspect,
    /// Like `Introspect` (no kernel device, capability checks still
    /// apply) but every accepted write is kept for later inspection.
    /// Exists for tests that need to assert on what a handler graph
    /// would have emitted, not just whether it errored.
    Record,
}

/// The global output registry. Devices are created lazily on first
/// `write`/`get`; re-requesting an existing name is a no-op.
pub struct GlobalUinputs {
    mode: Mode,
    targets: scc::HashMap<String, Target>,
}

impl GlobalUinputs {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            targets: scc::HashMap::new(),
        }
    }

    fn ensure_target(&self, name: &str) -> Result<(), RegistryError> {
        if self.targets.read_sync(name, |_, _| ()).is_some() {
            return Ok(());
        }
        let caps =
            Capabilities::for_target(name).ok_or_else(|| RegistryError::UinputNotAvailable(name.to_string()))?;

        let backend = match self.mode {
            Mode::Introspect => Backend::Introspect,
            Mode::Record => Backend::Record(Mutex::new(Vec::new())),
            Mode::Real => Backend::Real(Mutex::new(build_virtual_device(name, &caps)?)),
        };

        let _ = self.targets.insert_sync(name.to_string(), Target { caps, backend });
        debug!(target = name, mode = ?self.mode, "instantiated synthetic output device");
        Ok(())
    }

    /// Returns the capability map for `name`, instantiating it if this
    /// is the first request. `None` if `name` is not a known target.
    pub fn get(&self, name: &str) -> Option<Capabilities> {
        if self.ensure_target(name).is_err() {
            return None;
        }
        self.targets.read_sync(name, |_, target| target.caps.clone())
    }

    /// Writes one event to the named target, followed implicitly by a
    /// sync event (spec.md §4.B).
    pub fn write(&self, event: &InputEvent, target_name: &str) -> Result<(), RegistryError> {
        self.ensure_target(target_name)?;

        self.targets
            .read_sync(target_name, |_, target| -> Result<(), RegistryError> {
                if !target.caps.supports(event.event_type, event.code) {
                    return Err(RegistryError::EventNotHandled {
                        target: target_name.to_string(),
                        event_type: event.event_type,
                        code: event.code,
                    });
                }
                trace!(target = target_name, event_type = event.event_type, code = event.code, value = event.value, "uinput write");
                match &target.backend {
                    Backend::Introspect => Ok(()),
                    Backend::Record(log) => {
                        log.lock().expect("uinput recording mutex poisoned").push(event.clone());
                        Ok(())
                    }
                    Backend::Real(device) => {
                        let mut device = device.lock().expect("uinput device mutex poisoned");
                        let raw = evdev::InputEvent::new(event.event_type, event.code, event.value);
                        let syn = evdev::InputEvent::new(kernel::EV_SYN, kernel::SYN_REPORT, 0);
                        device
                            .emit(&[raw, syn])
                            .map_err(|source| RegistryError::Io {
                                target: target_name.to_string(),
                                source,
                            })
                    }
                }
            })
            .unwrap_or_else(|| {
                Err(RegistryError::UinputNotAvailable(target_name.to_string()))
            })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Every event accepted by `target` so far, in write order. Empty
    /// for targets not in [`Mode::Record`] or not yet instantiated.
    pub fn recorded(&self, target: &str) -> Vec<InputEvent> {
        self.targets
            .read_sync(target, |_, t| match &t.backend {
                Backend::Record(log) => log.lock().expect("uinput recording mutex poisoned").clone(),
                _ => Vec::new(),
            })
            .unwrap_or_default()
    }
}

fn build_virtual_device(
    name: &str,
    caps: &Capabilities,
) -> Result<evdev::uinput::VirtualDevice, RegistryError> {
    let mut keys = evdev::AttributeSet::<evdev::KeyCode>::new();
    for &code in &caps.keys {
        keys.insert(evdev::KeyCode::new(code));
    }

    let mut builder = evdev::uinput::VirtualDeviceBuilder::new()
        .map_err(|source| RegistryError::Io {
            target: name.to_string(),
            source,
        })?
        .name(&format!("input-remapper {name}"));

    builder = builder.with_keys(&keys).map_err(|source| RegistryError::Io {
        target: name.to_string(),
        source,
    })?;

    if !caps.rel.is_empty() {
        let mut rel = evdev::AttributeSet::<evdev::RelativeAxisCode>::new();
        for &code in &caps.rel {
            rel.insert(evdev::RelativeAxisCode(code));
        }
        builder = builder
            .with_relative_axes(&rel)
            .map_err(|source| RegistryError::Io {
                target: name.to_string(),
                source,
            })?;
    }

    for (&code, &(min, max)) in &caps.abs {
        let info = evdev::AbsInfo::new(0, min, max, 0, 0, 1);
        let setup = evdev::UinputAbsSetup::new(evdev::AbsoluteAxisCode(code), info);
        builder = builder
            .with_absolute_axis(&setup)
            .map_err(|source| RegistryError::Io {
                target: name.to_string(),
                source,
            })?;
    }

    builder.build().map_err(|source| RegistryError::Io {
        target: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_target_is_not_available() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let event = InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1);
        assert!(matches!(
            registry.write(&event, "nonexistent"),
            Err(RegistryError::UinputNotAvailable(_))
        ));
    }

    #[test]
    fn keyboard_does_not_support_rel_axes() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let event = InputEvent::new(kernel::EV_REL, kernel::rel::REL_X, 5, 1);
        assert!(matches!(
            registry.write(&event, KEYBOARD),
            Err(RegistryError::EventNotHandled { .. })
        ));
    }

    #[test]
    fn mouse_accepts_rel_and_click() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let click = InputEvent::new(kernel::EV_KEY, kernel::key::BTN_LEFT, 1, 1);
        assert!(registry.write(&click, MOUSE).is_ok());
        let motion = InputEvent::new(kernel::EV_REL, kernel::rel::REL_X, 5, 1);
        assert!(registry.write(&motion, MOUSE).is_ok());
    }

    #[test]
    fn combined_target_supports_both_keyboard_and_mouse_capabilities() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let key = InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1);
        let motion = InputEvent::new(kernel::EV_REL, kernel::rel::REL_X, 5, 1);
        assert!(registry.write(&key, KEYBOARD_MOUSE).is_ok());
        assert!(registry.write(&motion, KEYBOARD_MOUSE).is_ok());
    }

    #[test]
    fn re_requesting_existing_target_is_a_no_op() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        assert!(registry.get(KEYBOARD).is_some());
        assert!(registry.get(KEYBOARD).is_some());
    }
}
