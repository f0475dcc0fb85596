//! Device classification rules (spec.md §4.A).
//!
//! Order matters: stylus devices also expose the axes that would
//! otherwise match a gamepad, so graphics tablets must be checked
//! first. Implemented against a small trait rather than `evdev::Device`
//! directly so the rules can be unit tested without a real input node.

use crate::kernel;

/// What a classifier needs to know about a device's capability bitmaps.
pub trait DeviceCapabilities {
    fn has_key(&self, code: u16) -> bool;
    fn key_count(&self) -> usize;
    fn has_abs(&self, code: u16) -> bool;
    fn has_rel(&self, code: u16) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DeviceClass {
    Keyboard,
    Mouse,
    Gamepad,
    Touchpad,
    GraphicsTablet,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyboard => "keyboard",
            Self::Mouse => "mouse",
            Self::Gamepad => "gamepad",
            Self::Touchpad => "touchpad",
            Self::GraphicsTablet => "graphics-tablet",
        }
    }
}

const ALPHA_KEY_CODES: [u16; 3] = [kernel::key::KEY_A, kernel::key::KEY_B, kernel::key::KEY_C];

fn is_stylus(caps: &dyn DeviceCapabilities) -> bool {
    caps.has_key(kernel::key::BTN_STYLUS) || caps.has_key(kernel::key::BTN_TOOL_PEN)
}

fn is_touchpad(caps: &dyn DeviceCapabilities) -> bool {
    caps.has_abs(kernel::abs::ABS_MT_POSITION_X)
}

fn is_gamepad(caps: &dyn DeviceCapabilities) -> bool {
    let has_gamepad_button =
        caps.has_key(kernel::key::BTN_GAMEPAD) || caps.has_key(kernel::key::BTN_THUMBL);
    let has_primary_axes = caps.has_abs(kernel::abs::ABS_X) && caps.has_abs(kernel::abs::ABS_Y);
    has_gamepad_button && has_primary_axes
}

fn is_mouse(caps: &dyn DeviceCapabilities) -> bool {
    caps.has_rel(kernel::rel::REL_X)
        && caps.has_rel(kernel::rel::REL_Y)
        && caps.has_rel(kernel::rel::REL_WHEEL)
        && caps.has_key(kernel::key::BTN_LEFT)
}

fn is_camera(caps: &dyn DeviceCapabilities) -> bool {
    caps.key_count() == 1 && caps.has_key(kernel::key::KEY_CAMERA)
}

fn is_keyboard(caps: &dyn DeviceCapabilities) -> bool {
    ALPHA_KEY_CODES.iter().any(|&code| caps.has_key(code))
}

/// Classifies a device by its capability bitmaps, in priority order.
/// Returns `None` for cameras (excluded entirely) and devices matching
/// no rule ("unknown").
pub fn classify(caps: &dyn DeviceCapabilities) -> Option<DeviceClass> {
    if is_stylus(caps) {
        return Some(DeviceClass::GraphicsTablet);
    }
    if is_touchpad(caps) {
        return Some(DeviceClass::Touchpad);
    }
    if is_gamepad(caps) {
        return Some(DeviceClass::Gamepad);
    }
    if is_mouse(caps) {
        return Some(DeviceClass::Mouse);
    }
    if is_camera(caps) {
        return None;
    }
    if is_keyboard(caps) {
        return Some(DeviceClass::Keyboard);
    }
    None
}

/// Short deny-list of device names excluded from enumeration outright
/// (spec.md §4.A), independent of capability-based classification.
pub fn is_denied_name(name: &str, deny_list: &[String]) -> bool {
    deny_list
        .iter()
        .any(|denied| name.to_lowercase().contains(&denied.to_lowercase()))
}

pub fn default_deny_list() -> Vec<String> {
    vec!["Yubikey".to_string(), "Eee PC WMI hotkeys".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeCaps {
        keys: Vec<u16>,
        abs: Vec<u16>,
        rel: Vec<u16>,
    }

    impl DeviceCapabilities for FakeCaps {
        fn has_key(&self, code: u16) -> bool {
            self.keys.contains(&code)
        }
        fn key_count(&self) -> usize {
            self.keys.len()
        }
        fn has_abs(&self, code: u16) -> bool {
            self.abs.contains(&code)
        }
        fn has_rel(&self, code: u16) -> bool {
            self.rel.contains(&code)
        }
    }

    #[test]
    fn stylus_wins_over_gamepad_looking_axes() {
        let caps = FakeCaps {
            keys: vec![kernel::key::BTN_STYLUS, kernel::key::BTN_GAMEPAD],
            abs: vec![kernel::abs::ABS_X, kernel::abs::ABS_Y],
            rel: vec![],
        };
        assert_eq!(classify(&caps), Some(DeviceClass::GraphicsTablet));
    }

    #[test]
    fn touchpad_needs_multitouch_position() {
        let caps = FakeCaps {
            keys: vec![],
            abs: vec![kernel::abs::ABS_MT_POSITION_X, kernel::abs::ABS_MT_POSITION_Y],
            rel: vec![],
        };
        assert_eq!(classify(&caps), Some(DeviceClass::Touchpad));
    }

    #[test]
    fn gamepad_needs_button_and_both_axes() {
        let caps = FakeCaps {
            keys: vec![kernel::key::BTN_GAMEPAD],
            abs: vec![kernel::abs::ABS_X, kernel::abs::ABS_Y],
            rel: vec![],
        };
        assert_eq!(classify(&caps), Some(DeviceClass::Gamepad));

        let missing_axis = FakeCaps {
            keys: vec![kernel::key::BTN_GAMEPAD],
            abs: vec![kernel::abs::ABS_X],
            rel: vec![],
        };
        assert_eq!(classify(&missing_axis), None);
    }

    #[test]
    fn mouse_needs_wheel_and_click() {
        let caps = FakeCaps {
            keys: vec![kernel::key::BTN_LEFT],
            abs: vec![],
            rel: vec![kernel::rel::REL_X, kernel::rel::REL_Y, kernel::rel::REL_WHEEL],
        };
        assert_eq!(classify(&caps), Some(DeviceClass::Mouse));
    }

    #[test]
    fn camera_is_excluded() {
        let caps = FakeCaps {
            keys: vec![kernel::key::KEY_CAMERA],
            abs: vec![],
            rel: vec![],
        };
        assert_eq!(classify(&caps), None);
    }

    #[test]
    fn keyboard_needs_alpha_key() {
        let caps = FakeCaps {
            keys: vec![kernel::key::KEY_A],
            abs: vec![],
            rel: vec![],
        };
        assert_eq!(classify(&caps), Some(DeviceClass::Keyboard));
    }

    #[test]
    fn deny_list_matches_case_insensitively() {
        let deny = default_deny_list();
        assert!(is_denied_name("Yubikey 5 NFC", &deny));
        assert!(!is_denied_name("Logitech Keyboard", &deny));
    }
}
