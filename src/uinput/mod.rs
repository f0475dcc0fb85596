//! Global output registry (spec.md §4.B): the small fixed catalog of
//! named synthetic output devices mapped writes are routed through.

pub mod registry;

pub use registry::{GlobalUinputs, Mode, RegistryError};

/// Fixed catalog names (spec.md §4.B, §6 naming convention).
pub const KEYBOARD: &str = "keyboard";
pub const MOUSE: &str = "mouse";
pub const GAMEPAD: &str = "gamepad";
pub const KEYBOARD_MOUSE: &str = "keyboard+mouse";

pub const ALL_TARGETS: [&str; 4] = [KEYBOARD, MOUSE, GAMEPAD, KEYBOARD_MOUSE];
