//! Device enumerator & classifier (spec.md §4.A).

pub mod classify;
pub mod group;

use tracing::{debug, warn};

pub use classify::DeviceClass;
pub use group::DeviceGroup;

use classify::DeviceCapabilities;
use group::DeviceNode;

struct EvdevCaps<'a>(&'a evdev::Device);

impl DeviceCapabilities for EvdevCaps<'_> {
    fn has_key(&self, code: u16) -> bool {
        self.0
            .supported_keys()
            .is_some_and(|keys| keys.contains(evdev::KeyCode::new(code)))
    }

    fn key_count(&self) -> usize {
        self.0
            .supported_keys()
            .map(|keys| keys.iter().count())
            .unwrap_or(0)
    }

    fn has_abs(&self, code: u16) -> bool {
        self.0
            .supported_absolute_axes()
            .is_some_and(|axes| axes.contains(evdev::AbsoluteAxisCode(code)))
    }

    fn has_rel(&self, code: u16) -> bool {
        self.0
            .supported_relative_axes()
            .is_some_and(|axes| axes.contains(evdev::RelativeAxisCode(code)))
    }
}

/// Scans every input node the kernel exposes, classifies each, and
/// groups them by physical device. Idempotent and safe to call at any
/// time; currently running injections are unaffected — only future
/// `start_injecting` calls see the refreshed catalog (spec.md §4.A).
pub fn enumerate_groups(
    deny_list: &[String],
    include_self_synthesized: bool,
) -> Vec<DeviceGroup> {
    let nodes = scan_nodes(deny_list);
    group::group_devices(&nodes, include_self_synthesized)
}

/// Classifies a live `evdev::Device`, for callers outside this module
/// that only have a device handle (the injector's grab-ranking step,
/// not a previously scanned [`group::DeviceNode`]).
pub fn classify_device(device: &evdev::Device) -> Option<DeviceClass> {
    classify::classify(&EvdevCaps(device))
}

fn scan_nodes(deny_list: &[String]) -> Vec<DeviceNode> {
    let mut nodes = Vec::new();
    for (path, device) in evdev::enumerate() {
        let name = device.name().unwrap_or("").to_string();
        if classify::is_denied_name(&name, deny_list) {
            debug!(name = %name, "skipping denied device");
            continue;
        }
        let caps = EvdevCaps(&device);
        let class = classify::classify(&caps);
        let id = device.input_id();
        let phys = device.physical_path().unwrap_or("").to_string();
        nodes.push(DeviceNode {
            path: path.to_string_lossy().to_string(),
            name: name.clone(),
            bus: id.bus_type().0,
            vendor: id.vendor(),
            product: id.product(),
            phys,
            class,
            is_self_synthesized: group::is_self_synthesized(&name),
        });
    }
    if nodes.is_empty() {
        warn!("no input devices found during enumeration");
    }
    nodes
}
