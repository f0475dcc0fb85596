//! Device grouping: aggregate kernel input nodes that belong to the
//! same physical hardware (spec.md §3 `DeviceGroup`, §4.A grouping rule).

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::classify::DeviceClass;

/// One scanned `/dev/input/event*` node, pre-classification.
#[derive(Debug, Clone)]
pub struct DeviceNode {
    pub path: String,
    pub name: String,
    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
    pub phys: String,
    pub class: Option<DeviceClass>,
    pub is_self_synthesized: bool,
}

impl DeviceNode {
    /// First segment of `phys` (before the first `/`), used as part of
    /// the grouping key so distinct devices sharing a USB hub's
    /// vendor/product pairing (rare, but observed with composite HID
    /// devices) don't merge.
    fn phys_prefix(&self) -> &str {
        self.phys.split('/').next().unwrap_or("")
    }

    fn group_key_tuple(&self) -> (u16, u16, u16, String) {
        (
            self.bus,
            self.vendor,
            self.product,
            self.phys_prefix().to_string(),
        )
    }
}

/// All kernel input nodes from one physical device, aggregated
/// (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceGroup {
    /// Stable, user-visible identifier. Derived from `name` with a
    /// numeric suffix on collisions; must not change across reboots.
    pub key: String,
    pub name: String,
    pub paths: Vec<String>,
    pub types: Vec<DeviceClass>,
}

const UINPUT_NAME_PREFIX: &str = "input-remapper";

/// Derives an `InputConfig.origin_hash` from a device's stable identity
/// (bus/vendor/product/phys-prefix), mirroring `state/parsing.rs`'s
/// device-identity hash and [`group_key_tuple`]'s own grouping key —
/// the same tuple that decides *group* membership also disambiguates
/// *origin* within a group, so combinations stay meaningful across a
/// re-grab (spec.md §3).
pub fn compute_origin_hash(bus: u16, vendor: u16, product: u16, phys_prefix: &str) -> u64 {
    let mut hash = crate::util::fnv64::OFFSET_BASIS;
    hash = crate::util::fnv1a_hash_u64(hash, bus as u64);
    hash = crate::util::fnv1a_hash_u64(hash, vendor as u64);
    hash = crate::util::fnv1a_hash_u64(hash, product as u64);
    hash = crate::util::fnv1a_hash_bytes(hash, phys_prefix.as_bytes());
    hash
}

/// Convenience wrapper reading identity fields straight off an open
/// `evdev::Device`, used by the injector at grab time.
pub fn origin_hash_for_device(device: &evdev::Device) -> u64 {
    let id = device.input_id();
    let phys = device.physical_path().unwrap_or("");
    let prefix = phys.split('/').next().unwrap_or("");
    compute_origin_hash(id.bus_type().0, id.vendor(), id.product(), prefix)
}

/// Whether a device's name marks it as one of our own synthetic
/// outputs (spec.md §4.A: self-synthesized devices are excluded from
/// any group).
pub fn is_self_synthesized(name: &str) -> bool {
    name.starts_with(UINPUT_NAME_PREFIX)
}

/// Groups device nodes by (bus, vendor, product, phys-prefix),
/// choosing the shortest contained name per group and resolving name
/// collisions with a numeric suffix. Self-synthesized devices are
/// dropped unless `include_self_synthesized` is set.
pub fn group_devices(nodes: &[DeviceNode], include_self_synthesized: bool) -> Vec<DeviceGroup> {
    let mut by_key: HashMap<(u16, u16, u16, String), Vec<&DeviceNode>> = HashMap::new();
    let mut order: Vec<(u16, u16, u16, String)> = Vec::new();

    for node in nodes {
        if node.is_self_synthesized && !include_self_synthesized {
            continue;
        }
        let key = node.group_key_tuple();
        if !by_key.contains_key(&key) {
            order.push(key.clone());
        }
        by_key.entry(key).or_default().push(node);
    }

    let mut used_names: HashMap<String, usize> = HashMap::new();
    let mut groups = Vec::with_capacity(order.len());

    for key in order {
        let members = &by_key[&key];
        let base_name = members
            .iter()
            .map(|n| n.name.as_str())
            .min_by_key(|n| n.len())
            .unwrap_or("")
            .to_string();

        let count = used_names.entry(base_name.clone()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            base_name.clone()
        } else {
            format!("{base_name} {count}")
        };

        let paths = members.iter().map(|n| n.path.clone()).collect();
        let types: BTreeSet<DeviceClass> =
            members.iter().filter_map(|n| n.class).collect();

        groups.push(DeviceGroup {
            key: name.clone(),
            name,
            paths,
            types: types.into_iter().collect(),
        });
    }

    groups
}

impl PartialOrd for DeviceClass {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DeviceClass {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}
