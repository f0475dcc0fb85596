//! The trigger side of a mapping (spec.md §3): `InputConfig` describes
//! one triggering input, `InputCombination` is an ordered non-empty
//! tuple of those with permutation-equivalence semantics.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::kernel;

/// Describes one triggering input: (type, code, origin_hash,
/// analog_threshold). Immutable once constructed.
///
/// Invariant: if `event_type == EV_KEY`, `analog_threshold` is `None`
/// (enforced by the constructors, not just documented).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputConfig {
    pub event_type: u16,
    pub code: u16,
    #[serde(default)]
    pub origin_hash: u64,
    /// `None` for key inputs and for analog-axis-as-axis inputs.
    /// For abs inputs: a percentage in `[-100, 100]`.
    /// For rel inputs: a speed value.
    #[serde(default)]
    pub analog_threshold: Option<i32>,
}

impl InputConfig {
    pub fn key(code: u16, origin_hash: u64) -> Self {
        Self {
            event_type: kernel::EV_KEY,
            code,
            origin_hash,
            analog_threshold: None,
        }
    }

    pub fn abs_axis(code: u16, origin_hash: u64) -> Self {
        Self {
            event_type: kernel::EV_ABS,
            code,
            origin_hash,
            analog_threshold: None,
        }
    }

    pub fn abs_button(code: u16, origin_hash: u64, threshold_pct: i32) -> Self {
        Self {
            event_type: kernel::EV_ABS,
            code,
            origin_hash,
            analog_threshold: Some(threshold_pct.clamp(-100, 100)),
        }
    }

    pub fn rel_axis(code: u16, origin_hash: u64) -> Self {
        Self {
            event_type: kernel::EV_REL,
            code,
            origin_hash,
            analog_threshold: None,
        }
    }

    pub fn rel_button(code: u16, origin_hash: u64, speed: i32) -> Self {
        Self {
            event_type: kernel::EV_REL,
            code,
            origin_hash,
            analog_threshold: Some(speed),
        }
    }

    /// Whether this input resolves to a discrete press/release, either
    /// because it's a key or because an analog axis has been given a
    /// threshold that turns it into a synthetic button.
    pub fn is_button_like(&self) -> bool {
        self.event_type == kernel::EV_KEY || self.analog_threshold.is_some()
    }

    /// Whether this is an analog input used as an analog input (no
    /// threshold — the raw value is the signal).
    pub fn is_analog_axis(&self) -> bool {
        (self.event_type == kernel::EV_ABS || self.event_type == kernel::EV_REL)
            && self.analog_threshold.is_none()
    }

    /// (type, code, origin_hash) identity used for matching and as the
    /// `HandlerGraph` signature key — threshold only disambiguates
    /// direction, it never changes which events reach this config.
    pub fn signature(&self) -> (u16, u16, u64) {
        (self.event_type, self.code, self.origin_hash)
    }

    /// Whether `event` is produced by this input (ignoring threshold,
    /// which handlers apply themselves to pick a direction).
    pub fn matches(&self, event: &crate::event::InputEvent) -> bool {
        self.signature() == (event.event_type, event.code, event.origin_hash)
    }
}

/// Ordered, non-empty tuple of `InputConfig`s.
///
/// Equality ignores the order of every element but the *terminal* one:
/// combining a+b+c triggers the same mapping as b+a+c, but c must be
/// the event that completes the combination (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputCombination(SmallVec<[InputConfig; 4]>);

impl InputCombination {
    /// Panics if `configs` is empty — callers construct the
    /// "unconfigured" sentinel via [`InputCombination::empty`] instead.
    pub fn new(configs: Vec<InputConfig>) -> Self {
        assert!(
            !configs.is_empty(),
            "use InputCombination::empty() for the unconfigured sentinel"
        );
        Self(SmallVec::from_vec(configs))
    }

    /// The UI-only "unconfigured" sentinel. Must never be grabbed or
    /// matched against real events.
    pub fn empty() -> Self {
        Self(SmallVec::new())
    }

    pub fn is_empty_sentinel(&self) -> bool {
        self.0.is_empty()
    }

    pub fn configs(&self) -> &[InputConfig] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The sub-input whose press completes the combination.
    pub fn terminal(&self) -> Option<&InputConfig> {
        self.0.last()
    }

    /// All inputs resolve to a discrete press/release.
    pub fn is_all_button_like(&self) -> bool {
        self.0.iter().all(InputConfig::is_button_like)
    }

    /// Exactly one config is an analog-defining input (an axis used as
    /// an axis, not as a button).
    pub fn single_analog_config(&self) -> Option<&InputConfig> {
        let mut found = None;
        for cfg in &self.0 {
            if cfg.is_analog_axis() {
                if found.is_some() {
                    return None;
                }
                found = Some(cfg);
            }
        }
        found
    }

    /// Canonical key for equality/hashing: all non-terminal elements
    /// sorted, terminal element kept last. Two combinations that are
    /// permutations of each other sharing the same terminal produce the
    /// same key.
    fn canonical_key(&self) -> Vec<(u16, u16, u64, Option<i32>)> {
        if self.0.is_empty() {
            return Vec::new();
        }
        let mut head: Vec<_> = self.0[..self.0.len() - 1]
            .iter()
            .map(|c| (c.event_type, c.code, c.origin_hash, c.analog_threshold))
            .collect();
        head.sort_unstable();
        let terminal = self.0[self.0.len() - 1];
        head.push((
            terminal.event_type,
            terminal.code,
            terminal.origin_hash,
            terminal.analog_threshold,
        ));
        head
    }
}

impl PartialEq for InputCombination {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

impl Eq for InputCombination {}

impl std::hash::Hash for InputCombination {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical_key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_equivalence_keeps_terminal_significant() {
        let a = InputCombination::new(vec![
            InputConfig::key(kernel::key::KEY_LEFTSHIFT, 1),
            InputConfig::key(kernel::key::KEY_A, 1),
            InputConfig::key(kernel::key::KEY_C, 1),
        ]);
        let b = InputCombination::new(vec![
            InputConfig::key(kernel::key::KEY_A, 1),
            InputConfig::key(kernel::key::KEY_LEFTSHIFT, 1),
            InputConfig::key(kernel::key::KEY_C, 1),
        ]);
        assert_eq!(a, b);

        let different_terminal = InputCombination::new(vec![
            InputConfig::key(kernel::key::KEY_C, 1),
            InputConfig::key(kernel::key::KEY_A, 1),
            InputConfig::key(kernel::key::KEY_LEFTSHIFT, 1),
        ]);
        assert_ne!(a, different_terminal);
    }

    #[test]
    fn empty_sentinel_is_distinct() {
        let empty = InputCombination::empty();
        assert!(empty.is_empty_sentinel());
        assert!(empty.terminal().is_none());
    }

    #[test]
    fn button_like_requires_all_button_inputs() {
        let combo = InputCombination::new(vec![
            InputConfig::key(kernel::key::KEY_A, 1),
            InputConfig::abs_axis(kernel::abs::ABS_X, 1),
        ]);
        assert!(!combo.is_all_button_like());
    }
}
