//! Preset/mapping data model (spec.md §3, §4.D).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::input_config::InputCombination;

/// One trigger-to-output rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub input_combination: InputCombination,
    pub target_uinput: String,
    pub output: Output,
}

/// The tagged output variant of a [`Mapping`] (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Output {
    KeyMacro {
        symbol: String,
        #[serde(default)]
        release_combination_keys: bool,
        #[serde(default = "default_release_timeout")]
        release_timeout: f64,
    },
    Analog {
        output_type: u16,
        output_code: u16,
        gain: f64,
        expo: f64,
        deadzone: f64,
        #[serde(default)]
        rel_to_abs_input_cutoff: f64,
        #[serde(default)]
        force_release_timeout: bool,
    },
}

fn default_release_timeout() -> f64 {
    0.05
}

/// Why a [`Mapping`] failed structural validation (spec.md §4.D). Each
/// error is reported with a field path so a user can find the offending
/// entry in the preset file.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MappingError {
    #[error("{path}: gain must be finite, got {value}")]
    NonFiniteGain { path: String, value: f64 },
    #[error("{path}: expo must be in [-1, 1], got {value}")]
    ExpoOutOfRange { path: String, value: f64 },
    #[error("{path}: deadzone must be in [0, 0.9), got {value}")]
    DeadzoneOutOfRange { path: String, value: f64 },
    #[error("{path}: release_timeout must be > 0, got {value}")]
    NonPositiveReleaseTimeout { path: String, value: f64 },
    #[error("{path}: Analog mapping's combination must contain exactly one analog input")]
    AnalogArityMismatch { path: String },
    #[error("{path}: KeyMacro mapping's combination must be fully button-like")]
    KeyMacroRequiresButtons { path: String },
    #[error("{path}: empty combination cannot be injected")]
    EmptyCombination { path: String },
    #[error("{path}: unknown symbol '{symbol}'")]
    UnknownSymbol { path: String, symbol: String },
}

impl Mapping {
    /// Structural validation per spec.md §4.D. Does not resolve symbols
    /// against a symbol table — that is the handler graph builder's job
    /// (it needs the caller-supplied table, which may not be available
    /// yet when a preset is merely loaded/displayed).
    pub fn validate(&self, path: &str) -> Result<(), MappingError> {
        if self.input_combination.is_empty_sentinel() {
            return Err(MappingError::EmptyCombination {
                path: path.to_string(),
            });
        }
        match &self.output {
            Output::KeyMacro { release_timeout, .. } => {
                if !self.input_combination.is_all_button_like() {
                    return Err(MappingError::KeyMacroRequiresButtons {
                        path: path.to_string(),
                    });
                }
                if *release_timeout <= 0.0 {
                    return Err(MappingError::NonPositiveReleaseTimeout {
                        path: path.to_string(),
                        value: *release_timeout,
                    });
                }
            }
            Output::Analog {
                gain,
                expo,
                deadzone,
                ..
            } => {
                if self.input_combination.single_analog_config().is_none() {
                    return Err(MappingError::AnalogArityMismatch {
                        path: path.to_string(),
                    });
                }
                if !gain.is_finite() {
                    return Err(MappingError::NonFiniteGain {
                        path: path.to_string(),
                        value: *gain,
                    });
                }
                if !(-1.0..=1.0).contains(expo) {
                    return Err(MappingError::ExpoOutOfRange {
                        path: path.to_string(),
                        value: *expo,
                    });
                }
                if !(0.0..0.9).contains(deadzone) {
                    return Err(MappingError::DeadzoneOutOfRange {
                        path: path.to_string(),
                        value: *deadzone,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A set of mappings for one device group, indexed by combination.
///
/// Invariant: no two mappings share an `input_combination` under the
/// permutation-equivalence of [`InputCombination`]. Invalid mappings are
/// retained (for display) but skipped when the `HandlerGraph` is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub name: String,
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Preset {
    /// Validates every mapping, returning the indices (into `mappings`)
    /// that failed, paired with their error. Mappings are never removed
    /// here — callers decide whether to skip them at build time.
    pub fn validate(&self) -> Vec<(usize, MappingError)> {
        let mut errors = Vec::new();
        let mut seen: Vec<&InputCombination> = Vec::new();
        for (i, mapping) in self.mappings.iter().enumerate() {
            let path = format!("mappings[{i}]");
            if let Err(e) = mapping.validate(&path) {
                errors.push((i, e));
                continue;
            }
            if seen.iter().any(|c| **c == mapping.input_combination) {
                errors.push((
                    i,
                    MappingError::EmptyCombination {
                        path: format!("{path}: duplicate combination"),
                    },
                ));
            } else {
                seen.push(&mapping.input_combination);
            }
        }
        errors
    }

    /// The mappings that pass validation, in preset order.
    pub fn valid_mappings(&self) -> impl Iterator<Item = &Mapping> {
        let invalid: Vec<usize> = self.validate().into_iter().map(|(i, _)| i).collect();
        self.mappings
            .iter()
            .enumerate()
            .filter(move |(i, _)| !invalid.contains(i))
            .map(|(_, m)| m)
    }
}
