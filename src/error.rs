//! Error taxonomy for the injection engine (spec.md §7).
//!
//! Each variant here is one of the categories spec.md's error-handling
//! design names. Handlers and the reader loop isolate errors to the
//! event that caused them; only startup errors propagate out to the
//! supervisor, via [`crate::injector::InjectorState`] rather than this
//! enum directly.

use thiserror::Error;

/// The closed error taxonomy from spec.md §7. Carries enough context
/// (group key, mapping description, source path) for a user to
/// diagnose the failure without re-deriving it from logs.
#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("invalid preset entry at {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("target '{target}' cannot emit (type={event_type}, code={code})")]
    CapabilityMismatch {
        target: String,
        event_type: u16,
        code: u16,
    },

    #[error("device unavailable: {path}: {reason}")]
    DeviceUnavailable { path: String, reason: String },

    #[error("macro syntax error in mapping {mapping}: {source}")]
    MacroParse {
        mapping: String,
        #[source]
        source: crate::macro_engine::MacroError,
    },

    #[error("uinput write failed on '{target}': {source}")]
    RuntimeIo {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("fatal: {0}")]
    Fatal(String),
}

impl InjectorError {
    pub fn config(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn device_unavailable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
