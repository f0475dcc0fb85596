//! Symbol name → kernel keycode table (spec.md §4.G Key handler, §6
//! symbol-table JSON format). The caller populates this once, from the
//! user's active keyboard layout, before any injection starts; the
//! handler graph builder only ever reads it afterward.

use std::collections::HashMap;

use thiserror::Error;

use crate::kernel;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolTableError {
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    by_name: HashMap<String, u16>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handful of entries any injection needs regardless of keyboard
    /// layout (modifiers, the alpha keys used in tests and simple
    /// presets). Real layouts are loaded over this with [`Self::insert`]
    /// or [`Self::from_json`].
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.insert("KEY_A", kernel::key::KEY_A);
        table.insert("KEY_B", kernel::key::KEY_B);
        table.insert("KEY_C", kernel::key::KEY_C);
        table.insert("KEY_LEFTSHIFT", kernel::key::KEY_LEFTSHIFT);
        table.insert("BTN_LEFT", kernel::key::BTN_LEFT);
        table.insert("BTN_RIGHT", kernel::key::BTN_RIGHT);
        table
    }

    /// Loads a `{"SYMBOL": keycode, ...}` JSON object, the wire format
    /// described in spec.md §6.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let by_name: HashMap<String, u16> = serde_json::from_str(json)?;
        Ok(Self { by_name })
    }

    pub fn insert(&mut self, name: impl Into<String>, code: u16) {
        self.by_name.insert(name.into(), code);
    }

    pub fn resolve(&self, name: &str) -> Result<u16, SymbolTableError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SymbolTableError::UnknownSymbol(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_alpha_keys() {
        let table = SymbolTable::with_defaults();
        assert_eq!(table.resolve("KEY_A").unwrap(), kernel::key::KEY_A);
    }

    #[test]
    fn unknown_symbol_is_reported_by_name() {
        let table = SymbolTable::with_defaults();
        assert_eq!(
            table.resolve("KEY_NONEXISTENT"),
            Err(SymbolTableError::UnknownSymbol("KEY_NONEXISTENT".to_string()))
        );
    }

    #[test]
    fn loads_from_json() {
        let table = SymbolTable::from_json(r#"{"KEY_Q": 16}"#).unwrap();
        assert_eq!(table.resolve("KEY_Q").unwrap(), 16);
    }
}
