//! Consumes the on-disk JSON contracts spec.md §6 describes: preset
//! files, the autoload config, and the symbol table snapshot. Loading,
//! migrating, and *writing* these files back is the external GUI's
//! job (spec.md §1 "out of scope") — this module only reads what the
//! core needs to build a [`crate::handler::HandlerGraph`] and start an
//! injection.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::InjectorError;
use crate::mapping::Preset;
use crate::symbol_table::SymbolTable;

fn read(path: &Path) -> Result<String, InjectorError> {
    fs::read_to_string(path)
        .map_err(|e| InjectorError::config(path.display().to_string(), e.to_string()))
}

/// Loads one preset file: `{"mappings": [...], ...}`, unknown top-level
/// fields ignored (spec.md §6 "forward-compatible").
pub fn load_preset(path: &Path) -> Result<Preset, InjectorError> {
    let raw = read(path)?;
    serde_json::from_str(&raw).map_err(|e| InjectorError::config(path.display().to_string(), e.to_string()))
}

/// The reserved top-level key under which freeform autoload options
/// live, as opposed to `group_key -> preset_name` entries (spec.md §6:
/// "plus freeform global options" — the wire format doesn't separate
/// the two namespaces itself, so this is the convention this crate
/// settles on; see DESIGN.md).
const AUTOLOAD_OPTIONS_KEY: &str = "options";

/// Loads the `group_key -> preset_name` entries out of the autoload
/// config, skipping the reserved `"options"` key and any entry whose
/// value isn't a plain string.
pub fn load_autoload_config(path: &Path) -> Result<HashMap<String, String>, InjectorError> {
    let raw = read(path)?;
    let parsed: HashMap<String, serde_json::Value> =
        serde_json::from_str(&raw).map_err(|e| InjectorError::config(path.display().to_string(), e.to_string()))?;

    Ok(parsed
        .into_iter()
        .filter(|(key, _)| key != AUTOLOAD_OPTIONS_KEY)
        .filter_map(|(key, value)| value.as_str().map(|preset| (key, preset.to_string())))
        .collect())
}

/// Loads a `{"SYMBOL": keycode, ...}` symbol table snapshot, taken from
/// the user's active keyboard layout at the time the supervisor (or
/// whichever external caller) started the injection (spec.md §6).
pub fn load_symbol_table(path: &Path) -> Result<SymbolTable, InjectorError> {
    let raw = read(path)?;
    SymbolTable::from_json(&raw).map_err(|e| InjectorError::config(path.display().to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_minimal_preset() {
        let file = write_temp(r#"{"name": "p", "mappings": []}"#);
        let preset = load_preset(file.path()).unwrap();
        assert_eq!(preset.name, "p");
        assert!(preset.mappings.is_empty());
    }

    #[test]
    fn unknown_preset_fields_are_ignored() {
        let file = write_temp(r#"{"mappings": [], "future_field": 123}"#);
        assert!(load_preset(file.path()).is_ok());
    }

    #[test]
    fn autoload_config_skips_the_options_key_and_non_string_entries() {
        let file = write_temp(
            r#"{"options": {"some_global_flag": true}, "my-keyboard": "gaming", "weird": 5}"#,
        );
        let entries = load_autoload_config(file.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.get("my-keyboard"), Some(&"gaming".to_string()));
    }

    #[test]
    fn symbol_table_loads_from_a_flat_json_map() {
        let file = write_temp(r#"{"KEY_Q": 16, "KEY_W": 17}"#);
        let table = load_symbol_table(file.path()).unwrap();
        assert_eq!(table.resolve("KEY_Q").unwrap(), 16);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_preset(Path::new("/nonexistent/path.json")).unwrap_err();
        assert!(matches!(err, InjectorError::Config { .. }));
    }
}
