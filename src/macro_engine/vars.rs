//! Process-wide shared variable map for macro `set`/`add` coordination
//! (spec.md §4.F): "a named, process-wide mutable map with lock-protected
//! access, so that `set`/`add` coordinate across concurrent macros."

use scc::HashMap;

#[derive(Debug, Default)]
pub struct MacroVars {
    values: HashMap<String, f64>,
}

impl MacroVars {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> f64 {
        self.values.read_sync(name, |_, v| *v).unwrap_or(0.0)
    }

    pub fn set(&self, name: &str, value: f64) {
        *self.values.entry(name.to_string()).or_insert(0.0) = value;
    }

    pub fn add(&self, name: &str, delta: f64) {
        *self.values.entry(name.to_string()).or_insert(0.0) += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variable_reads_as_zero() {
        let vars = MacroVars::new();
        assert_eq!(vars.get("unknown"), 0.0);
    }

    #[test]
    fn set_then_add_accumulates() {
        let vars = MacroVars::new();
        vars.set("x", 1.0);
        vars.add("x", 2.5);
        assert_eq!(vars.get("x"), 3.5);
    }

    #[test]
    fn add_on_unset_variable_starts_from_zero() {
        let vars = MacroVars::new();
        vars.add("y", 4.0);
        assert_eq!(vars.get("y"), 4.0);
    }
}
