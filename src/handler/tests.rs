//! End-to-end scenarios and the quantified invariants from spec.md §8,
//! driven through a real [`HandlerGraph`] built from a [`Preset`].

use std::time::{Duration, Instant};

use super::graph::DefaultAxisRanges;
use super::{DispatchContext, DispatchOutcome, HandlerGraph};
use crate::event::InputEvent;
use crate::input_config::{InputCombination, InputConfig};
use crate::kernel;
use crate::macro_engine::MacroVars;
use crate::mapping::{Mapping, Output, Preset};
use crate::symbol_table::SymbolTable;
use crate::uinput::{GlobalUinputs, Mode, KEYBOARD};

fn build(preset: &Preset) -> (HandlerGraph, SymbolTable) {
    let symbols = SymbolTable::with_defaults();
    let (graph, report) = HandlerGraph::build(preset, &symbols, &DefaultAxisRanges, |_, _| (-32768, 32767));
    assert!(report.skipped.is_empty(), "unexpected skips: {:?}", report.skipped);
    (graph, symbols)
}

fn key_macro(combo: InputCombination, target: &str, symbol: &str) -> Mapping {
    Mapping {
        input_combination: combo,
        target_uinput: target.to_string(),
        output: Output::KeyMacro {
            symbol: symbol.to_string(),
            release_combination_keys: false,
            release_timeout: 0.05,
        },
    }
}

struct Harness {
    graph: HandlerGraph,
    registry: GlobalUinputs,
    symbols: SymbolTable,
    vars: MacroVars,
    now: Instant,
}

impl Harness {
    fn new(preset: &Preset) -> Self {
        let (graph, symbols) = build(preset);
        Self {
            graph,
            registry: GlobalUinputs::new(Mode::Record),
            symbols,
            vars: MacroVars::new(),
            now: Instant::now(),
        }
    }

    fn ctx(&self) -> DispatchContext<'_> {
        DispatchContext {
            registry: &self.registry,
            symbols: &self.symbols,
            vars: &self.vars,
            now: self.now,
        }
    }

    fn push(&mut self, event: InputEvent) -> DispatchOutcome {
        let ctx = self.ctx();
        self.graph.dispatch(&event, &ctx)
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
        let ctx = self.ctx();
        self.graph.tick_all(&ctx);
    }

    fn recorded(&self, target: &str) -> Vec<(u16, i32)> {
        self.registry
            .recorded(target)
            .into_iter()
            .map(|e| (e.code, e.value))
            .collect()
    }
}

#[test]
fn s1_simple_remap_fires_on_press_and_release() {
    let preset = Preset {
        name: "s1".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![InputConfig::key(kernel::key::KEY_A, 1)]),
            KEYBOARD,
            "KEY_B",
        )],
        metadata: Default::default(),
    };
    let mut h = Harness::new(&preset);

    let down = InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1);
    assert_eq!(h.push(down), DispatchOutcome::Consumed);
    let up = InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 0, 1);
    assert_eq!(h.push(up), DispatchOutcome::Consumed);

    assert_eq!(
        h.recorded(KEYBOARD),
        vec![(kernel::key::KEY_B, 1), (kernel::key::KEY_B, 0)]
    );
}

#[test]
fn s2_unmapped_event_is_not_handled() {
    let preset = Preset {
        name: "s2".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![InputConfig::key(kernel::key::KEY_A, 1)]),
            KEYBOARD,
            "KEY_B",
        )],
        metadata: Default::default(),
    };
    let mut h = Harness::new(&preset);

    let down = InputEvent::new(kernel::EV_KEY, kernel::key::KEY_C, 1, 1);
    assert_eq!(h.push(down), DispatchOutcome::NotHandled);
    assert!(h.recorded(KEYBOARD).is_empty());
}

#[test]
fn s3_combination_fires_only_on_terminal_press_and_releases_on_any_release() {
    let preset = Preset {
        name: "s3".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![
                InputConfig::key(kernel::key::KEY_LEFTSHIFT, 1),
                InputConfig::key(kernel::key::KEY_A, 1),
            ]),
            KEYBOARD,
            "KEY_B",
        )],
        metadata: Default::default(),
    };
    let mut h = Harness::new(&preset);

    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_LEFTSHIFT, 1, 1));
    assert!(h.recorded(KEYBOARD).is_empty());

    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1));
    assert_eq!(h.recorded(KEYBOARD), vec![(kernel::key::KEY_B, 1)]);

    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 0, 1));
    assert_eq!(
        h.recorded(KEYBOARD),
        vec![(kernel::key::KEY_B, 1), (kernel::key::KEY_B, 0)]
    );

    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_LEFTSHIFT, 0, 1));
    assert_eq!(
        h.recorded(KEYBOARD),
        vec![(kernel::key::KEY_B, 1), (kernel::key::KEY_B, 0)],
        "releasing the modifier after the combination already released must not re-fire"
    );
}

#[test]
fn s4_abs_as_button_fires_on_threshold_crossing() {
    let preset = Preset {
        name: "s4".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![InputConfig::abs_button(kernel::abs::ABS_X, 1, 30)]),
            KEYBOARD,
            "KEY_C",
        )],
        metadata: Default::default(),
    };
    let mut h = Harness::new(&preset);

    // ~40% and ~20% of the default [-32768, 32767] range.
    h.push(InputEvent::new(kernel::EV_ABS, kernel::abs::ABS_X, 13107, 1));
    assert_eq!(h.recorded(KEYBOARD), vec![(kernel::key::KEY_C, 1)]);

    h.push(InputEvent::new(kernel::EV_ABS, kernel::abs::ABS_X, 6554, 1));
    assert_eq!(
        h.recorded(KEYBOARD),
        vec![(kernel::key::KEY_C, 1), (kernel::key::KEY_C, 0)]
    );
}

#[test]
fn s5_mod_tap_quick_release_emits_tap_symbol() {
    let preset = Preset {
        name: "s5".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![InputConfig::key(kernel::key::KEY_A, 1)]),
            KEYBOARD,
            "mod_tap(KEY_A, KEY_LEFTSHIFT, 200)",
        )],
        metadata: Default::default(),
    };
    let mut h = Harness::new(&preset);

    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1));
    h.advance(Duration::from_millis(190));
    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 0, 1));

    assert_eq!(
        h.recorded(KEYBOARD),
        vec![(kernel::key::KEY_A, 1), (kernel::key::KEY_A, 0)]
    );
}

#[test]
fn s5_mod_tap_held_past_timeout_emits_hold_symbol() {
    let preset = Preset {
        name: "s5b".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![InputConfig::key(kernel::key::KEY_A, 1)]),
            KEYBOARD,
            "mod_tap(KEY_A, KEY_LEFTSHIFT, 200)",
        )],
        metadata: Default::default(),
    };
    let mut h = Harness::new(&preset);

    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1));
    h.advance(Duration::from_millis(210));
    assert_eq!(h.recorded(KEYBOARD), vec![(kernel::key::KEY_LEFTSHIFT, 1)]);

    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 0, 1));
    assert_eq!(
        h.recorded(KEYBOARD),
        vec![(kernel::key::KEY_LEFTSHIFT, 1), (kernel::key::KEY_LEFTSHIFT, 0)]
    );
}

#[test]
fn s6_release_all_flushes_a_held_simple_remap() {
    let preset = Preset {
        name: "s6".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![InputConfig::key(kernel::key::KEY_A, 1)]),
            KEYBOARD,
            "KEY_B",
        )],
        metadata: Default::default(),
    };
    let mut h = Harness::new(&preset);

    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1));
    assert_eq!(h.recorded(KEYBOARD), vec![(kernel::key::KEY_B, 1)]);

    let ctx = h.ctx();
    h.graph.release_all(&ctx);
    assert_eq!(
        h.recorded(KEYBOARD),
        vec![(kernel::key::KEY_B, 1), (kernel::key::KEY_B, 0)]
    );
}

#[test]
fn property_4_permutation_of_combination_shares_terminal_fires_same_mapping() {
    let preset = Preset {
        name: "p4".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![
                InputConfig::key(kernel::key::KEY_LEFTSHIFT, 1),
                InputConfig::key(kernel::key::KEY_A, 1),
            ]),
            KEYBOARD,
            "KEY_B",
        )],
        metadata: Default::default(),
    };
    // Same combination, modifiers pressed in the opposite order, same
    // terminal key. Must still fire.
    let mut h = Harness::new(&preset);
    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_LEFTSHIFT, 1, 1));
    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1));
    assert_eq!(h.recorded(KEYBOARD), vec![(kernel::key::KEY_B, 1)]);
}

#[test]
fn property_5_no_emission_until_terminal_element_completes() {
    let preset = Preset {
        name: "p5".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![
                InputConfig::key(kernel::key::KEY_LEFTSHIFT, 1),
                InputConfig::key(kernel::key::KEY_A, 1),
                InputConfig::key(kernel::key::KEY_C, 1),
            ]),
            KEYBOARD,
            "KEY_B",
        )],
        metadata: Default::default(),
    };
    let mut h = Harness::new(&preset);
    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_LEFTSHIFT, 1, 1));
    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1));
    assert!(h.recorded(KEYBOARD).is_empty());
    h.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_C, 1, 1));
    assert_eq!(h.recorded(KEYBOARD), vec![(kernel::key::KEY_B, 1)]);
}

#[test]
fn rebuilding_a_preset_yields_an_independent_graph() {
    // Two separately-built graphs from the same preset must not share
    // latched/held state — each injection gets its own graph instance.
    let preset = Preset {
        name: "rebuild".to_string(),
        mappings: vec![key_macro(
            InputCombination::new(vec![InputConfig::key(kernel::key::KEY_A, 1)]),
            KEYBOARD,
            "KEY_B",
        )],
        metadata: Default::default(),
    };
    let mut first = Harness::new(&preset);
    first.push(InputEvent::new(kernel::EV_KEY, kernel::key::KEY_A, 1, 1));
    assert_eq!(first.recorded(KEYBOARD), vec![(kernel::key::KEY_B, 1)]);

    let second = Harness::new(&preset);
    assert!(second.recorded(KEYBOARD).is_empty());
}
