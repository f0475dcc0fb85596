//! Builds a [`super::HandlerKind`] arena from a validated
//! [`crate::mapping::Preset`] (spec.md §4.G) and drives dispatch/tick/
//! release across it.

use std::time::{Duration, Instant};

use smallvec::SmallVec;

use super::analog::{AbsToAbsHandler, AbsToRelHandler, RelToAbsHandler, RelToRelHandler};
use super::axis_btn::{AbsToBtnHandler, RelToBtnHandler};
use super::combination::CombinationHandler;
use super::leaf::{KeyHandler, Leaf, MacroHandler};
use super::{DispatchContext, DispatchOutcome, HandlerId, HandlerKind, HierarchyHandler, SignatureIndex};
use crate::event::InputEvent;
use crate::kernel;
use crate::macro_engine::Macro;
use crate::mapping::{Mapping, Output, Preset};
use crate::symbol_table::SymbolTable;

/// What the builder needs to know about the physical device(s) behind
/// a signature, to normalize raw analog values. Supplied by the
/// injector from the grabbed devices' reported `AbsInfo`.
pub trait AxisRangeSource {
    /// `(min, max)` for an absolute axis, or `None` if unknown (treated
    /// as the kernel-typical joystick range `[-32768, 32767]`).
    fn abs_range(&self, code: u16, origin_hash: u64) -> Option<(i32, i32)>;
}

/// No-op source: every abs axis reports the full signed 16-bit range.
/// Good enough for tests and for target uinputs, whose ranges are
/// already known from [`crate::uinput::registry::Capabilities`].
pub struct DefaultAxisRanges;

impl AxisRangeSource for DefaultAxisRanges {
    fn abs_range(&self, _code: u16, _origin_hash: u64) -> Option<(i32, i32)> {
        None
    }
}

/// One mapping that didn't make it into the graph, and why. Mirrors
/// spec.md §7's `ConfigError` / `CapabilityMismatch` / `MacroParseError`
/// categories — logged by the caller, never fatal to the whole preset.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub skipped: Vec<(usize, String)>,
    pub built: usize,
}

pub struct HandlerGraph {
    arena: Vec<HandlerKind>,
    signatures: SignatureIndex,
    tickable: Vec<HandlerId>,
}

impl HandlerGraph {
    pub fn empty() -> Self {
        Self {
            arena: Vec::new(),
            signatures: SignatureIndex::new(),
            tickable: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, kind: HandlerKind) -> HandlerId {
        self.arena.push(kind);
        HandlerId(self.arena.len() - 1)
    }

    fn register(&mut self, signature: (u16, u16, u64), id: HandlerId) {
        self.signatures.entry(signature).or_insert_with(SmallVec::new).push(id);
    }

    fn mark_tickable(&mut self, id: HandlerId) {
        self.tickable.push(id);
    }

    /// Builds a graph from every mapping that passes structural
    /// validation and symbol resolution. `target_range` resolves a
    /// `(target uinput name, EV_ABS code)` pair to its reported range,
    /// needed to scale abs/rel-to-abs/abs output.
    pub fn build(
        preset: &Preset,
        symbols: &SymbolTable,
        ranges: &dyn AxisRangeSource,
        target_range: impl Fn(&str, u16) -> (i32, i32),
    ) -> (Self, BuildReport) {
        let mut graph = Self::empty();
        let mut report = BuildReport {
            skipped: Vec::new(),
            built: 0,
        };

        let invalid: Vec<usize> = preset.validate().into_iter().map(|(i, _)| i).collect();

        for (i, mapping) in preset.mappings.iter().enumerate() {
            if invalid.contains(&i) {
                report.skipped.push((i, "failed structural validation".to_string()));
                continue;
            }
            match graph.build_one(mapping, symbols, ranges, &target_range) {
                Ok(()) => report.built += 1,
                Err(reason) => report.skipped.push((i, reason)),
            }
        }

        graph.collapse_hierarchies();
        (graph, report)
    }

    fn build_one(
        &mut self,
        mapping: &Mapping,
        symbols: &SymbolTable,
        ranges: &dyn AxisRangeSource,
        target_range: &impl Fn(&str, u16) -> (i32, i32),
    ) -> Result<(), String> {
        match &mapping.output {
            Output::Analog { .. } => self.build_analog(mapping, ranges, target_range),
            Output::KeyMacro { .. } => self.build_key_macro(mapping, symbols, ranges),
        }
    }

    fn build_analog(
        &mut self,
        mapping: &Mapping,
        ranges: &dyn AxisRangeSource,
        target_range: &impl Fn(&str, u16) -> (i32, i32),
    ) -> Result<(), String> {
        let Output::Analog {
            output_type,
            output_code,
            gain,
            expo,
            deadzone,
            rel_to_abs_input_cutoff,
            ..
        } = &mapping.output
        else {
            unreachable!()
        };
        let analog_config = mapping
            .input_combination
            .single_analog_config()
            .ok_or_else(|| "analog mapping has no single analog input".to_string())?;
        let transform = crate::axis::AxisTransform::new(*deadzone, *expo, *gain);
        let signature = analog_config.signature();
        let source_range = ranges
            .abs_range(analog_config.code, analog_config.origin_hash)
            .unwrap_or((-32768, 32767));

        let id = match (analog_config.event_type, *output_type) {
            (kernel::EV_ABS, kernel::EV_ABS) => {
                let out_range = target_range(&mapping.target_uinput, *output_code);
                self.push(HandlerKind::AbsToAbs(AbsToAbsHandler::new(
                    transform,
                    source_range,
                    out_range,
                    mapping.target_uinput.clone(),
                    *output_code,
                    analog_config.origin_hash,
                )))
            }
            (kernel::EV_ABS, kernel::EV_REL) => {
                let id = self.push(HandlerKind::AbsToRel(AbsToRelHandler::new(
                    transform,
                    source_range,
                    mapping.target_uinput.clone(),
                    *output_code,
                    analog_config.origin_hash,
                )));
                self.mark_tickable(id);
                id
            }
            (kernel::EV_REL, kernel::EV_ABS) => {
                let out_range = target_range(&mapping.target_uinput, *output_code);
                self.push(HandlerKind::RelToAbs(RelToAbsHandler::new(
                    transform,
                    *rel_to_abs_input_cutoff,
                    out_range,
                    mapping.target_uinput.clone(),
                    *output_code,
                    analog_config.origin_hash,
                )))
            }
            (kernel::EV_REL, kernel::EV_REL) => self.push(HandlerKind::RelToRel(RelToRelHandler::new(
                transform,
                *rel_to_abs_input_cutoff,
                mapping.target_uinput.clone(),
                *output_code,
                analog_config.origin_hash,
            ))),
            _ => return Err("unsupported analog input/output type combination".to_string()),
        };
        self.register(signature, id);
        Ok(())
    }

    fn build_key_macro(
        &mut self,
        mapping: &Mapping,
        symbols: &SymbolTable,
        ranges: &dyn AxisRangeSource,
    ) -> Result<(), String> {
        let Output::KeyMacro {
            symbol,
            release_timeout,
            ..
        } = &mapping.output
        else {
            unreachable!()
        };
        let origin_hash = mapping
            .input_combination
            .terminal()
            .map(|c| c.origin_hash)
            .unwrap_or(0);

        let (leaf, is_macro) = if let Ok(code) = symbols.resolve(symbol) {
            (Leaf::Key(KeyHandler::new(mapping.target_uinput.clone(), code, origin_hash)), false)
        } else {
            match Macro::compile(symbol) {
                Ok(compiled) => (
                    Leaf::Macro(MacroHandler::new(mapping.target_uinput.clone(), compiled, origin_hash)),
                    true,
                ),
                Err(e) => return Err(format!("unknown symbol and invalid macro '{symbol}': {e}")),
            }
        };

        let combination_id = self.push(HandlerKind::Combination(CombinationHandler::new(
            &mapping.input_combination,
            leaf,
        )));
        if is_macro {
            self.mark_tickable(combination_id);
        }

        for config in mapping.input_combination.configs() {
            if config.is_button_like() && config.event_type == kernel::EV_KEY {
                self.register(config.signature(), combination_id);
            } else if config.analog_threshold.is_some() && config.event_type == kernel::EV_ABS {
                let threshold = config.analog_threshold.unwrap();
                let range = ranges.abs_range(config.code, config.origin_hash).unwrap_or((-32768, 32767));
                let wrapper = self.push(HandlerKind::AbsToBtn(AbsToBtnHandler::new(
                    threshold,
                    range,
                    combination_id,
                )));
                self.register(config.signature(), wrapper);
            } else if config.analog_threshold.is_some() && config.event_type == kernel::EV_REL {
                let threshold = config.analog_threshold.unwrap();
                let timeout = Duration::from_secs_f64(*release_timeout);
                let wrapper = self.push(HandlerKind::RelToBtn(RelToBtnHandler::new(
                    config.signature(),
                    threshold,
                    timeout,
                    combination_id,
                )));
                self.register(config.signature(), wrapper);
            } else {
                return Err(format!(
                    "combination sub-input (type={}, code={}) is neither a key nor an axis-as-button",
                    config.event_type, config.code
                ));
            }
        }
        Ok(())
    }

    /// Groups entry-point lists that hold more than one handler into a
    /// [`HierarchyHandler`], longest combination first (spec.md §4.G
    /// step 3). Handlers that are the sole entry for their signature
    /// are left untouched.
    fn collapse_hierarchies(&mut self) {
        let signatures: Vec<(u16, u16, u64)> = self.signatures.keys().copied().collect();
        for sig in signatures {
            let ids = self.signatures.get(&sig).cloned().unwrap_or_default();
            if ids.len() <= 1 {
                continue;
            }
            let mut entries: Vec<(usize, HandlerId)> =
                ids.iter().map(|&id| (self.combination_len(id), id)).collect();
            entries.sort_by(|a, b| b.0.cmp(&a.0));
            let hierarchy_id = self.push(HandlerKind::Hierarchy(Box::new(HierarchyHandler { entries })));
            self.signatures.insert(sig, SmallVec::from_elem(hierarchy_id, 1));
        }
    }

    /// Length of the combination a (possibly axis-to-button-wrapped)
    /// entry point ultimately guards, for [`Self::collapse_hierarchies`]'
    /// longest-first ordering.
    fn combination_len(&self, id: HandlerId) -> usize {
        match &self.arena[id.0] {
            HandlerKind::Combination(h) => h.len(),
            HandlerKind::AbsToBtn(h) => self.combination_len(h.child()),
            HandlerKind::RelToBtn(h) => self.combination_len(h.child()),
            _ => 0,
        }
    }

    /// Top-level dispatch entry point (spec.md §4.H): looks up the
    /// handlers registered for `event`'s signature and tries them in
    /// order until one resolves.
    pub fn dispatch(&mut self, event: &InputEvent, ctx: &DispatchContext) -> DispatchOutcome {
        let sig = (event.event_type, event.code, event.origin_hash);
        let Some(ids) = self.signatures.get(&sig).cloned() else {
            return DispatchOutcome::NotHandled;
        };
        for id in ids {
            match self.dispatch_handler(id, event, ctx) {
                DispatchOutcome::Chain => continue,
                other => return other,
            }
        }
        DispatchOutcome::NotHandled
    }

    /// Dispatches directly to one arena entry by id, swapping it out
    /// for a tombstone for the duration of the call so composite
    /// handlers can recurse into their children without aliasing the
    /// arena (spec.md §9 "cyclic references").
    pub(crate) fn dispatch_handler(
        &mut self,
        id: HandlerId,
        event: &InputEvent,
        ctx: &DispatchContext,
    ) -> DispatchOutcome {
        let mut node = std::mem::replace(&mut self.arena[id.0], HandlerKind::Placeholder);
        let outcome = node.handle(event, ctx, self);
        self.arena[id.0] = node;
        outcome
    }

    pub(crate) fn release_handler(&mut self, id: HandlerId, ctx: &DispatchContext) {
        let mut node = std::mem::replace(&mut self.arena[id.0], HandlerKind::Placeholder);
        node.release_all(ctx, self);
        self.arena[id.0] = node;
    }

    /// Releases every key this graph might currently be holding down
    /// (spec.md §4.I / §5, testable property 3). Called once when an
    /// injection stops.
    pub fn release_all(&mut self, ctx: &DispatchContext) {
        for i in 0..self.arena.len() {
            self.release_handler(HandlerId(i), ctx);
        }
    }

    /// Advances every time-driven handler (rel-to-btn release timers,
    /// abs-to-rel per-tick emission). Call whenever the reader loop
    /// wakes up with no event, at or after [`Self::next_deadline`].
    pub fn tick_all(&mut self, ctx: &DispatchContext) {
        let ids = self.tickable.clone();
        for id in ids {
            let mut node = std::mem::replace(&mut self.arena[id.0], HandlerKind::Placeholder);
            node.tick(ctx, self);
            self.arena[id.0] = node;
        }
    }

    /// The earliest instant any tickable handler wants to be woken,
    /// used by the reader loop to bound its `recv_timeout`.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tickable
            .iter()
            .filter_map(|id| match &self.arena[id.0] {
                HandlerKind::RelToBtn(h) => h.peek_deadline(),
                HandlerKind::AbsToRel(h) => h.peek_deadline(),
                HandlerKind::Combination(h) => h.next_deadline(),
                _ => None,
            })
            .min()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}
