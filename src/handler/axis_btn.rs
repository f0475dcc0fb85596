//! Abs-to-btn and rel-to-btn handlers (spec.md §4.G): convert an analog
//! axis into a synthetic press/release fed to a downstream handler
//! (typically a [`super::combination::CombinationHandler`]).

use std::time::{Duration, Instant};

use super::{DispatchContext, DispatchOutcome, HandlerGraph, HandlerId};
use crate::event::{Actions, InputEvent};

fn qualifies(value: i32, threshold: i32) -> bool {
    if threshold >= 0 {
        value >= threshold
    } else {
        value <= threshold
    }
}

/// Builds the synthetic press/release fed to the wrapped handler.
/// Keeps the originating `(type, code, origin_hash)` so it still
/// matches the combination handler's stored signature for this
/// sub-input — only `value` and the `negative_trigger` tag change.
fn synthetic(event: &InputEvent, down: bool, negative_trigger: bool) -> InputEvent {
    let mut e = event.with_type_code(event.event_type, event.code, down as i32);
    e.actions = Actions { negative_trigger };
    e
}

/// Holds a latch. On each event, if `threshold >= 0`: latches on when
/// value crosses at or above threshold, off when it drops back below.
/// Mirrored for negative thresholds (spec.md §4.G).
///
/// Per spec.md §9's resolution of the open "startup latch state"
/// question: the latch always starts *off*, regardless of the axis'
/// value at injection start.
pub struct AbsToBtnHandler {
    /// Percentage in `[-100, 100]`, as stored on the originating
    /// `InputConfig`.
    threshold_pct: i32,
    /// `(min, max)` as reported by the physical device, used to
    /// normalize the raw value into a percentage.
    range: (i32, i32),
    latch: bool,
    child: HandlerId,
}

impl AbsToBtnHandler {
    pub fn new(threshold_pct: i32, range: (i32, i32), child: HandlerId) -> Self {
        Self {
            threshold_pct,
            range,
            latch: false,
            child,
        }
    }

    fn to_percent(&self, value: i32) -> i32 {
        let (min, max) = self.range;
        let span = max.unsigned_abs().max(min.unsigned_abs()).max(1) as f64;
        ((value as f64 / span) * 100.0).round() as i32
    }

    pub(crate) fn handle(
        &mut self,
        event: &InputEvent,
        ctx: &DispatchContext,
        graph: &mut HandlerGraph,
    ) -> DispatchOutcome {
        let pct = self.to_percent(event.value);
        let qualifies_now = qualifies(pct, self.threshold_pct);

        if qualifies_now && !self.latch {
            self.latch = true;
            let synth = synthetic(event, true, self.threshold_pct < 0);
            graph.dispatch_handler(self.child, &synth, ctx);
        } else if !qualifies_now && self.latch {
            self.latch = false;
            let synth = synthetic(event, false, self.threshold_pct < 0);
            graph.dispatch_handler(self.child, &synth, ctx);
        }
        DispatchOutcome::Consumed
    }

    pub(crate) fn release_if_latched(&mut self, ctx: &DispatchContext, graph: &mut HandlerGraph) {
        if self.latch {
            self.latch = false;
            graph.release_handler(self.child, ctx);
        }
    }

    pub(crate) fn child(&self) -> HandlerId {
        self.child
    }
}

/// Relative axes never return to zero on their own, so this handler
/// arms a release timer on every qualifying event and synthesizes a
/// release when it expires with no further qualifying events (spec.md
/// §4.G, testable property 7).
pub struct RelToBtnHandler {
    signature: (u16, u16, u64),
    speed_threshold: i32,
    release_timeout: Duration,
    latch: bool,
    deadline: Option<Instant>,
    child: HandlerId,
}

impl RelToBtnHandler {
    pub fn new(
        signature: (u16, u16, u64),
        speed_threshold: i32,
        release_timeout: Duration,
        child: HandlerId,
    ) -> Self {
        Self {
            signature,
            speed_threshold,
            release_timeout,
            latch: false,
            deadline: None,
            child,
        }
    }

    pub(crate) fn handle(
        &mut self,
        event: &InputEvent,
        ctx: &DispatchContext,
        graph: &mut HandlerGraph,
    ) -> DispatchOutcome {
        if !qualifies(event.value, self.speed_threshold) {
            return DispatchOutcome::Chain;
        }
        if !self.latch {
            self.latch = true;
            let synth = synthetic(event, true, self.speed_threshold < 0);
            graph.dispatch_handler(self.child, &synth, ctx);
        }
        self.deadline = Some(ctx.now + self.release_timeout);
        DispatchOutcome::Consumed
    }

    /// Called by the injection's periodic scheduler. Returns the next
    /// instant this handler wants to be ticked, if its timer is armed.
    pub(crate) fn tick(&mut self, ctx: &DispatchContext, graph: &mut HandlerGraph) -> Option<Instant> {
        let deadline = self.deadline?;
        if ctx.now < deadline {
            return Some(deadline);
        }
        self.latch = false;
        self.deadline = None;
        let (event_type, code, origin_hash) = self.signature;
        let placeholder = InputEvent::new(event_type, code, 0, origin_hash);
        let synth = synthetic(&placeholder, false, self.speed_threshold < 0);
        graph.dispatch_handler(self.child, &synth, ctx);
        None
    }

    pub(crate) fn release_if_latched(&mut self, ctx: &DispatchContext, graph: &mut HandlerGraph) {
        if self.latch {
            self.latch = false;
            self.deadline = None;
            graph.release_handler(self.child, ctx);
        }
    }

    pub(crate) fn peek_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn child(&self) -> HandlerId {
        self.child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::combination::CombinationHandler;
    use crate::handler::leaf::{KeyHandler, Leaf};
    use crate::handler::HandlerKind;
    use crate::input_config::{InputCombination, InputConfig};
    use crate::kernel;
    use crate::macro_engine::MacroVars;
    use crate::symbol_table::SymbolTable;
    use crate::uinput::{GlobalUinputs, Mode, KEYBOARD};

    fn one_child_graph() -> (HandlerGraph, HandlerId) {
        let combo = InputCombination::new(vec![InputConfig::abs_button(kernel::abs::ABS_X, 1, 30)]);
        let leaf = Leaf::Key(KeyHandler::new(KEYBOARD.to_string(), kernel::key::KEY_C, 1));
        let mut graph = HandlerGraph::empty();
        let id = graph.push(HandlerKind::Combination(CombinationHandler::new(&combo, leaf)));
        (graph, id)
    }

    #[test]
    fn abs_to_btn_latches_on_threshold_crossing() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let symbols = SymbolTable::with_defaults();
        let vars = MacroVars::new();
        let ctx = DispatchContext {
            registry: &registry,
            symbols: &symbols,
            vars: &vars,
            now: std::time::Instant::now(),
        };
        let (mut graph, child) = one_child_graph();
        let mut handler = AbsToBtnHandler::new(30, (-100, 100), child);

        let high = InputEvent::new(kernel::EV_ABS, kernel::abs::ABS_X, 40, 1);
        handler.handle(&high, &ctx, &mut graph);
        assert!(handler.latch);

        let low = InputEvent::new(kernel::EV_ABS, kernel::abs::ABS_X, 20, 1);
        handler.handle(&low, &ctx, &mut graph);
        assert!(!handler.latch);
    }

    #[test]
    fn rel_to_btn_synthesizes_release_after_timeout() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let symbols = SymbolTable::with_defaults();
        let vars = MacroVars::new();
        let start = std::time::Instant::now();
        let (mut graph, child) = one_child_graph();
        let mut handler = RelToBtnHandler::new((kernel::EV_REL, kernel::rel::REL_X, 1), 5, Duration::from_millis(50), child);

        let ctx0 = DispatchContext {
            registry: &registry,
            symbols: &symbols,
            vars: &vars,
            now: start,
        };
        let motion = InputEvent::new(kernel::EV_REL, kernel::rel::REL_X, 10, 1);
        handler.handle(&motion, &ctx0, &mut graph);
        assert!(handler.latch);

        let ctx1 = DispatchContext {
            registry: &registry,
            symbols: &symbols,
            vars: &vars,
            now: start + Duration::from_millis(60),
        };
        handler.tick(&ctx1, &mut graph);
        assert!(!handler.latch);
    }

    #[test]
    fn rel_to_btn_re_arms_timer_on_repeated_qualifying_events() {
        let registry = GlobalUinputs::new(Mode::Introspect);
        let symbols = SymbolTable::with_defaults();
        let vars = MacroVars::new();
        let start = std::time::Instant::now();
        let (mut graph, child) = one_child_graph();
        let mut handler = RelToBtnHandler::new((kernel::EV_REL, kernel::rel::REL_X, 1), 5, Duration::from_millis(50), child);

        let ctx0 = DispatchContext {
            registry: &registry,
            symbols: &symbols,
            vars: &vars,
            now: start,
        };
        let motion = InputEvent::new(kernel::EV_REL, kernel::rel::REL_X, 10, 1);
        handler.handle(&motion, &ctx0, &mut graph);

        let ctx1 = DispatchContext {
            registry: &registry,
            symbols: &symbols,
            vars: &vars,
            now: start + Duration::from_millis(30),
        };
        handler.handle(&motion, &ctx1, &mut graph);
        // re-armed at +30ms, so +60ms from start (30ms after the second
        // event) should not yet have expired.
        let ctx2 = DispatchContext {
            registry: &registry,
            symbols: &symbols,
            vars: &vars,
            now: start + Duration::from_millis(60),
        };
        handler.tick(&ctx2, &mut graph);
        assert!(handler.latch);
    }
}
